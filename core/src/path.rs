use std::sync::LazyLock;

use regex::Regex;

use crate::{Error, Result};

static PLUGIN_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z][a-z0-9]*(_[a-z0-9]+)*$").expect("plugin name regex is valid")
});

const MAX_NAME_BYTES: usize = 100;
const MAX_FILENAME_BYTES: usize = 255;
const MAX_PATH_BYTES: usize = 4096;

/// Component names look like `course` or `mod_folder`.
pub fn validate_component(component: &str) -> Result<()> {
    validate_name(component, "component")
}

pub fn validate_area(area: &str) -> Result<()> {
    validate_name(area, "file area")
}

fn validate_name(value: &str, label: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::InvalidPath(format!("{label} is empty")));
    }
    if value.len() > MAX_NAME_BYTES {
        return Err(Error::InvalidPath(format!(
            "{label} is too large ({} bytes; max {} bytes)",
            value.len(),
            MAX_NAME_BYTES
        )));
    }
    if !PLUGIN_NAME_RE.is_match(value) {
        return Err(Error::InvalidPath(format!("invalid {label}: {value:?}")));
    }
    Ok(())
}

/// `.` is accepted: it is how directory placeholders are named.
pub fn validate_filename(filename: &str) -> Result<()> {
    if filename.is_empty() {
        return Err(Error::InvalidPath("filename is empty".to_string()));
    }
    if filename.len() > MAX_FILENAME_BYTES {
        return Err(Error::InvalidPath(format!(
            "filename is too large ({} bytes; max {} bytes)",
            filename.len(),
            MAX_FILENAME_BYTES
        )));
    }
    if filename == ".." || filename.contains('/') || filename.contains('\\') {
        return Err(Error::InvalidPath(format!("invalid filename: {filename:?}")));
    }
    if filename.chars().any(|ch| ch.is_control()) {
        return Err(Error::InvalidPath(
            "filename must not contain control characters".to_string(),
        ));
    }
    Ok(())
}

/// Builds a stored-file directory path (`/` or `/a/b/`) from its segments.
pub fn file_path_from_segments<S: AsRef<str>>(segments: &[S]) -> Result<String> {
    let mut out = String::from("/");
    for seg in segments {
        let seg = seg.as_ref();
        if seg.is_empty() || seg == "." {
            continue;
        }
        if seg == ".." {
            return Err(Error::InvalidPath(
                ".. segments are not allowed".to_string(),
            ));
        }
        if seg.contains('/') || seg.contains('\\') {
            return Err(Error::InvalidPath(format!(
                "path segment must not contain separators: {seg:?}"
            )));
        }
        if seg.chars().any(|ch| ch.is_control()) {
            return Err(Error::InvalidPath(
                "path must not contain control characters".to_string(),
            ));
        }
        out.push_str(seg);
        out.push('/');
    }
    if out.len() > MAX_PATH_BYTES {
        return Err(Error::InvalidPath(format!(
            "path is too large ({} bytes; max {} bytes)",
            out.len(),
            MAX_PATH_BYTES
        )));
    }
    Ok(out)
}

/// Item id, directory path and filename addressed by the trailing URL arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileArgs {
    pub item_id: i64,
    pub filepath: String,
    pub filename: String,
}

/// Splits `[itemid, dir..., filename]`.
pub fn parse_file_args<S: AsRef<str>>(args: &[S]) -> Result<FileArgs> {
    let Some((first, rest)) = args.split_first() else {
        return Err(Error::InvalidPath("missing filename".to_string()));
    };
    let first = first.as_ref();
    let item_id = first
        .parse::<i64>()
        .map_err(|_| Error::InvalidPath(format!("invalid item id: {first:?}")))?;
    if item_id < 0 {
        return Err(Error::InvalidPath(format!("invalid item id: {item_id}")));
    }

    let Some((filename, dirs)) = rest.split_last() else {
        return Err(Error::InvalidPath("missing filename".to_string()));
    };
    let filename = filename.as_ref();
    validate_filename(filename)?;
    let filepath = file_path_from_segments(dirs)?;

    Ok(FileArgs {
        item_id,
        filepath,
        filename: filename.to_string(),
    })
}
