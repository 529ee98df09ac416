use serde::{Deserialize, Serialize};

use filegate_core::session::Session;
use filegate_core::{Error, Result};

use super::ServeContext;
use crate::store::StoredFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cacheability {
    Public,
    Private,
}

/// Caller-supplied transmission tweaks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendFileOptions {
    /// Defaults to private for logged-in actors, public otherwise.
    #[serde(default)]
    pub cacheability: Option<Cacheability>,
    #[serde(default)]
    pub immutable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendParams {
    /// `None` uses the configured default lifetime; `Some(0)` disables caching.
    pub lifetime_secs: Option<u64>,
    pub force_download: bool,
    pub options: SendFileOptions,
}

/// A fully prepared response: headers plus body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transmission {
    pub file_id: i64,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Transmission {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Where transmitted files go. A sink accepts at most one transmission.
pub trait ResponseSink {
    fn send(&mut self, transmission: Transmission) -> Result<()>;
}

/// Sink that keeps the transmission in memory for the caller to forward.
#[derive(Debug, Default)]
pub struct BufferedResponse {
    sent: Option<Transmission>,
}

impl BufferedResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_sent(&self) -> bool {
        self.sent.is_some()
    }

    pub fn into_transmission(self) -> Option<Transmission> {
        self.sent
    }
}

impl ResponseSink for BufferedResponse {
    fn send(&mut self, transmission: Transmission) -> Result<()> {
        if self.sent.is_some() {
            return Err(Error::Conflict("response already sent".to_string()));
        }
        self.sent = Some(transmission);
        Ok(())
    }
}

/// Loads the file body and hands it to the sink. Callers run the access check first.
pub fn send_stored_file(
    ctx: &mut ServeContext<'_>,
    file: &StoredFile,
    params: &SendParams,
) -> Result<()> {
    if file.is_directory {
        return Err(Error::NotFound("file not found".to_string()));
    }
    let max_bytes = ctx.rules.max_send_bytes;
    if file.size_bytes > max_bytes {
        return Err(Error::FileTooLarge {
            path: format!("{}{}", file.key.filepath, file.key.filename),
            size_bytes: file.size_bytes,
            max_bytes,
        });
    }
    let Some(body) = ctx.store.get_file_content(file.id)? else {
        return Err(Error::NotFound("file not found".to_string()));
    };

    let lifetime = params
        .lifetime_secs
        .unwrap_or(ctx.rules.default_lifetime_secs);
    let cacheability = params
        .options
        .cacheability
        .unwrap_or_else(|| default_cacheability(ctx.session));
    let headers = response_headers(
        file,
        body.len() as u64,
        lifetime,
        cacheability,
        params.force_download,
        params.options.immutable,
    );

    tracing::debug!(
        file_id = file.id,
        component = %file.key.component,
        area = %file.key.area,
        bytes = body.len(),
        force_download = params.force_download,
        "sending stored file"
    );
    ctx.sink.send(Transmission {
        file_id: file.id,
        headers,
        body,
    })
}

fn default_cacheability(session: &dyn Session) -> Cacheability {
    if session.user_id().is_some() {
        Cacheability::Private
    } else {
        Cacheability::Public
    }
}

pub(crate) fn response_headers(
    file: &StoredFile,
    content_length: u64,
    lifetime_secs: u64,
    cacheability: Cacheability,
    force_download: bool,
    immutable: bool,
) -> Vec<(String, String)> {
    let disposition = if force_download { "attachment" } else { "inline" };
    let cache_control = if lifetime_secs > 0 {
        let scope = match cacheability {
            Cacheability::Public => "public",
            Cacheability::Private => "private",
        };
        let mut value = format!("{scope}, max-age={lifetime_secs}, no-transform");
        if immutable {
            value.push_str(", immutable");
        }
        value
    } else {
        "private, must-revalidate, pre-check=0, post-check=0, max-age=0, no-transform".to_string()
    };
    let mimetype = if force_download {
        "application/x-forcedownload"
    } else {
        file.mimetype.as_str()
    };

    vec![
        ("Content-Type".to_string(), mimetype.to_string()),
        ("Content-Length".to_string(), content_length.to_string()),
        (
            "Content-Disposition".to_string(),
            content_disposition(disposition, &file.key.filename),
        ),
        ("Cache-Control".to_string(), cache_control),
        ("ETag".to_string(), format!("\"{}\"", file.content_hash)),
        ("Accept-Ranges".to_string(), "none".to_string()),
    ]
}

fn content_disposition(kind: &str, filename: &str) -> String {
    let ascii: String = filename
        .chars()
        .map(|ch| {
            if ch.is_ascii() && !ch.is_ascii_control() && ch != '"' && ch != '\\' {
                ch
            } else {
                '_'
            }
        })
        .collect();
    format!(
        "{kind}; filename=\"{ascii}\"; filename*=UTF-8''{}",
        urlencoding::encode(filename)
    )
}
