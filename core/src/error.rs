use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("storage error: {0}")]
    Storage(String),

    #[error("invalid policy: {0}")]
    InvalidPolicy(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// A request field that is not a path, such as a cron schedule field.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("login required: {0}")]
    AuthRequired(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    /// A strategy or other plugin is registered in a way that cannot work.
    /// Never downgraded to a softer outcome.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("file is too large ({size_bytes} bytes; max {max_bytes} bytes): {path}")]
    FileTooLarge {
        path: String,
        size_bytes: u64,
        max_bytes: u64,
    },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("timeout: {0}")]
    Timeout(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn code(&self) -> &'static str {
        match self {
            Error::Storage(_) => "storage",
            Error::InvalidPolicy(_) => "invalid_policy",
            Error::InvalidPath(_) => "invalid_path",
            Error::InvalidInput(_) => "invalid_input",
            Error::NotFound(_) => "not_found",
            Error::AuthRequired(_) => "auth_required",
            Error::Forbidden(_) => "forbidden",
            Error::Configuration(_) => "configuration",
            Error::FileTooLarge { .. } => "file_too_large",
            Error::Conflict(_) => "conflict",
            Error::Timeout(_) => "timeout",
        }
    }

    /// Errors that end the request with an access outcome rather than a fault.
    pub fn is_access_failure(&self) -> bool {
        matches!(
            self,
            Error::NotFound(_) | Error::AuthRequired(_) | Error::Forbidden(_)
        )
    }
}
