use std::time::Duration;

/// Maximum number of characters of a response body kept in [`Error::Service`].
const MAX_BODY_CHARS: usize = 1000;

/// All errors that can occur in songsnap.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("could not download audio after {attempts} strategies: {last_error}")]
    Acquisition { attempts: usize, last_error: String },

    #[error("yt-dlp not found — install with: pip install yt-dlp")]
    YtDlpNotFound,

    #[error("transcode error: {0}")]
    Transcode(String),

    #[error("audio clip too large for the recognition service — lower max_duration")]
    PayloadTooLarge,

    #[error("recognition service returned HTTP {status}: {body}")]
    Service { status: u16, body: String },

    #[error("recognition service did not answer within {0:?}")]
    Timeout(Duration),

    #[error("no matching track found")]
    NotFound,

    #[error("cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Build a [`Error::Service`], truncating the body so huge error pages
    /// don't end up in logs and messages.
    pub(crate) fn service(status: u16, body: &str) -> Self {
        Error::Service {
            status,
            body: body.chars().take(MAX_BODY_CHARS).collect(),
        }
    }

    /// Whether running the whole pipeline again might succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Timeout(_) => true,
            Error::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Error::Service { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// The service answered but recognised nothing.
    pub fn is_no_match(&self) -> bool {
        matches!(self, Error::NotFound)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
