use thiserror::Error;

use torspider_urlnorm::NormError;

/// Everything that can take a task from `working` to `failure`, plus the
/// store and parse conditions the worker handles in place.
#[derive(Error, Debug)]
pub enum CrawlError {
    #[error("invalid URL: {0}")]
    MalformedUrl(String),

    #[error("HTTP status {0}")]
    Http(u16),

    #[error("network error: {0}")]
    Network(String),

    #[error("illegal content type: {0}")]
    BadContentType(String),

    #[error("illegal content language: {0}")]
    BadLanguage(String),

    #[error("content size {got}Kb exceeds {limit}Kb")]
    ContentTooLarge { got: u64, limit: u64 },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("store unavailable: {0}")]
    Store(String),
}

impl From<NormError> for CrawlError {
    fn from(error: NormError) -> Self {
        CrawlError::MalformedUrl(error.to_string())
    }
}
