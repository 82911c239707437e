use thiserror::Error;

pub type Result<T> = std::result::Result<T, BilibiliError>;

/// Business codes the view endpoint uses for videos that do not exist or
/// are not viewable (deleted, under review, private).
const NOT_FOUND_CODES: [i64; 4] = [-404, 62002, 62004, 62012];

/// Codes returned when the WBI signature is stale or the request was
/// flagged by risk control.
const SIGNATURE_REJECTED_CODES: [i64; 2] = [-352, -403];

#[derive(Debug, Error)]
pub enum BilibiliError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("HTTP error (status {status}): {body}")]
    Http { status: u16, body: String },

    #[error("API error (code {code}): {message}")]
    Api { code: i64, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Response is missing {0}")]
    MissingData(&'static str),
}

impl BilibiliError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, BilibiliError::Api { code, .. } if NOT_FOUND_CODES.contains(code))
    }

    pub fn is_signature_rejected(&self) -> bool {
        matches!(self, BilibiliError::Api { code, .. } if SIGNATURE_REJECTED_CODES.contains(code))
    }
}

impl From<reqwest::Error> for BilibiliError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BilibiliError::Timeout
        } else if err.is_decode() {
            BilibiliError::Parse(err.to_string())
        } else {
            BilibiliError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for BilibiliError {
    fn from(err: serde_json::Error) -> Self {
        BilibiliError::Parse(err.to_string())
    }
}
