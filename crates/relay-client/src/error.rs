//! Relay client errors.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Not authenticated")]
    NotAuthenticated,
}

impl RelayClientError {
    /// HTTP status of a non-success response, if that is what this error is.
    pub fn status(&self) -> Option<u16> {
        match self {
            RelayClientError::Api { status, .. } => Some(*status),
            RelayClientError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
