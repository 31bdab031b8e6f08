use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Category of a failed suggestion request, as surfaced to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    Connectivity,
    NoResponse,
    NoSuggestions,
    Timeout,
    Other,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Connectivity => write!(f, "Connectivity"),
            ErrorKind::NoResponse => write!(f, "NoResponse"),
            ErrorKind::NoSuggestions => write!(f, "NoSuggestions"),
            ErrorKind::Timeout => write!(f, "Timeout"),
            ErrorKind::Other => write!(f, "Other"),
        }
    }
}

/// Error raised while talking to a model provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("failed to decode provider response: {0}")]
    Decode(String),

    #[error("provider misconfigured: {0}")]
    Config(String),

    #[error("request timed out")]
    Timeout,
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout
        } else if err.is_decode() {
            ProviderError::Decode(err.to_string())
        } else {
            ProviderError::Network(err.to_string())
        }
    }
}

/// A failed suggestion request: a kind plus the message shown to the user.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct SuggestError {
    pub kind: ErrorKind,
    pub message: String,
}

impl SuggestError {
    pub fn connectivity() -> Self {
        Self {
            kind: ErrorKind::Connectivity,
            message: "API Error: Please check your internet connection".to_string(),
        }
    }

    pub fn network() -> Self {
        Self {
            kind: ErrorKind::Connectivity,
            message: "Network Error: Please check your internet connection".to_string(),
        }
    }

    pub fn no_response() -> Self {
        Self {
            kind: ErrorKind::NoResponse,
            message: "No response received. Please try again.".to_string(),
        }
    }

    pub fn no_suggestions(from_image: bool) -> Self {
        let message = if from_image {
            "Unable to generate suggestions from image. Please try again."
        } else {
            "Unable to generate suggestions. Please try again."
        };
        Self {
            kind: ErrorKind::NoSuggestions,
            message: message.to_string(),
        }
    }

    pub fn timeout() -> Self {
        Self {
            kind: ErrorKind::Timeout,
            message: "Request timed out. Please try again.".to_string(),
        }
    }

    pub fn other(detail: impl Into<String>) -> Self {
        let detail = detail.into();
        let detail = if detail.trim().is_empty() {
            "Unknown error occurred".to_string()
        } else {
            detail
        };
        Self {
            kind: ErrorKind::Other,
            message: format!("Error: {}", detail),
        }
    }

    /// Whether another attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self.kind, ErrorKind::Connectivity | ErrorKind::Timeout)
    }
}

impl From<ProviderError> for SuggestError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Network(_) => SuggestError::network(),
            ProviderError::Api { .. } => SuggestError::connectivity(),
            ProviderError::Timeout => SuggestError::timeout(),
            ProviderError::Decode(msg) | ProviderError::Config(msg) => SuggestError::other(msg),
        }
    }
}
