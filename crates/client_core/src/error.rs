use std::time::Duration;

use shared::error::{ApiError, ErrorCode};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// Non-success response, or the request never produced one.
    #[error("{message}")]
    Transport {
        status: Option<u16>,
        message: String,
    },
    #[error("malformed progress event: {0}")]
    StreamParse(String),
    #[error("progress stream unavailable: {0}")]
    StreamConnectivity(String),
    #[error("Upload tracking timed out after {}s", .0.as_secs())]
    Timeout(Duration),
    #[error("{0}")]
    Validation(String),
    #[error("invalid server url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

impl ClientError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Transport { status, .. } => *status,
            _ => None,
        }
    }

    pub fn code(&self) -> Option<ErrorCode> {
        self.status().map(ErrorCode::from_status)
    }

    pub fn is_not_found(&self) -> bool {
        self.code() == Some(ErrorCode::NotFound)
    }
}

impl From<ApiError> for ClientError {
    fn from(value: ApiError) -> Self {
        Self::Transport {
            status: Some(value.status),
            message: value.message,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(value: reqwest::Error) -> Self {
        Self::Transport {
            status: value.status().map(|status| status.as_u16()),
            message: value.to_string(),
        }
    }
}

pub type ClientResult<T> = std::result::Result<T, ClientError>;
