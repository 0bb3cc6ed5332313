use shared::{
    color::ColorParseError,
    error::{ApiError, CloudErrorBody, ErrorCode},
};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("request to the device cloud timed out")]
    Timeout,
    #[error("{description}")]
    Remote {
        status: u16,
        code: ErrorCode,
        description: String,
    },
    #[error("unexpected response from the device cloud: {0}")]
    Decode(String),
    #[error("device rejected {function} with return value {value}")]
    Rejected { function: String, value: i64 },
    #[error(transparent)]
    InvalidColor(#[from] ColorParseError),
    #[error("pattern {0} is not in the device's pattern list")]
    UnknownPattern(String),
    #[error("Please enter your access token.")]
    MissingToken,
    #[error("no device connected")]
    NotConnected,
}

impl ClientError {
    pub fn remote(status: u16, body: &CloudErrorBody) -> Self {
        let api = ApiError::from_body(status, body);
        Self::Remote {
            status,
            code: api.code,
            description: api.message,
        }
    }

    /// Failures where the request may never have reached the device, so a
    /// repeat of the whole exchange is meaningful.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout)
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}
