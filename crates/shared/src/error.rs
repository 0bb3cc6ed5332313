use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Malformed request, e.g. an argument the device function refuses.
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    DeviceUnreachable,
    RateLimited,
    Internal,
    Other,
}

impl ErrorCode {
    pub fn from_status(status: u16) -> Self {
        match status {
            400 => Self::BadRequest,
            401 => Self::Unauthorized,
            403 => Self::Forbidden,
            404 => Self::NotFound,
            408 | 502 | 504 => Self::DeviceUnreachable,
            429 => Self::RateLimited,
            500..=599 => Self::Internal,
            _ => Self::Other,
        }
    }
}

/// Error body returned by the cloud API, e.g.
/// `{"error":"invalid_token","error_description":"The access token provided is invalid."}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CloudErrorBody {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
    #[serde(default)]
    pub info: Option<String>,
}

impl CloudErrorBody {
    /// Most specific human readable text the body carries.
    pub fn description(&self) -> Option<&str> {
        self.error_description
            .as_deref()
            .or(self.info.as_deref())
            .or(self.error.as_deref())
            .filter(|text| !text.trim().is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn from_body(status: u16, body: &CloudErrorBody) -> Self {
        let message = body
            .description()
            .map(str::to_string)
            .unwrap_or_else(|| format!("request failed with HTTP status {status}"));
        Self::new(ErrorCode::from_status(status), message)
    }
}
