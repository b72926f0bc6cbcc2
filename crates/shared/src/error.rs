use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Unauthorized,
    Forbidden,
    NotFound,
    Validation,
    Conflict,
    RateLimited,
    Internal,
}

impl ErrorCode {
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => Self::Unauthorized,
            403 => Self::Forbidden,
            404 => Self::NotFound,
            400 | 422 => Self::Validation,
            409 => Self::Conflict,
            429 => Self::RateLimited,
            _ => Self::Internal,
        }
    }
}

/// Error body returned by the ballot API.
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

    /// Builds an error from a non-2xx response whose body may or may not be JSON.
    pub fn from_response(status: u16, body: &str) -> Self {
        serde_json::from_str::<ApiError>(body).unwrap_or_else(|_| {
            let message = if body.trim().is_empty() {
                format!("server returned status {status}")
            } else {
                body.trim().to_string()
            };
            Self::new(ErrorCode::from_status(status), message)
        })
    }
}

#[cfg(test)]
#[path = "tests/error_tests.rs"]
mod tests;
