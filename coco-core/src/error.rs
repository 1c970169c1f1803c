use thiserror::Error;

/// Unified error type for Coco.
///
/// Each variant maps to exactly one bucket of the controller's error
/// taxonomy: client mistakes, startup misconfiguration, internal failure,
/// or a failed reply-check.
#[derive(Error, Debug)]
pub enum CocoError {
    #[error("invalid usage: {0}")]
    InvalidUsage(String),

    #[error("config error: {0}")]
    ConfigError(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("check failed: {0}")]
    CheckFailure(String),

    #[error("unknown endpoint: {0}")]
    UnknownEndpoint(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl CocoError {
    /// Map to the HTTP status code the frontend should return.
    pub fn status_code(&self) -> u16 {
        match self {
            CocoError::InvalidUsage(_) => 400,
            // A name that resolves to nothing during execution is an
            // internal failure of the worker's dispatch, not a client error.
            CocoError::UnknownEndpoint(_) => 500,
            CocoError::ConfigError(_) => 500,
            CocoError::CheckFailure(_) => 503,
            CocoError::Internal(_) => 500,
            CocoError::Io(_) => 500,
            CocoError::Serde(_) => 400,
        }
    }

    /// JSON error body in the shape the frontend always returns:
    /// `{"reply": <message>, "status": <code>}`.
    pub fn to_json_body(&self) -> Vec<u8> {
        serde_json::json!({
            "reply": self.to_string(),
            "status": self.status_code(),
        })
        .to_string()
        .into_bytes()
    }
}
