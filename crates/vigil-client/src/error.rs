use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClientError>;

/// Client-side error taxonomy. Transport errors are retried by the
/// subscription layer; request errors surface once to the caller; parse
/// failures of individual stream frames never reach here (they are dropped
/// at the transport).
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("{message}")]
    Request { status: u16, message: String },

    #[error("invalid response payload: {0}")]
    Parse(#[from] serde_json::Error),

    /// An error frame received mid-stream on the chat channel.
    #[error("{0}")]
    Stream(String),
}

impl ClientError {
    /// Builds the surfaced message for a non-2xx response: a structured
    /// `error` or `message` field when the body parses as JSON, else the raw
    /// body text, else `HTTP <status>`.
    pub fn from_error_body(status: u16, body: &str) -> Self {
        let structured = serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|v| {
                v.get("error")
                    .or_else(|| v.get("message"))
                    .and_then(|m| m.as_str().map(str::to_string))
            });
        let message = match structured {
            Some(msg) if !msg.is_empty() => msg,
            _ if !body.trim().is_empty() => body.trim().to_string(),
            _ => format!("HTTP {status}"),
        };
        Self::Request { status, message }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Request { status, .. } => Some(*status),
            _ => None,
        }
    }
}
