#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
    #[error("unable to start span: {0}")]
    SpanStart(String),
    #[error("span name formatter failed: {0}")]
    NameFormatter(String),
    #[error("invalid channel pattern: {0}")]
    InvalidPattern(String),
    #[error("unable to restore context token: {0}")]
    ContextRestore(String),
}

impl From<String> for BridgeError {
    fn from(s: String) -> Self {
        BridgeError::Internal(s)
    }
}

impl From<&str> for BridgeError {
    fn from(s: &str) -> Self {
        BridgeError::Internal(s.to_string())
    }
}
