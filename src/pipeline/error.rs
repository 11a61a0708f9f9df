//! Error taxonomy for the refresh pipeline

#[derive(Debug)]
pub enum RefreshError {
    /// Missing or invalid setting (e.g. no layer URL)
    Configuration(String),
    /// Remote service denied access; never retried
    Auth(String),
    /// Network failure, timeout or retryable HTTP status
    Transport(String),
    /// Response could not be decoded as a query page
    Protocol(String),
    /// Snapshot store failure
    Storage(String),
    /// Cancellation signal observed at a suspension point
    Cancelled,
}

impl RefreshError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RefreshError::Cancelled)
    }

    /// Short label used in log lines
    pub fn kind(&self) -> &'static str {
        match self {
            RefreshError::Configuration(_) => "configuration",
            RefreshError::Auth(_) => "auth",
            RefreshError::Transport(_) => "transport",
            RefreshError::Protocol(_) => "protocol",
            RefreshError::Storage(_) => "storage",
            RefreshError::Cancelled => "cancelled",
        }
    }
}

impl From<rusqlite::Error> for RefreshError {
    fn from(err: rusqlite::Error) -> Self {
        RefreshError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for RefreshError {
    fn from(err: serde_json::Error) -> Self {
        RefreshError::Protocol(err.to_string())
    }
}

impl std::fmt::Display for RefreshError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RefreshError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            RefreshError::Auth(msg) => write!(f, "Access denied by feature service: {}", msg),
            RefreshError::Transport(msg) => write!(f, "Transport error: {}", msg),
            RefreshError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            RefreshError::Storage(msg) => write!(f, "Storage error: {}", msg),
            RefreshError::Cancelled => write!(f, "Refresh cancelled"),
        }
    }
}

impl std::error::Error for RefreshError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_errors_are_protocol() {
        let err: RefreshError = serde_json::from_str::<serde_json::Value>("<html>")
            .unwrap_err()
            .into();
        assert!(matches!(err, RefreshError::Protocol(_)));
        assert_eq!(err.kind(), "protocol");
        assert!(!err.is_cancelled());
        assert!(RefreshError::Cancelled.is_cancelled());
    }
}
