use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DebuggerError {
    #[error("No kernel connection attached to the debug session")]
    NoActiveConnection,

    #[error("No active debugger session")]
    NoActiveSession,

    #[error("Could not start the debugger: {0}")]
    Handshake(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Hash method ({0}) is not supported")]
    UnsupportedMethod(String),

    #[error("Request '{command}' failed: {message}")]
    RequestFailed { command: String, message: String },

    #[error("Kernel connection was replaced before the request was sent")]
    ConnectionReplaced,

    #[error("Kernel connection closed")]
    ConnectionClosed,

    #[error("Debug session has been disposed")]
    Disposed,

    #[error("Protocol error: {0}")]
    Protocol(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DebuggerError {
    /// Errors the service propagates instead of logging and absorbing.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DebuggerError::NoActiveConnection
                | DebuggerError::NoActiveSession
                | DebuggerError::Handshake(_)
                | DebuggerError::Configuration(_)
                | DebuggerError::UnsupportedMethod(_)
                | DebuggerError::Disposed
        )
    }
}

// Serialized as plain messages for JSON output
impl Serialize for DebuggerError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DebuggerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(DebuggerError::NoActiveSession.is_fatal());
        assert!(DebuggerError::Handshake("boom".into()).is_fatal());
        assert!(!DebuggerError::ConnectionClosed.is_fatal());
        assert!(!DebuggerError::RequestFailed {
            command: "next".into(),
            message: "not stopped".into()
        }
        .is_fatal());
    }

    #[test]
    fn test_handshake_message_is_verbatim() {
        let err = DebuggerError::Handshake("kernel busy".to_string());
        assert_eq!(err.to_string(), "Could not start the debugger: kernel busy");
        assert_eq!(
            serde_json::to_value(&err).unwrap(),
            serde_json::json!("Could not start the debugger: kernel busy")
        );
    }
}
