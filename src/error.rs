//! Session-level failures reported alongside the `Error` connection state.
//!
//! Block-level problems (one capture frame, one inbound chunk) never become a
//! `SessionError`; they are logged and dropped where they happen.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Microphone missing, busy, or access denied.
    #[error("microphone unavailable: {0}")]
    MicrophoneUnavailable(String),

    #[error("audio output unavailable: {0}")]
    OutputUnavailable(String),

    /// Handshake, auth, or setup failure while opening the live stream.
    #[error("failed to open live stream: {0}")]
    TransportOpen(String),

    /// The stream failed after it was established.
    #[error("live stream failed: {0}")]
    TransportRuntime(String),

    #[error("a session is already connecting or connected")]
    SessionBusy,

    #[error("failed to start session worker: {0}")]
    Worker(String),
}

impl SessionError {
    pub fn label(&self) -> &'static str {
        match self {
            SessionError::MicrophoneUnavailable(_) => "microphone_unavailable",
            SessionError::OutputUnavailable(_) => "output_unavailable",
            SessionError::TransportOpen(_) => "transport_open",
            SessionError::TransportRuntime(_) => "transport_runtime",
            SessionError::SessionBusy => "session_busy",
            SessionError::Worker(_) => "worker",
        }
    }

    /// Permission-style failures need user action before reconnecting.
    pub fn needs_user_action(&self) -> bool {
        matches!(self, SessionError::MicrophoneUnavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_detail() {
        let err = SessionError::TransportOpen("401 Unauthorized".to_string());
        assert!(err.to_string().contains("401 Unauthorized"));
        assert_eq!(err.label(), "transport_open");
    }

    #[test]
    fn only_microphone_errors_need_user_action() {
        assert!(SessionError::MicrophoneUnavailable("denied".into()).needs_user_action());
        assert!(!SessionError::TransportRuntime("reset".into()).needs_user_action());
    }
}
