//! The live voice session engine.
//!
//! [`SessionController`] owns the microphone, the speaker, and the remote
//! stream for one session at a time. Capture blocks flow through
//! [`CaptureEncoder`] onto the stream; inbound audio flows through
//! [`PlaybackScheduler`] onto the speaker; everything else is reported to a
//! [`SessionObserver`].

mod capture;
mod controller;
mod events;
mod playback;

use crate::config::{DEFAULT_SYSTEM_INSTRUCTION, DEFAULT_VOICE};

pub use capture::{CaptureEncoder, CaptureStats};
pub use controller::SessionController;
pub use events::{NullObserver, SessionEvent, SessionObserver};
pub use playback::{PlaybackBuffer, PlaybackScheduler};

/// Connection lifecycle reported to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl ConnectionState {
    pub fn label(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Error => "error",
        }
    }

    /// Connecting or connected; a new `connect` is rejected in these states.
    pub fn is_active(self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Connected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Per-connection parameters, fixed at `connect` time.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionConfig {
    persona_voice_id: String,
    system_instruction: String,
    credential_token: String,
}

impl SessionConfig {
    /// Blank voice or instruction fall back to the built-in persona.
    pub fn new(
        persona_voice_id: impl Into<String>,
        system_instruction: impl Into<String>,
        credential_token: impl Into<String>,
    ) -> Self {
        let mut persona_voice_id = persona_voice_id.into();
        if persona_voice_id.trim().is_empty() {
            persona_voice_id = DEFAULT_VOICE.to_string();
        }
        let mut system_instruction = system_instruction.into();
        if system_instruction.trim().is_empty() {
            system_instruction = DEFAULT_SYSTEM_INSTRUCTION.to_string();
        }
        Self {
            persona_voice_id,
            system_instruction,
            credential_token: credential_token.into(),
        }
    }

    pub fn persona_voice_id(&self) -> &str {
        &self.persona_voice_id
    }

    pub fn system_instruction(&self) -> &str {
        &self.system_instruction
    }

    pub fn credential_token(&self) -> &str {
        &self.credential_token
    }
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("persona_voice_id", &self.persona_voice_id)
            .field("system_instruction_len", &self.system_instruction.len())
            .finish_non_exhaustive()
    }
}
