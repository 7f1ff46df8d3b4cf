use super::defaults::{
    FORBIDDEN_DEVICE_CHARS, MAX_BLOCK_SIZE, MAX_OUTBOUND_CAPACITY, MAX_SYSTEM_INSTRUCTION_BYTES,
    MAX_VOICE_NAME_LEN, MAX_VOLUME_GAIN, MIN_BLOCK_SIZE, MIN_OUTBOUND_CAPACITY,
};
use super::{AppConfig, EngineConfig};
use crate::session::SessionConfig;
use anyhow::{anyhow, bail, Result};

impl AppConfig {
    /// Check CLI values and normalize free-text fields.
    pub fn validate(&mut self) -> Result<()> {
        if !(MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&self.block_size) {
            bail!(
                "--block-size must be between {MIN_BLOCK_SIZE} and {MAX_BLOCK_SIZE} samples, got {}",
                self.block_size
            );
        }
        if !self.volume_gain.is_finite() || !(0.0..=MAX_VOLUME_GAIN).contains(&self.volume_gain) {
            bail!(
                "--volume-gain must be between 0 and {MAX_VOLUME_GAIN}, got {}",
                self.volume_gain
            );
        }
        if !(MIN_OUTBOUND_CAPACITY..=MAX_OUTBOUND_CAPACITY).contains(&self.outbound_capacity) {
            bail!(
                "--outbound-capacity must be between {MIN_OUTBOUND_CAPACITY} and {MAX_OUTBOUND_CAPACITY}, got {}",
                self.outbound_capacity
            );
        }

        self.model = self.model.trim().to_string();
        if self.model.is_empty() {
            bail!("--model must not be empty");
        }
        if self.model.chars().any(char::is_whitespace) {
            bail!("--model must not contain whitespace");
        }

        self.endpoint = self.endpoint.trim().to_string();
        if !(self.endpoint.starts_with("wss://") || self.endpoint.starts_with("ws://")) {
            bail!("--endpoint must be a ws:// or wss:// URL");
        }

        self.voice = sanitize_voice(&self.voice)?;

        if self.system_instruction.len() > MAX_SYSTEM_INSTRUCTION_BYTES {
            bail!("--system-instruction exceeds {MAX_SYSTEM_INSTRUCTION_BYTES} bytes");
        }

        if let Some(key) = &mut self.api_key {
            *key = key.trim().to_string();
            if key.is_empty() {
                bail!("--api-key must not be empty when provided");
            }
        }

        for (flag, device) in [
            ("--input-device", &self.input_device),
            ("--output-device", &self.output_device),
        ] {
            if let Some(name) = device {
                if name.len() > 256 || name.chars().any(|ch| FORBIDDEN_DEVICE_CHARS.contains(&ch)) {
                    bail!("{flag} must be <=256 characters on a single line");
                }
            }
        }

        Ok(())
    }

    /// The credential is only needed once a session is opened.
    pub fn require_api_key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| anyhow!("no API key: pass --api-key or set GEMINI_API_KEY"))
    }

    /// Snapshot the engine tunables for the session controller.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            model: self.model.clone(),
            endpoint: self.endpoint.clone(),
            block_size: self.block_size,
            volume_gain: self.volume_gain,
            outbound_capacity: self.outbound_capacity,
            transcribe_input: self.transcribe_input,
            input_device: self.input_device.clone(),
            output_device: self.output_device.clone(),
        }
    }

    /// Build the per-connection parameters. Requires a credential.
    pub fn session_config(&self) -> Result<SessionConfig> {
        let token = self.require_api_key()?;
        Ok(SessionConfig::new(
            self.voice.clone(),
            self.system_instruction.clone(),
            token.to_string(),
        ))
    }
}

pub(super) fn sanitize_voice(voice: &str) -> Result<String> {
    let trimmed = voice.trim();
    if trimmed.is_empty() {
        bail!("--voice must not be empty");
    }
    if trimmed.len() > MAX_VOICE_NAME_LEN {
        bail!("--voice must be at most {MAX_VOICE_NAME_LEN} characters");
    }
    if !trimmed
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
    {
        bail!("--voice must contain only ASCII letters, digits, '-' or '_'");
    }
    Ok(trimmed.to_string())
}
