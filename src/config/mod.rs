//! Command-line parsing and validation helpers.

mod defaults;
#[cfg(test)]
mod tests;
mod validation;

use clap::Parser;

pub use defaults::{
    DEFAULT_BLOCK_SIZE, DEFAULT_ENDPOINT, DEFAULT_MODEL, DEFAULT_OUTBOUND_CAPACITY,
    DEFAULT_SYSTEM_INSTRUCTION, DEFAULT_VOICE, DEFAULT_VOLUME_GAIN,
};

/// CLI options for the voicelink front end. Validated values flow into [`EngineConfig`].
#[derive(Debug, Parser, Clone)]
#[command(about = "VoiceLink live voice session", author, version)]
pub struct AppConfig {
    /// Credential for the live endpoint
    #[arg(long = "api-key", env = "GEMINI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Remote conversational model identifier
    #[arg(long, default_value = DEFAULT_MODEL)]
    pub model: String,

    /// Prebuilt persona voice
    #[arg(long, default_value = DEFAULT_VOICE)]
    pub voice: String,

    /// Behavioral prompt sent with the session setup
    #[arg(long = "system-instruction", default_value = DEFAULT_SYSTEM_INSTRUCTION)]
    pub system_instruction: String,

    /// WebSocket endpoint of the live service
    #[arg(long, env = "VOICELINK_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    pub endpoint: String,

    /// Preferred audio input device name
    #[arg(long = "input-device")]
    pub input_device: Option<String>,

    /// Preferred audio output device name
    #[arg(long = "output-device")]
    pub output_device: Option<String>,

    /// Print detected audio devices and exit
    #[arg(long = "list-devices", default_value_t = false)]
    pub list_devices: bool,

    /// Capture block size in device samples
    #[arg(long = "block-size", default_value_t = DEFAULT_BLOCK_SIZE)]
    pub block_size: usize,

    /// Multiplier applied to raw RMS before reporting volume
    #[arg(long = "volume-gain", default_value_t = DEFAULT_VOLUME_GAIN)]
    pub volume_gain: f32,

    /// Pending outbound frames before new frames are dropped
    #[arg(long = "outbound-capacity", default_value_t = DEFAULT_OUTBOUND_CAPACITY)]
    pub outbound_capacity: usize,

    /// Ask the endpoint to transcribe the user's speech too
    #[arg(long = "transcribe-input", default_value_t = false)]
    pub transcribe_input: bool,

    /// Start the session muted
    #[arg(long = "muted", default_value_t = false)]
    pub muted: bool,

    /// Enable file logging (debug)
    #[arg(long = "logs", env = "VOICELINK_LOGS", default_value_t = false)]
    pub logs: bool,

    /// Disable all file logging (overrides --logs and log env vars)
    #[arg(long = "no-logs", env = "VOICELINK_NO_LOGS", default_value_t = false)]
    pub no_logs: bool,

    /// Allow logging transcript and instruction text (debug log only)
    #[arg(
        long = "log-content",
        env = "VOICELINK_LOG_CONTENT",
        default_value_t = false
    )]
    pub log_content: bool,
}

/// Engine tunables that stay fixed for the lifetime of a controller.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub model: String,
    pub endpoint: String,
    pub block_size: usize,
    pub volume_gain: f32,
    pub outbound_capacity: usize,
    pub transcribe_input: bool,
    pub input_device: Option<String>,
    pub output_device: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            block_size: DEFAULT_BLOCK_SIZE,
            volume_gain: DEFAULT_VOLUME_GAIN,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            transcribe_input: false,
            input_device: None,
            output_device: None,
        }
    }
}
