pub const DEFAULT_MODEL: &str = "models/gemini-2.5-flash-native-audio-preview-09-2025";
pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";
pub const DEFAULT_VOICE: &str = "Kore";
pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are an expert Forex trading analyst.";
pub const DEFAULT_BLOCK_SIZE: usize = 4096;
pub const DEFAULT_VOLUME_GAIN: f32 = 50.0;
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 64;

pub(super) const MIN_BLOCK_SIZE: usize = 256;
pub(super) const MAX_BLOCK_SIZE: usize = 16_384;
pub(super) const MAX_VOLUME_GAIN: f32 = 1_000.0;
pub(super) const MIN_OUTBOUND_CAPACITY: usize = 4;
pub(super) const MAX_OUTBOUND_CAPACITY: usize = 1024;
pub(super) const MAX_VOICE_NAME_LEN: usize = 64;
pub(super) const MAX_SYSTEM_INSTRUCTION_BYTES: usize = 32 * 1024;
// Device names are echoed to the terminal and the log; keep them single-line.
pub(super) const FORBIDDEN_DEVICE_CHARS: &[char] = &['\n', '\r', '\0'];
