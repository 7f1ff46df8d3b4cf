//! Device seams between the session engine and the host audio stack.
//!
//! The real implementation lives in `cpal_backend`; tests drive the same
//! traits through an in-memory backend.

use crate::cancel::CancelToken;
use anyhow::Result;
use crossbeam_channel::Sender;
use std::sync::Arc;

/// Receives fixed-size mono blocks at the input port's native rate.
pub type BlockCallback = Box<dyn FnMut(&[f32]) + Send + 'static>;

/// An opened microphone. Blocks flow only between `start` and `stop`.
pub trait InputPort: Send {
    fn sample_rate(&self) -> u32;
    fn device_name(&self) -> &str;
    fn start(&mut self, on_block: BlockCallback) -> Result<()>;
    fn stop(&mut self) -> Result<()>;
    /// Release the device. Must tolerate being called after `stop` or twice.
    fn close(&mut self) -> Result<()>;
}

/// An opened speaker with a monotonic clock in seconds.
pub trait OutputPort: Send {
    fn sample_rate(&self) -> u32;
    fn device_name(&self) -> &str;
    /// Current playback position of the device clock.
    fn now(&self) -> f64;
    fn schedule(&mut self, voice: ScheduledVoice) -> Result<()>;
    fn close(&mut self) -> Result<()>;
}

/// Host audio factory. Shared across session attempts.
pub trait AudioBackend: Send + Sync {
    fn open_input(&self, preferred: Option<&str>, block_size: usize) -> Result<Box<dyn InputPort>>;
    fn open_output(&self, preferred: Option<&str>) -> Result<Box<dyn OutputPort>>;
}

/// A decoded buffer handed to the output device for playback at `start_at`.
///
/// The device sends `id` on `finished` after the last sample has been
/// rendered. Cancelled voices are dropped silently.
pub struct ScheduledVoice {
    pub id: u64,
    pub samples: Arc<[f32]>,
    pub sample_rate: u32,
    pub start_at: f64,
    pub cancel: CancelToken,
    pub finished: Sender<u64>,
}

impl ScheduledVoice {
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / f64::from(self.sample_rate)
    }
}

impl std::fmt::Debug for ScheduledVoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduledVoice")
            .field("id", &self.id)
            .field("samples", &self.samples.len())
            .field("sample_rate", &self.sample_rate)
            .field("start_at", &self.start_at)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}
