//! Host audio: microphone blocks in, scheduled voices out.
//!
//! Devices are reached through the `AudioBackend` seam. The CPAL backend owns
//! each stream on its own thread, re-chunks capture into fixed blocks, and
//! mixes scheduled playback buffers against a frame-counting clock.

mod cpal_backend;
mod device;
mod dispatch;
#[cfg(test)]
pub(crate) mod fake;
mod meter;
mod mixer;
mod resample;

pub use cpal_backend::{mic_permission_hint, CpalBackend, DeviceList};
pub use device::{AudioBackend, BlockCallback, InputPort, OutputPort, ScheduledVoice};
pub use meter::{rms, LiveMeter, VolumeMeter};
pub use resample::Resampler;
