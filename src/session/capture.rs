use super::events::SessionObserver;
use crate::audio::{LiveMeter, Resampler, VolumeMeter};
use crate::cancel::CancelToken;
use crate::codec::FrameEncoder;
use crate::log_debug;
use crate::transport::StreamWriter;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Counters for the capture path, readable while a session runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub blocks_processed: u64,
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub blocks_muted: u64,
}

#[derive(Debug, Default)]
pub(crate) struct CaptureCounters {
    blocks_processed: AtomicU64,
    frames_sent: AtomicU64,
    frames_dropped: AtomicU64,
    blocks_muted: AtomicU64,
}

impl CaptureCounters {
    pub(crate) fn snapshot(&self) -> CaptureStats {
        CaptureStats {
            blocks_processed: self.blocks_processed.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            blocks_muted: self.blocks_muted.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn reset(&self) {
        self.blocks_processed.store(0, Ordering::Relaxed);
        self.frames_sent.store(0, Ordering::Relaxed);
        self.frames_dropped.store(0, Ordering::Relaxed);
        self.blocks_muted.store(0, Ordering::Relaxed);
    }
}

/// Per-block microphone pipeline: meter, resample, encode, hand off.
///
/// Runs on the host audio callback thread. Nothing in `process_block`
/// blocks or panics; a frame that cannot be sent is counted and dropped.
pub struct CaptureEncoder {
    meter: VolumeMeter,
    resampler: Resampler,
    encoder: FrameEncoder,
    writer: StreamWriter,
    observer: Arc<dyn SessionObserver>,
    muted: Arc<AtomicBool>,
    session: CancelToken,
    input_level: LiveMeter,
    counters: Arc<CaptureCounters>,
    dropping: bool,
    was_muted: bool,
}

impl CaptureEncoder {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        meter: VolumeMeter,
        resampler: Resampler,
        writer: StreamWriter,
        observer: Arc<dyn SessionObserver>,
        muted: Arc<AtomicBool>,
        session: CancelToken,
        input_level: LiveMeter,
        counters: Arc<CaptureCounters>,
    ) -> Self {
        let encoder = FrameEncoder::new(resampler.to_rate());
        Self {
            meter,
            resampler,
            encoder,
            writer,
            observer,
            muted,
            session,
            input_level,
            counters,
            dropping: false,
            was_muted: false,
        }
    }

    pub fn process_block(&mut self, block: &[f32]) {
        if self.session.is_cancelled() {
            return;
        }
        self.counters.blocks_processed.fetch_add(1, Ordering::Relaxed);

        let muted = self.muted.load(Ordering::Acquire);
        let level = if muted { 0.0 } else { self.meter.level(block) };
        self.input_level.set(level);
        self.observer.on_volume_change(level);
        if muted {
            self.counters.blocks_muted.fetch_add(1, Ordering::Relaxed);
            self.was_muted = true;
            return;
        }
        if self.was_muted {
            // Filter history predates the muted gap.
            self.resampler.reset();
            self.was_muted = false;
        }

        let resampled = self.resampler.process(block);
        if resampled.is_empty() {
            return;
        }
        let frame = self.encoder.encode(&resampled);
        match self.writer.send_frame(frame) {
            Ok(()) => {
                self.counters.frames_sent.fetch_add(1, Ordering::Relaxed);
                if self.dropping {
                    self.dropping = false;
                    log_debug("capture frames flowing again");
                }
            }
            Err(err) => {
                self.counters.frames_dropped.fetch_add(1, Ordering::Relaxed);
                if !self.dropping {
                    self.dropping = true;
                    tracing::warn!(error = %err, "dropping capture frame");
                    log_debug(&format!("capture frame dropped: {err:#}"));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Blob, ClientMessage};
    use crate::session::NullObserver;
    use crate::transport::{Outbound, StreamHandle};
    use crossbeam_channel::{bounded, Receiver};

    fn encoder(muted: Arc<AtomicBool>) -> (CaptureEncoder, Receiver<Outbound>) {
        let (tx, rx) = bounded(16);
        let (_events_tx, events) = bounded(1);
        let handle = StreamHandle::new(tx, events);
        let encoder = CaptureEncoder::new(
            VolumeMeter::new(50.0),
            Resampler::linear(48_000, 16_000).expect("resampler"),
            handle.writer,
            Arc::new(NullObserver),
            muted,
            CancelToken::new(),
            LiveMeter::new(),
            Arc::new(CaptureCounters::default()),
        );
        (encoder, rx)
    }

    fn frames(rx: &Receiver<Outbound>) -> Vec<Blob> {
        rx.try_iter()
            .filter_map(|outbound| match outbound {
                Outbound::Message(ClientMessage::RealtimeInput(input)) => {
                    input.media_chunks.into_iter().next()
                }
                _ => None,
            })
            .collect()
    }

    fn ramp(len: usize) -> Vec<f32> {
        (0..len).map(|n| (n % 97) as f32 / 200.0 - 0.2).collect()
    }

    #[test]
    fn unmuted_block_starts_a_fresh_resampler_stream() {
        let muted = Arc::new(AtomicBool::new(false));
        let (mut encoder, rx) = encoder(Arc::clone(&muted));
        let block = ramp(4_000);

        encoder.process_block(&block);
        muted.store(true, Ordering::Release);
        encoder.process_block(&block);
        muted.store(false, Ordering::Release);
        encoder.process_block(&block);

        let sent = frames(&rx);
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], sent[1]);
        assert_eq!(encoder.counters.snapshot().blocks_muted, 1);
    }

    #[test]
    fn continuous_stream_carries_resampler_state() {
        let muted = Arc::new(AtomicBool::new(false));
        let (mut encoder, rx) = encoder(muted);
        let block = ramp(4_000);
        encoder.process_block(&block);
        encoder.process_block(&block);
        let sent = frames(&rx);
        assert_eq!(sent.len(), 2);
        assert_ne!(sent[0], sent[1]);
    }
}
