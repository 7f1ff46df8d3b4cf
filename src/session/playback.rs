use crate::audio::{OutputPort, ScheduledVoice};
use crate::cancel::CancelToken;
use crate::codec::DecodedAudio;
use anyhow::{Context, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::collections::HashMap;
use std::sync::Arc;

/// A scheduled inbound chunk as seen by the session.
#[derive(Debug, Clone)]
pub struct PlaybackBuffer {
    pub id: u64,
    pub start_at: f64,
    pub duration: f64,
    cancel: CancelToken,
}

impl PlaybackBuffer {
    pub fn end_at(&self) -> f64 {
        self.start_at + self.duration
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Gapless scheduler over an [`OutputPort`].
///
/// Every buffer starts at `max(next_start, now)` and pushes `next_start`
/// forward by its duration. All buffers scheduled since the last interrupt
/// share one cancel token, so an interrupt stops the whole group at once and
/// installs a fresh token for what follows.
pub struct PlaybackScheduler {
    output: Box<dyn OutputPort>,
    next_start: f64,
    in_flight: HashMap<u64, PlaybackBuffer>,
    group: CancelToken,
    next_id: u64,
    finished_tx: Sender<u64>,
    finished_rx: Receiver<u64>,
    closed: bool,
}

impl PlaybackScheduler {
    pub fn new(output: Box<dyn OutputPort>) -> Self {
        let (finished_tx, finished_rx) = unbounded();
        let next_start = output.now();
        Self {
            output,
            next_start,
            in_flight: HashMap::new(),
            group: CancelToken::new(),
            next_id: 0,
            finished_tx,
            finished_rx,
            closed: false,
        }
    }

    /// Where the next chunk would start if it arrived now.
    pub fn next_start_time(&self) -> f64 {
        self.next_start.max(self.output.now())
    }

    pub fn schedule(&mut self, audio: DecodedAudio) -> Result<PlaybackBuffer> {
        self.reap_finished();
        let start_at = self.next_start_time();
        let duration = audio.duration();
        let id = self.next_id;
        self.next_id += 1;

        let buffer = PlaybackBuffer {
            id,
            start_at,
            duration,
            cancel: self.group.clone(),
        };
        self.output
            .schedule(ScheduledVoice {
                id,
                samples: Arc::from(audio.samples),
                sample_rate: audio.sample_rate,
                start_at,
                cancel: self.group.clone(),
                finished: self.finished_tx.clone(),
            })
            .context("failed to schedule playback buffer")?;

        self.in_flight.insert(id, buffer.clone());
        self.next_start = start_at + duration;
        Ok(buffer)
    }

    /// Barge-in: cancel every in-flight buffer and restart the cursor at now.
    /// Returns how many buffers were cancelled.
    pub fn interrupt(&mut self) -> usize {
        self.reap_finished();
        self.group.cancel();
        self.group = CancelToken::new();
        let cancelled = self.in_flight.len();
        self.in_flight.clear();
        // Completions already queued belong to the cancelled group.
        while self.finished_rx.try_recv().is_ok() {}
        self.next_start = self.output.now();
        cancelled
    }

    /// Buffers scheduled since the last interrupt that have not finished.
    pub fn in_flight(&mut self) -> Vec<PlaybackBuffer> {
        self.reap_finished();
        let mut buffers: Vec<_> = self.in_flight.values().cloned().collect();
        buffers.sort_by_key(|buffer| buffer.id);
        buffers
    }

    pub fn in_flight_len(&mut self) -> usize {
        self.reap_finished();
        self.in_flight.len()
    }

    /// Cancel everything and release the output device. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        self.interrupt();
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.output.close().context("failed to close output device")
    }

    fn reap_finished(&mut self) {
        for id in self.finished_rx.try_iter() {
            self.in_flight.remove(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::fake::FakeBackend;
    use crate::audio::AudioBackend;

    fn chunk(seconds: f64) -> DecodedAudio {
        DecodedAudio {
            samples: vec![0.1; (seconds * 24_000.0) as usize],
            sample_rate: 24_000,
        }
    }

    fn scheduler() -> (FakeBackend, PlaybackScheduler) {
        let backend = FakeBackend::new(48_000, 48_000);
        let output = backend.open_output(None).expect("output");
        (backend, PlaybackScheduler::new(output))
    }

    #[test]
    fn consecutive_chunks_are_gapless() {
        let (backend, mut playback) = scheduler();
        backend.audio.set_now(1.0);
        let durations = [0.5, 0.25, 0.125, 0.5];
        let buffers: Vec<_> = durations
            .iter()
            .map(|d| playback.schedule(chunk(*d)).expect("schedule"))
            .collect();
        let mut expected = buffers[0].start_at;
        assert_eq!(expected, 1.0);
        for (buffer, duration) in buffers.iter().zip(durations) {
            assert!((buffer.start_at - expected).abs() < 1e-9);
            expected += duration;
        }
        assert_eq!(playback.in_flight_len(), 4);
    }

    #[test]
    fn late_chunk_starts_at_now() {
        let (backend, mut playback) = scheduler();
        let first = playback.schedule(chunk(0.5)).expect("schedule");
        backend.audio.set_now(2.0);
        let second = playback.schedule(chunk(0.5)).expect("schedule");
        assert_eq!(first.start_at, 0.0);
        assert_eq!(second.start_at, 2.0);
    }

    #[test]
    fn natural_completion_leaves_the_in_flight_set() {
        let (backend, mut playback) = scheduler();
        playback.schedule(chunk(0.25)).expect("schedule");
        playback.schedule(chunk(0.25)).expect("schedule");
        backend.audio.finish_all();
        assert!(playback.in_flight().is_empty());
    }

    #[test]
    fn interrupt_cancels_group_and_resets_cursor() {
        let (backend, mut playback) = scheduler();
        for _ in 0..3 {
            playback.schedule(chunk(0.5)).expect("schedule");
        }
        backend.audio.set_now(0.7);
        assert_eq!(playback.interrupt(), 3);
        assert!(playback.in_flight().is_empty());
        assert!(backend.audio.all_cancelled());
        assert_eq!(playback.next_start_time(), 0.7);

        let next = playback.schedule(chunk(0.5)).expect("schedule");
        assert_eq!(next.start_at, 0.7);
        assert!(!next.is_cancelled());
        assert_eq!(playback.in_flight_len(), 1);
    }

    #[test]
    fn cursor_never_moves_backward_without_interrupt() {
        let (backend, mut playback) = scheduler();
        backend.audio.set_now(0.0);
        let mut last_end = 0.0;
        for step in 0..10 {
            backend.audio.set_now(step as f64 * 0.1);
            let buffer = playback.schedule(chunk(0.2)).expect("schedule");
            assert!(buffer.start_at >= last_end - 1e-9);
            assert!(playback.next_start_time() >= backend.audio.now());
            last_end = buffer.end_at();
        }
    }

    #[test]
    fn close_is_idempotent_and_rejects_new_buffers() {
        let (backend, mut playback) = scheduler();
        playback.schedule(chunk(0.1)).expect("schedule");
        playback.close().expect("close");
        playback.close().expect("close again");
        assert_eq!(backend.audio.output_closed.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert!(playback.schedule(chunk(0.1)).is_err());
    }
}
