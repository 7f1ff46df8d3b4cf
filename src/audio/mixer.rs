use super::device::ScheduledVoice;
use crossbeam_channel::{Receiver, TryRecvError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Sums scheduled voices into the device callback buffer.
///
/// The device clock is the number of frames rendered so far, so a voice
/// scheduled at `start_at` seconds begins on frame `start_at * rate`. Voices
/// whose start frame already passed begin immediately.
pub(crate) struct Mixer {
    device_rate: u32,
    channels: usize,
    frames_rendered: Arc<AtomicU64>,
    incoming: Receiver<ScheduledVoice>,
    active: Vec<ActiveVoice>,
}

struct ActiveVoice {
    voice: ScheduledVoice,
    start_frame: u64,
    /// Voice samples advanced per device frame.
    step: f64,
}

impl ActiveVoice {
    fn sample_at(&self, frame: u64) -> Option<f32> {
        let samples = &self.voice.samples;
        if frame < self.start_frame {
            return Some(0.0);
        }
        let pos = (frame - self.start_frame) as f64 * self.step;
        let idx = pos.floor() as usize;
        let a = *samples.get(idx)?;
        let b = samples.get(idx + 1).copied().unwrap_or(a);
        let frac = (pos - idx as f64) as f32;
        Some(a + (b - a) * frac)
    }
}

impl Mixer {
    pub(crate) fn new(
        device_rate: u32,
        channels: usize,
        frames_rendered: Arc<AtomicU64>,
        incoming: Receiver<ScheduledVoice>,
    ) -> Self {
        Self {
            device_rate: device_rate.max(1),
            channels: channels.max(1),
            frames_rendered,
            incoming,
            active: Vec::new(),
        }
    }

    #[cfg(test)]
    pub(crate) fn active_len(&self) -> usize {
        self.active.len()
    }

    /// Fill one interleaved buffer. Returns false once the scheduling side
    /// has hung up and nothing is left to play.
    pub(crate) fn render(&mut self, out: &mut [f32]) -> bool {
        let base = self.frames_rendered.load(Ordering::Acquire);
        let connected = self.accept_pending(base);
        self.active.retain(|active| !active.voice.cancel.is_cancelled());

        out.fill(0.0);
        let frames = out.len() / self.channels;
        let mut done = Vec::new();
        for (slot, active) in self.active.iter().enumerate() {
            let mut exhausted = false;
            for (i, frame) in out.chunks_mut(self.channels).take(frames).enumerate() {
                match active.sample_at(base + i as u64) {
                    Some(value) => frame.iter_mut().for_each(|s| *s += value),
                    None => {
                        exhausted = true;
                        break;
                    }
                }
            }
            if exhausted {
                done.push(slot);
            }
        }
        for sample in out.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }

        for slot in done.into_iter().rev() {
            let active = self.active.swap_remove(slot);
            let _ = active.voice.finished.try_send(active.voice.id);
        }
        self.frames_rendered
            .fetch_add(frames as u64, Ordering::AcqRel);
        connected || !self.active.is_empty()
    }

    fn accept_pending(&mut self, base: u64) -> bool {
        loop {
            match self.incoming.try_recv() {
                Ok(voice) => {
                    if voice.cancel.is_cancelled() {
                        continue;
                    }
                    if voice.samples.is_empty() {
                        let _ = voice.finished.try_send(voice.id);
                        continue;
                    }
                    let requested = (voice.start_at.max(0.0) * f64::from(self.device_rate)).round();
                    let step = f64::from(voice.sample_rate) / f64::from(self.device_rate);
                    self.active.push(ActiveVoice {
                        start_frame: (requested as u64).max(base),
                        step,
                        voice,
                    });
                }
                Err(TryRecvError::Empty) => return true,
                Err(TryRecvError::Disconnected) => return false,
            }
        }
    }
}

/// Seconds elapsed on a frame-counting clock.
pub(crate) fn clock_seconds(frames_rendered: &AtomicU64, device_rate: u32) -> f64 {
    frames_rendered.load(Ordering::Acquire) as f64 / f64::from(device_rate.max(1))
}
