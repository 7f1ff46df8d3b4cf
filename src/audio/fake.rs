//! In-memory audio backend for exercising the session engine without hardware.

use super::device::{AudioBackend, BlockCallback, InputPort, OutputPort, ScheduledVoice};
use crate::lock::lock_or_recover;
use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Default)]
pub(crate) struct FakeAudio {
    pub(crate) deny_input: AtomicBool,
    pub(crate) deny_output: AtomicBool,
    pub(crate) input_opened: AtomicUsize,
    pub(crate) input_closed: AtomicUsize,
    pub(crate) input_started: AtomicUsize,
    pub(crate) input_stopped: AtomicUsize,
    pub(crate) output_opened: AtomicUsize,
    pub(crate) output_closed: AtomicUsize,
    callback: Mutex<Option<BlockCallback>>,
    clock: Mutex<f64>,
    scheduled: Mutex<Vec<ScheduledVoice>>,
}

impl FakeAudio {
    pub(crate) fn set_now(&self, now: f64) {
        *lock_or_recover(&self.clock, "fake clock") = now;
    }

    pub(crate) fn now(&self) -> f64 {
        *lock_or_recover(&self.clock, "fake clock")
    }

    /// Deliver one mic block if capture is running. Returns false otherwise.
    pub(crate) fn push_block(&self, block: &[f32]) -> bool {
        let mut guard = lock_or_recover(&self.callback, "fake callback");
        match guard.as_mut() {
            Some(callback) => {
                callback(block);
                true
            }
            None => false,
        }
    }

    pub(crate) fn capture_running(&self) -> bool {
        lock_or_recover(&self.callback, "fake callback").is_some()
    }

    /// `(start_at, samples)` for every voice handed to the device.
    pub(crate) fn scheduled(&self) -> Vec<(f64, usize)> {
        lock_or_recover(&self.scheduled, "fake schedule")
            .iter()
            .map(|voice| (voice.start_at, voice.samples.len()))
            .collect()
    }

    /// Pretend the device rendered every uncancelled voice to completion.
    pub(crate) fn finish_all(&self) {
        let voices = std::mem::take(&mut *lock_or_recover(&self.scheduled, "fake schedule"));
        for voice in &voices {
            if !voice.cancel.is_cancelled() {
                let _ = voice.finished.try_send(voice.id);
            }
        }
        lock_or_recover(&self.scheduled, "fake schedule").extend(voices);
    }

    /// Cancellation flag of every scheduled voice, in scheduling order.
    pub(crate) fn cancelled(&self) -> Vec<bool> {
        lock_or_recover(&self.scheduled, "fake schedule")
            .iter()
            .map(|voice| voice.cancel.is_cancelled())
            .collect()
    }

    pub(crate) fn all_cancelled(&self) -> bool {
        lock_or_recover(&self.scheduled, "fake schedule")
            .iter()
            .all(|voice| voice.cancel.is_cancelled())
    }

    pub(crate) fn devices_released(&self) -> bool {
        self.input_opened.load(Ordering::SeqCst) == self.input_closed.load(Ordering::SeqCst)
            && self.output_opened.load(Ordering::SeqCst)
                == self.output_closed.load(Ordering::SeqCst)
            && !self.capture_running()
    }
}

#[derive(Clone)]
pub(crate) struct FakeBackend {
    pub(crate) audio: Arc<FakeAudio>,
    pub(crate) input_rate: u32,
    pub(crate) output_rate: u32,
}

impl FakeBackend {
    pub(crate) fn new(input_rate: u32, output_rate: u32) -> Self {
        Self {
            audio: Arc::new(FakeAudio::default()),
            input_rate,
            output_rate,
        }
    }
}

impl AudioBackend for FakeBackend {
    fn open_input(&self, _preferred: Option<&str>, _block_size: usize) -> Result<Box<dyn InputPort>> {
        if self.audio.deny_input.load(Ordering::SeqCst) {
            return Err(anyhow!("permission denied"));
        }
        self.audio.input_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeInput {
            audio: Arc::clone(&self.audio),
            rate: self.input_rate,
            closed: false,
        }))
    }

    fn open_output(&self, _preferred: Option<&str>) -> Result<Box<dyn OutputPort>> {
        if self.audio.deny_output.load(Ordering::SeqCst) {
            return Err(anyhow!("no output device"));
        }
        self.audio.output_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeOutput {
            audio: Arc::clone(&self.audio),
            rate: self.output_rate,
            closed: false,
        }))
    }
}

pub(crate) struct FakeInput {
    audio: Arc<FakeAudio>,
    rate: u32,
    closed: bool,
}

impl InputPort for FakeInput {
    fn sample_rate(&self) -> u32 {
        self.rate
    }

    fn device_name(&self) -> &str {
        "fake mic"
    }

    fn start(&mut self, on_block: BlockCallback) -> Result<()> {
        self.audio.input_started.fetch_add(1, Ordering::SeqCst);
        *lock_or_recover(&self.audio.callback, "fake callback") = Some(on_block);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if lock_or_recover(&self.audio.callback, "fake callback")
            .take()
            .is_some()
        {
            self.audio.input_stopped.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            lock_or_recover(&self.audio.callback, "fake callback").take();
            self.audio.input_closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

pub(crate) struct FakeOutput {
    audio: Arc<FakeAudio>,
    rate: u32,
    closed: bool,
}

impl OutputPort for FakeOutput {
    fn sample_rate(&self) -> u32 {
        self.rate
    }

    fn device_name(&self) -> &str {
        "fake speaker"
    }

    fn now(&self) -> f64 {
        self.audio.now()
    }

    fn schedule(&mut self, voice: ScheduledVoice) -> Result<()> {
        if self.closed {
            return Err(anyhow!("output device is closed"));
        }
        lock_or_recover(&self.audio.scheduled, "fake schedule").push(voice);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.audio.output_closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
