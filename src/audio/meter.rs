use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Lock-free holder for the most recent level, shared with the audio thread.
#[derive(Clone, Debug)]
pub struct LiveMeter {
    level_bits: Arc<AtomicU32>,
}

impl LiveMeter {
    pub fn new() -> Self {
        Self {
            level_bits: Arc::new(AtomicU32::new(0.0f32.to_bits())),
        }
    }

    pub fn set(&self, level: f32) {
        self.level_bits.store(level.to_bits(), Ordering::Relaxed);
    }

    pub fn level(&self) -> f32 {
        f32::from_bits(self.level_bits.load(Ordering::Relaxed))
    }
}

impl Default for LiveMeter {
    fn default() -> Self {
        Self::new()
    }
}

/// Root-mean-square of a block. Empty blocks are silent.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let energy: f32 = samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32;
    energy.sqrt()
}

/// Converts raw RMS into the 0..=1 level shown by meters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VolumeMeter {
    gain: f32,
}

impl VolumeMeter {
    pub fn new(gain: f32) -> Self {
        Self {
            gain: if gain.is_finite() { gain.max(0.0) } else { 0.0 },
        }
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    /// `rms * gain`, capped at full scale.
    pub fn level(&self, samples: &[f32]) -> f32 {
        (rms(samples) * self.gain).min(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_meter_defaults_to_silence() {
        let meter = LiveMeter::new();
        assert_eq!(meter.level(), 0.0);
    }

    #[test]
    fn live_meter_clones_share_level() {
        let meter = LiveMeter::new();
        let reader = meter.clone();
        meter.set(0.25);
        assert_eq!(reader.level(), 0.25);
    }

    #[test]
    fn rms_of_constant_block() {
        assert!((rms(&[0.5; 64]) - 0.5).abs() < 1e-6);
        assert!((rms(&[0.5, -0.5]) - 0.5).abs() < 1e-6);
        assert_eq!(rms(&[]), 0.0);
    }

    #[test]
    fn level_applies_gain_and_caps() {
        let meter = VolumeMeter::new(50.0);
        assert!((meter.level(&[0.01; 16]) - 0.5).abs() < 1e-4);
        assert_eq!(meter.level(&[0.5; 16]), 1.0);
        assert_eq!(VolumeMeter::new(-3.0).gain(), 0.0);
        assert_eq!(VolumeMeter::new(f32::NAN).level(&[1.0]), 0.0);
    }
}
