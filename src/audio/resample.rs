//! Streaming sample-rate conversion for the capture path.
//!
//! The resampler keeps its phase and filter history across blocks, so the
//! long-run output rate is exactly the target rate even when a block length
//! is not a multiple of the conversion ratio (4096 samples at 48 kHz is
//! 1365⅓ samples at 16 kHz).

#[cfg(feature = "high-quality-audio")]
use crate::log_debug;
use anyhow::{bail, Result};
#[cfg(feature = "high-quality-audio")]
use rubato::{InterpolationParameters, InterpolationType, Resampler as _, SincFixedIn, WindowFunction};
use std::f32::consts::PI;
#[cfg(feature = "high-quality-audio")]
use std::sync::atomic::{AtomicBool, Ordering};

pub(crate) const MIN_DEVICE_RATE: u32 = 2_000;
pub(crate) const MAX_DEVICE_RATE: u32 = 1_600_000;
const MAX_DOWNSAMPLING_TAPS: usize = 129;

#[cfg(feature = "high-quality-audio")]
static SINC_WARNING_SHOWN: AtomicBool = AtomicBool::new(false);

/// Block-oriented converter from a device rate to a fixed target rate.
pub struct Resampler {
    from_rate: u32,
    to_rate: u32,
    engine: Engine,
}

enum Engine {
    Passthrough,
    Linear(LinearStream),
    #[cfg(feature = "high-quality-audio")]
    Sinc(SincStream),
}

impl Resampler {
    /// Build a linear resampler (with an anti-alias FIR when decimating).
    pub fn linear(from_rate: u32, to_rate: u32) -> Result<Self> {
        validate_rates(from_rate, to_rate)?;
        let engine = if from_rate == to_rate {
            Engine::Passthrough
        } else {
            Engine::Linear(LinearStream::new(from_rate, to_rate))
        };
        Ok(Self {
            from_rate,
            to_rate,
            engine,
        })
    }

    /// Best available resampler for fixed-size blocks of `block_size` samples.
    pub fn for_blocks(from_rate: u32, to_rate: u32, block_size: usize) -> Result<Self> {
        #[cfg(feature = "high-quality-audio")]
        {
            validate_rates(from_rate, to_rate)?;
            if from_rate != to_rate {
                match SincStream::new(from_rate, to_rate, block_size) {
                    Ok(sinc) => {
                        return Ok(Self {
                            from_rate,
                            to_rate,
                            engine: Engine::Sinc(sinc),
                        })
                    }
                    Err(err) => warn_sinc_fallback(&err),
                }
            }
        }
        #[cfg(not(feature = "high-quality-audio"))]
        let _ = block_size;
        Self::linear(from_rate, to_rate)
    }

    pub fn from_rate(&self) -> u32 {
        self.from_rate
    }

    pub fn to_rate(&self) -> u32 {
        self.to_rate
    }

    /// Convert one block. Never fails; a sinc failure degrades to linear.
    pub fn process(&mut self, block: &[f32]) -> Vec<f32> {
        match &mut self.engine {
            Engine::Passthrough => block.to_vec(),
            Engine::Linear(linear) => linear.process(block),
            #[cfg(feature = "high-quality-audio")]
            Engine::Sinc(sinc) => match sinc.process(block) {
                Ok(output) => output,
                Err(err) => {
                    warn_sinc_fallback(&err);
                    let mut linear = LinearStream::new(self.from_rate, self.to_rate);
                    let output = linear.process(block);
                    self.engine = Engine::Linear(linear);
                    output
                }
            },
        }
    }

    /// Forget phase and filter history. Capture calls this when a block
    /// follows a muted gap.
    pub fn reset(&mut self) {
        match &mut self.engine {
            Engine::Passthrough => {}
            Engine::Linear(linear) => *linear = LinearStream::new(self.from_rate, self.to_rate),
            #[cfg(feature = "high-quality-audio")]
            Engine::Sinc(sinc) => sinc.reset(),
        }
    }
}

fn validate_rates(from_rate: u32, to_rate: u32) -> Result<()> {
    for rate in [from_rate, to_rate] {
        if !(MIN_DEVICE_RATE..=MAX_DEVICE_RATE).contains(&rate) {
            bail!("unsupported sample rate {rate}Hz for resampling");
        }
    }
    Ok(())
}

#[cfg(feature = "high-quality-audio")]
fn warn_sinc_fallback(err: &anyhow::Error) {
    if !SINC_WARNING_SHOWN.swap(true, Ordering::AcqRel) {
        tracing::warn!(error = %err, "sinc resampler unavailable; using linear path");
        log_debug(&format!(
            "high-quality resampler failed ({err:#}); falling back to linear path"
        ));
    }
}

/// Linear interpolation with a carried fractional read position.
pub(crate) struct LinearStream {
    /// Source samples advanced per output sample.
    step: f64,
    /// Next read position relative to the start of the next block; `-1.0`
    /// refers to the last sample of the previous block.
    pos: f64,
    prev: f32,
    fir: Option<FirStream>,
}

impl LinearStream {
    pub(crate) fn new(from_rate: u32, to_rate: u32) -> Self {
        let fir = (from_rate > to_rate).then(|| {
            let taps = downsampling_tap_count(from_rate, to_rate);
            let cutoff = (to_rate as f32 * 0.5 / from_rate as f32).min(0.499);
            FirStream::new(design_low_pass(cutoff, taps))
        });
        Self {
            step: f64::from(from_rate) / f64::from(to_rate),
            pos: 0.0,
            prev: 0.0,
            fir,
        }
    }

    pub(crate) fn process(&mut self, block: &[f32]) -> Vec<f32> {
        if block.is_empty() {
            return Vec::new();
        }
        let filtered;
        let input = match self.fir.as_mut() {
            Some(fir) => {
                filtered = fir.process(block);
                filtered.as_slice()
            }
            None => block,
        };

        let len = input.len();
        let last = (len - 1) as f64;
        let mut output = Vec::with_capacity((len as f64 / self.step).ceil() as usize + 1);
        while self.pos < last {
            let base = self.pos.floor();
            let frac = (self.pos - base) as f32;
            let idx = base as isize;
            let a = if idx < 0 {
                self.prev
            } else {
                input[idx as usize]
            };
            let b = input[(idx + 1) as usize];
            output.push(a + (b - a) * frac);
            self.pos += self.step;
        }
        self.pos -= len as f64;
        self.prev = input[len - 1];
        output
    }
}

/// Causal FIR that carries `taps - 1` samples of history between blocks.
pub(crate) struct FirStream {
    coeffs: Vec<f32>,
    history: Vec<f32>,
}

impl FirStream {
    pub(crate) fn new(coeffs: Vec<f32>) -> Self {
        let history = vec![0.0; coeffs.len().saturating_sub(1)];
        Self { coeffs, history }
    }

    pub(crate) fn process(&mut self, block: &[f32]) -> Vec<f32> {
        let taps = self.coeffs.len();
        if taps <= 1 {
            return block.to_vec();
        }
        let mut extended = Vec::with_capacity(self.history.len() + block.len());
        extended.extend_from_slice(&self.history);
        extended.extend_from_slice(block);

        let output = (0..block.len())
            .map(|n| {
                self.coeffs
                    .iter()
                    .zip(extended[n..n + taps].iter().rev())
                    .map(|(coeff, sample)| coeff * sample)
                    .sum()
            })
            .collect();

        let keep = taps - 1;
        self.history.clear();
        self.history
            .extend_from_slice(&extended[extended.len() - keep..]);
        output
    }
}

/// Pick a tap count based on the decimation ratio so the FIR stays short for
/// near-equal rates and grows when 48 kHz collapses into 16 kHz.
pub(crate) fn downsampling_tap_count(from_rate: u32, to_rate: u32) -> usize {
    let decimation_ratio = from_rate as f32 / to_rate as f32;
    let mut taps = (decimation_ratio * 4.0).ceil().max(11.0) as usize;
    if taps % 2 == 0 {
        taps += 1;
    }
    taps.min(MAX_DOWNSAMPLING_TAPS)
}

/// Normalized Hamming-windowed sinc taps.
pub(crate) fn design_low_pass(normalized_cutoff: f32, taps: usize) -> Vec<f32> {
    let mut coeffs = Vec::with_capacity(taps);
    let m = taps.saturating_sub(1) as f32;

    for n in 0..taps {
        let centered = n as f32 - m / 2.0;
        let x = 2.0 * PI * normalized_cutoff * centered;
        let sinc = if centered == 0.0 {
            2.0 * normalized_cutoff
        } else {
            (2.0 * normalized_cutoff * x.sin()) / x
        };
        let window = if taps <= 1 {
            1.0
        } else {
            0.54 - 0.46 * ((2.0 * PI * n as f32) / m).cos()
        };
        coeffs.push(sinc * window);
    }

    let sum: f32 = coeffs.iter().sum();
    if sum != 0.0 {
        for coeff in coeffs.iter_mut() {
            *coeff /= sum;
        }
    }
    coeffs
}

/// Persistent rubato sinc resampler fed with exactly `block_size` frames per call.
#[cfg(feature = "high-quality-audio")]
pub(crate) struct SincStream {
    inner: SincFixedIn<f32>,
    ratio: f64,
    block_size: usize,
}

#[cfg(feature = "high-quality-audio")]
impl SincStream {
    pub(crate) fn new(from_rate: u32, to_rate: u32, block_size: usize) -> Result<Self> {
        if block_size == 0 {
            bail!("sinc resampler needs a non-zero block size");
        }
        let ratio = f64::from(to_rate) / f64::from(from_rate);
        Ok(Self {
            inner: build_sinc(ratio, block_size)?,
            ratio,
            block_size,
        })
    }

    pub(crate) fn process(&mut self, block: &[f32]) -> Result<Vec<f32>> {
        if block.len() != self.block_size {
            bail!(
                "sinc resampler expects {} frames, got {}",
                self.block_size,
                block.len()
            );
        }
        let mut produced = self
            .inner
            .process(std::slice::from_ref(&block), None)
            .map_err(|e| anyhow::anyhow!("resampler process failed: {e:?}"))?;
        Ok(produced.pop().unwrap_or_default())
    }

    pub(crate) fn reset(&mut self) {
        match build_sinc(self.ratio, self.block_size) {
            Ok(inner) => self.inner = inner,
            Err(err) => log_debug(&format!("sinc resampler reset failed: {err:#}")),
        }
    }
}

#[cfg(feature = "high-quality-audio")]
fn build_sinc(ratio: f64, block_size: usize) -> Result<SincFixedIn<f32>> {
    let params = InterpolationParameters {
        sinc_len: 64,
        f_cutoff: 0.90,
        interpolation: InterpolationType::Cubic,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };
    //                   ratio, drift, params, chunk_size, channels
    SincFixedIn::<f32>::new(ratio, 1.0, params, block_size, 1)
        .map_err(|e| anyhow::anyhow!("failed to construct sinc resampler: {e:?}"))
}
