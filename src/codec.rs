//! PCM16 little-endian framing with base64 wrapping.
//!
//! Outbound capture frames are 16 kHz mono; inbound model audio is 24 kHz mono
//! unless the MIME type carries a different `rate=` parameter.

use crate::protocol::Blob;
use anyhow::{anyhow, bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;

/// Rate the endpoint expects for realtime input.
pub const CAPTURE_RATE: u32 = 16_000;

/// Native rate of the endpoint's audio output.
pub const PLAYBACK_RATE: u32 = 24_000;

const PCM_MIME: &str = "audio/pcm";

pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("{PCM_MIME};rate={sample_rate}")
}

/// Quantize to signed 16-bit. Full scale is 32768 so `i16 / 32768.0` maps back exactly.
pub fn quantize(sample: f32) -> i16 {
    let scaled = (sample.clamp(-1.0, 1.0) * 32_768.0).round();
    scaled.clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

pub fn dequantize(sample: i16) -> f32 {
    sample as f32 / 32_768.0
}

pub fn encode_pcm16le(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        bytes.extend_from_slice(&quantize(*sample).to_le_bytes());
    }
    bytes
}

pub fn decode_pcm16le(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 2 != 0 {
        bail!("PCM16 payload has odd length {}", bytes.len());
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| dequantize(i16::from_le_bytes([pair[0], pair[1]])))
        .collect())
}

/// Packs resampled capture blocks into wire blobs.
#[derive(Debug, Clone)]
pub struct FrameEncoder {
    mime_type: String,
}

impl FrameEncoder {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            mime_type: pcm_mime_type(sample_rate),
        }
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn encode(&self, samples: &[f32]) -> Blob {
        Blob {
            mime_type: self.mime_type.clone(),
            data: BASE64_STANDARD.encode(encode_pcm16le(samples)),
        }
    }
}

impl Default for FrameEncoder {
    fn default() -> Self {
        Self::new(CAPTURE_RATE)
    }
}

/// A decoded inbound chunk, ready for scheduling.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    /// Playback length in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / f64::from(self.sample_rate)
    }
}

/// Unpacks inbound audio blobs.
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    default_rate: u32,
}

impl FrameDecoder {
    pub fn new(default_rate: u32) -> Self {
        Self { default_rate }
    }

    pub fn decode(&self, blob: &Blob) -> Result<DecodedAudio> {
        let sample_rate = parse_pcm_rate(&blob.mime_type)?.unwrap_or(self.default_rate);
        let bytes = BASE64_STANDARD
            .decode(blob.data.trim())
            .context("invalid base64 audio payload")?;
        if bytes.is_empty() {
            bail!("empty audio payload");
        }
        let samples = decode_pcm16le(&bytes)?;
        Ok(DecodedAudio {
            samples,
            sample_rate,
        })
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(PLAYBACK_RATE)
    }
}

/// Returns the `rate=` parameter of a PCM MIME type, `None` when absent.
fn parse_pcm_rate(mime_type: &str) -> Result<Option<u32>> {
    let mut params = mime_type.split(';').map(str::trim);
    let essence = params.next().unwrap_or_default();
    if !essence.eq_ignore_ascii_case(PCM_MIME) && !essence.eq_ignore_ascii_case("audio/l16") {
        bail!("unsupported audio MIME type '{mime_type}'");
    }
    for param in params {
        if let Some(value) = param.strip_prefix("rate=") {
            let rate: u32 = value
                .parse()
                .map_err(|_| anyhow!("invalid sample rate in MIME type '{mime_type}'"))?;
            if rate == 0 {
                bail!("zero sample rate in MIME type '{mime_type}'");
            }
            return Ok(Some(rate));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm16_round_trip_is_bit_exact() {
        let original: Vec<i16> = vec![0, 1, -1, 1234, -1234, i16::MAX, i16::MIN, 42, -32_767];
        let floats: Vec<f32> = original.iter().copied().map(dequantize).collect();
        let blob = FrameEncoder::new(CAPTURE_RATE).encode(&floats);
        assert_eq!(blob.mime_type, "audio/pcm;rate=16000");

        // Reference decode straight from the wire bytes.
        let bytes = BASE64_STANDARD.decode(&blob.data).unwrap();
        let decoded: Vec<i16> = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        assert_eq!(decoded, original);

        let audio = FrameDecoder::default().decode(&blob).unwrap();
        assert_eq!(audio.sample_rate, CAPTURE_RATE);
        assert_eq!(audio.samples, floats);
    }

    #[test]
    fn quantize_clamps_out_of_range() {
        assert_eq!(quantize(2.0), i16::MAX);
        assert_eq!(quantize(-2.0), i16::MIN);
        assert_eq!(quantize(0.0), 0);
    }

    #[test]
    fn encode_is_little_endian() {
        let bytes = encode_pcm16le(&[dequantize(0x0102)]);
        assert_eq!(bytes, vec![0x02, 0x01]);
    }

    #[test]
    fn decoder_defaults_to_playback_rate() {
        let blob = Blob {
            mime_type: "audio/pcm".to_string(),
            data: BASE64_STANDARD.encode([0u8, 0, 0, 0]),
        };
        let audio = FrameDecoder::default().decode(&blob).unwrap();
        assert_eq!(audio.sample_rate, PLAYBACK_RATE);
        assert_eq!(audio.samples.len(), 2);
    }

    #[test]
    fn decoder_rejects_malformed_payloads() {
        let decoder = FrameDecoder::default();
        let odd = Blob {
            mime_type: pcm_mime_type(24_000),
            data: BASE64_STANDARD.encode([1u8, 2, 3]),
        };
        assert!(decoder.decode(&odd).is_err());

        let garbage = Blob {
            mime_type: pcm_mime_type(24_000),
            data: "@@not base64@@".to_string(),
        };
        assert!(decoder.decode(&garbage).is_err());

        let opus = Blob {
            mime_type: "audio/opus".to_string(),
            data: BASE64_STANDARD.encode([0u8, 0]),
        };
        assert!(decoder.decode(&opus).is_err());

        let empty = Blob {
            mime_type: pcm_mime_type(24_000),
            data: String::new(),
        };
        assert!(decoder.decode(&empty).is_err());
    }

    #[test]
    fn duration_follows_sample_rate() {
        let audio = DecodedAudio {
            samples: vec![0.0; 12_000],
            sample_rate: 24_000,
        };
        assert!((audio.duration() - 0.5).abs() < 1e-12);
    }
}
