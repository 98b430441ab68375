//! Carrier/provider audio codec: mu-law <-> PCM16 and 8kHz <-> 16kHz
//! resampling, plus pacing-chunk splitting.
//!
//! The carrier speaks mu-law at 8kHz; capability providers speak linear
//! PCM16 at 16kHz. Everything crossing that boundary goes through
//! `telnyx_to_ai`/`ai_to_telnyx`.

use crate::error::{CoreError, CoreResult};
use rubato::{Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction};

/// Carrier sample rate (Hz).
pub const TELNYX_SAMPLE_RATE: u32 = 8_000;
/// Provider sample rate (Hz).
pub const AI_SAMPLE_RATE: u32 = 16_000;
/// Pacing chunk duration.
pub const CHUNK_DURATION_MS: u32 = 20;
/// mu-law bytes per 20ms chunk at 8kHz.
pub const SAMPLES_8K_20MS: usize = 160;
/// PCM16 samples per 20ms chunk at 16kHz.
pub const SAMPLES_16K_20MS: usize = 320;

const BIAS: i16 = 0x84;
const CLIP: i16 = 32635;

/// Decode a single mu-law byte to a linear PCM16 sample.
fn ulaw_decode_sample(u: u8) -> i16 {
    let u = !u;
    let sign = (u & 0x80) != 0;
    let exponent = (u >> 4) & 0x07;
    let mantissa = u & 0x0f;
    let mut sample = ((mantissa as i16) << 3) + BIAS;
    sample <<= exponent as i16;
    sample -= BIAS;
    if sign {
        -sample
    } else {
        sample
    }
}

/// Encode a linear PCM16 sample to mu-law.
fn ulaw_encode_sample(pcm: i16) -> u8 {
    let sign: u8 = if pcm < 0 { 0x80 } else { 0 };
    let mut sample = if pcm < 0 { -pcm } else { pcm };
    if sample > CLIP {
        sample = CLIP;
    }
    sample += BIAS;

    let mut exponent: u8 = 7;
    for exp in 0..8u8 {
        if sample < (1i16 << (exp + 7)) {
            exponent = exp;
            break;
        }
    }
    let mantissa = ((sample >> (exponent + 3)) & 0x0f) as u8;
    let byte = sign | (exponent << 4) | mantissa;
    !byte
}

/// Decode a mu-law byte buffer to linear PCM16 little-endian bytes.
pub fn ulaw_to_pcm(ulaw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(ulaw.len() * 2);
    for &b in ulaw {
        out.extend_from_slice(&ulaw_decode_sample(b).to_le_bytes());
    }
    out
}

/// Encode linear PCM16 little-endian bytes to mu-law.
pub fn pcm_to_ulaw(pcm: &[u8]) -> CoreResult<Vec<u8>> {
    if pcm.len() % 2 != 0 {
        return Err(CoreError::codec("pcm buffer is not sample-aligned"));
    }
    let mut out = Vec::with_capacity(pcm.len() / 2);
    for chunk in pcm.chunks_exact(2) {
        let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
        out.push(ulaw_encode_sample(sample));
    }
    Ok(out)
}

fn pcm16_to_f32(pcm: &[u8]) -> CoreResult<Vec<f32>> {
    if pcm.len() % 2 != 0 {
        return Err(CoreError::codec("pcm buffer is not sample-aligned"));
    }
    Ok(pcm
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]) as f32 / 32768.0)
        .collect())
}

fn f32_to_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        let clamped = (s * 32767.0).clamp(-32768.0, 32767.0) as i16;
        out.extend_from_slice(&clamped.to_le_bytes());
    }
    out
}

fn gcd(a: u32, b: u32) -> u32 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

/// Resample linear PCM16 bytes from `from_rate` to `to_rate` using a
/// GCD-reduced polyphase ratio, mirroring the carrier-side `resample_poly`
/// up/down factoring.
pub fn resample(pcm: &[u8], from_rate: u32, to_rate: u32) -> CoreResult<Vec<u8>> {
    if from_rate == to_rate {
        return Ok(pcm.to_vec());
    }
    let samples = pcm16_to_f32(pcm)?;
    if samples.is_empty() {
        return Ok(Vec::new());
    }

    let g = gcd(from_rate, to_rate);
    let up = (to_rate / g) as usize;
    let down = (from_rate / g) as usize;

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let ratio = to_rate as f64 / from_rate as f64;
    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, samples.len(), 1)
        .map_err(|e| CoreError::codec(format!("resampler init failed (up={up}, down={down}): {e}")))?;

    let waves_in = vec![samples];
    let waves_out = resampler
        .process(&waves_in, None)
        .map_err(|e| CoreError::codec(format!("resample failed: {e}")))?;

    Ok(f32_to_pcm16(&waves_out[0]))
}

/// Carrier mu-law 8kHz -> provider PCM16 16kHz.
pub fn telnyx_to_ai(ulaw8k: &[u8]) -> CoreResult<Vec<u8>> {
    let pcm8k = ulaw_to_pcm(ulaw8k);
    resample(&pcm8k, TELNYX_SAMPLE_RATE, AI_SAMPLE_RATE)
}

/// Provider PCM16 16kHz -> carrier mu-law 8kHz.
pub fn ai_to_telnyx(pcm16_16k: &[u8]) -> CoreResult<Vec<u8>> {
    let pcm8k = resample(pcm16_16k, AI_SAMPLE_RATE, TELNYX_SAMPLE_RATE)?;
    pcm_to_ulaw(&pcm8k)
}

/// Split a PCM byte buffer into fixed-size chunks suitable for paced
/// dispatch, padding the final partial chunk with silence.
pub fn chunk_for_pacing(pcm: &[u8], bytes_per_chunk: usize) -> Vec<Vec<u8>> {
    if bytes_per_chunk == 0 || pcm.is_empty() {
        return Vec::new();
    }
    let mut chunks: Vec<Vec<u8>> = pcm.chunks(bytes_per_chunk).map(|c| c.to_vec()).collect();
    if let Some(last) = chunks.last_mut() {
        if last.len() < bytes_per_chunk {
            last.resize(bytes_per_chunk, 0);
        }
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ulaw_roundtrip_is_close() {
        let pcm: Vec<i16> = (0..800).map(|i| ((i as f32 * 0.1).sin() * 10000.0) as i16).collect();
        let pcm_bytes: Vec<u8> = pcm.iter().flat_map(|s| s.to_le_bytes()).collect();
        let encoded = pcm_to_ulaw(&pcm_bytes).unwrap();
        let decoded = ulaw_to_pcm(&encoded);
        let decoded_samples: Vec<i16> = decoded
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();

        let mean_abs_err: f64 = pcm
            .iter()
            .zip(decoded_samples.iter())
            .map(|(a, b)| (*a as f64 - *b as f64).abs())
            .sum::<f64>()
            / pcm.len() as f64;
        assert!(mean_abs_err < 300.0, "mean abs error too high: {mean_abs_err}");
    }

    #[test]
    fn chunk_for_pacing_pads_final_chunk() {
        let data = vec![1u8; 250];
        let chunks = chunk_for_pacing(&data, 160);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), 160);
        assert_eq!(chunks[1].len(), 160);
        assert_eq!(chunks[1][90], 0);
    }

    #[test]
    fn pcm_to_ulaw_rejects_misaligned_buffer() {
        let data = vec![1u8, 2, 3];
        assert!(pcm_to_ulaw(&data).is_err());
    }

    #[test]
    fn telnyx_roundtrip_preserves_length() {
        let ulaw: Vec<u8> = (0..SAMPLES_8K_20MS as u8).collect();
        let pcm16k = telnyx_to_ai(&ulaw).unwrap();
        let back = ai_to_telnyx(&pcm16k).unwrap();
        // resampling rounding may shift length by a sample or two
        assert!((back.len() as i64 - ulaw.len() as i64).abs() <= 4);
    }
}
