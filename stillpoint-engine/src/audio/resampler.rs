//! Audio resampling using rubato
//!
//! Converts decoded audio to the standard 44.1 kHz rate. Tracks and effects
//! are normalized exactly once, at load time, so the one-shot path is the
//! only one the engine needs.

use crate::audio::types::STANDARD_SAMPLE_RATE;
use rubato::{FastFixedIn, PolynomialDegree, Resampler as RubatoResampler};
use stillpoint_common::{EngineError, Result};
use tracing::debug;

/// One-shot resample of interleaved audio to the standard rate
///
/// # Arguments
/// - `input`: interleaved samples at `input_rate`
/// - `input_rate`: source sample rate in Hz
/// - `channels`: channel count of `input`
///
/// Returns interleaved samples at 44.1 kHz. Input already at the standard
/// rate is returned as a copy.
pub fn resample_to_standard(input: &[f32], input_rate: u32, channels: u16) -> Result<Vec<f32>> {
    if input_rate == STANDARD_SAMPLE_RATE {
        return Ok(input.to_vec());
    }
    if input.is_empty() {
        return Ok(Vec::new());
    }

    debug!(
        "Resampling {} frames: {}Hz -> {}Hz ({} channels)",
        input.len() / channels as usize,
        input_rate,
        STANDARD_SAMPLE_RATE,
        channels
    );

    let planar_input = deinterleave(input, channels);
    let input_frames = planar_input[0].len();

    let mut resampler = FastFixedIn::<f32>::new(
        f64::from(STANDARD_SAMPLE_RATE) / f64::from(input_rate),
        1.0,
        PolynomialDegree::Septic,
        input_frames,
        channels as usize,
    )
    .map_err(|e| EngineError::InvalidFormat {
        reason: format!(
            "failed to create resampler {}Hz -> {}Hz: {}",
            input_rate, STANDARD_SAMPLE_RATE, e
        ),
    })?;

    let planar_output = resampler
        .process(&planar_input, None)
        .map_err(|e| EngineError::InvalidFormat {
            reason: format!("resampling failed: {e}"),
        })?;

    Ok(interleave(planar_output))
}

/// Convert interleaved samples to planar format for rubato
///
/// Input:  [L, R, L, R, ...]
/// Output: [[L, L, ...], [R, R, ...]]
fn deinterleave(samples: &[f32], channels: u16) -> Vec<Vec<f32>> {
    let num_channels = channels.max(1) as usize;
    let num_frames = samples.len() / num_channels;

    let mut planar = vec![Vec::with_capacity(num_frames); num_channels];
    for frame_idx in 0..num_frames {
        for (ch_idx, channel) in planar.iter_mut().enumerate() {
            channel.push(samples[frame_idx * num_channels + ch_idx]);
        }
    }
    planar
}

/// Convert planar samples back to interleaved format
fn interleave(planar: Vec<Vec<f32>>) -> Vec<f32> {
    if planar.is_empty() {
        return Vec::new();
    }

    let num_channels = planar.len();
    let num_frames = planar[0].len();
    let mut interleaved = Vec::with_capacity(num_frames * num_channels);

    for frame_idx in 0..num_frames {
        for channel in planar.iter().take(num_channels) {
            interleaved.push(channel[frame_idx]);
        }
    }
    interleaved
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deinterleave_interleave_round_trip() {
        let interleaved = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let planar = deinterleave(&interleaved, 2);
        assert_eq!(planar[0], vec![1.0, 3.0, 5.0]);
        assert_eq!(planar[1], vec![2.0, 4.0, 6.0]);
        assert_eq!(interleave(planar), interleaved);
    }

    #[test]
    fn test_same_rate_is_copy() {
        let input = vec![0.1, 0.2, 0.3, 0.4];
        let output = resample_to_standard(&input, STANDARD_SAMPLE_RATE, 2).unwrap();
        assert_eq!(output, input);
    }

    #[test]
    fn test_resample_48k_frame_count() {
        let input_rate = 48_000;
        let frames = 4800;
        let mut input = Vec::with_capacity(frames * 2);
        for i in 0..frames {
            let t = i as f32 / input_rate as f32;
            let sample = (2.0 * std::f32::consts::PI * 440.0 * t).sin() * 0.5;
            input.push(sample);
            input.push(sample);
        }

        let output = resample_to_standard(&input, input_rate, 2).unwrap();
        let output_frames = output.len() / 2;
        let expected = (frames as f64 * 44_100.0 / f64::from(input_rate)) as usize;
        assert!(
            output_frames.abs_diff(expected) <= 16,
            "expected ~{expected} frames, got {output_frames}"
        );
    }

    #[test]
    fn test_empty_input() {
        let output = resample_to_standard(&[], 48_000, 2).unwrap();
        assert!(output.is_empty());
    }
}
