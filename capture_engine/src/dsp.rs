// src/dsp.rs

use std::f32::consts::PI;

/// Split an interleaved block into per-channel vectors, appending to what is
/// already there. Trailing samples that don't make a whole frame are dropped.
pub fn append_interleaved_to_planar(
    interleaved: &[f32],
    planar: &mut [Vec<f32>],
    channels: usize,
) {
    if channels == 0 {
        return;
    }
    for row in interleaved.chunks_exact(channels) {
        for (ch, &s) in row.iter().enumerate() {
            if let Some(dst) = planar.get_mut(ch) {
                dst.push(s);
            }
        }
    }
}

pub fn planar_len(planar: &[Vec<f32>]) -> usize {
    planar.iter().map(|v| v.len()).min().unwrap_or(0)
}

pub fn interleave(planar: &[Vec<f32>]) -> Vec<f32> {
    let channels = planar.len();
    if channels == 0 {
        return Vec::new();
    }
    let frames = planar_len(planar);
    let mut out = vec![0.0f32; frames * channels];
    for f in 0..frames {
        for ch in 0..channels {
            out[f * channels + ch] = planar[ch][f];
        }
    }
    out
}

/// Periodic Hann window. Two copies offset by n/2 sum to exactly 1.0.
pub fn hann_window(n: usize) -> Vec<f32> {
    (0..n)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / n as f32).cos()))
        .collect()
}

/// One-pole smoothing coefficient for a time constant in milliseconds.
#[inline]
pub fn time_to_coeff(time_ms: f32, sample_rate: f32) -> f32 {
    const EPSILON: f32 = 1e-9;
    (-(1.0 / (time_ms.max(0.01) * 0.001 * sample_rate + EPSILON))).exp()
}

#[inline]
pub fn db_to_gain(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

#[inline]
pub fn frames_for_secs(sample_rate: u32, secs: f32) -> usize {
    (secs.max(0.0) as f64 * sample_rate as f64).round() as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn planar_round_trip_drops_partial_frame() {
        let mut planar = vec![Vec::new(), Vec::new()];
        append_interleaved_to_planar(&[0.1, 0.2, 0.3, 0.4, 0.5], &mut planar, 2);
        assert_eq!(planar[0], vec![0.1, 0.3]);
        assert_eq!(planar[1], vec![0.2, 0.4]);
        assert_eq!(interleave(&planar), vec![0.1, 0.2, 0.3, 0.4]);
    }

    #[test]
    fn hann_overlap_adds_to_one() {
        let n = 64;
        let w = hann_window(n);
        for i in 0..n / 2 {
            assert!((w[i] + w[i + n / 2] - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn longer_time_constant_gives_larger_coeff() {
        let fast = time_to_coeff(1.0, 48_000.0);
        let slow = time_to_coeff(100.0, 48_000.0);
        assert!(fast < slow);
        assert!(slow < 1.0 && fast > 0.0);
    }
}
