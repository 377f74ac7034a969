// src/transform/resample.rs

use anyhow::Result;
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
    calculate_cutoff,
};

use crate::buffer::PcmBuffer;
use crate::error::EngineError;

const CHUNK_SIZE: usize = 1024;

fn build_resampler(src_rate: u32, dst_rate: u32, channels: usize) -> Result<SincFixedIn<f32>> {
    let ratio = dst_rate as f64 / src_rate as f64;
    let sinc_len = 256usize;
    let window = WindowFunction::BlackmanHarris2;
    let f_cutoff = calculate_cutoff(sinc_len, window);
    let params = SincInterpolationParameters {
        sinc_len,
        f_cutoff,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 128,
        window,
    };
    Ok(SincFixedIn::<f32>::new(ratio, 2.0, params, CHUNK_SIZE, channels)?)
}

fn append_planar(dst: &mut [Vec<f32>], src: Vec<Vec<f32>>) {
    for (d, s) in dst.iter_mut().zip(src) {
        d.extend_from_slice(&s);
    }
}

/// Band-limited sample rate conversion. The result has
/// `round(frames * dst / src)` frames and its first frame lines up with the
/// first input frame. The chunk-sized tail that the resampler still holds is
/// pushed out with zeros before the result is cut to length.
pub fn resample(buffer: &PcmBuffer, target_rate: u32) -> Result<PcmBuffer> {
    if target_rate == 0 {
        return Err(EngineError::InvalidParameter("target sample rate must be > 0".into()).into());
    }
    let src_rate = buffer.sample_rate();
    let channels = buffer.channel_count();
    if src_rate == target_rate {
        return Ok(buffer.clone());
    }
    if buffer.is_empty() {
        return PcmBuffer::silent(channels, 0, target_rate);
    }

    let frames = buffer.frames();
    let ratio = target_rate as f64 / src_rate as f64;
    let expected = (frames as f64 * ratio).round() as usize;

    let mut resampler = build_resampler(src_rate, target_rate, channels)?;
    let mut out = vec![Vec::with_capacity(expected + CHUNK_SIZE); channels];
    let input = buffer.channels();

    let mut pos = 0;
    loop {
        let need = resampler.input_frames_next();
        if frames - pos < need {
            break;
        }
        let block: Vec<&[f32]> = input.iter().map(|c| &c[pos..pos + need]).collect();
        append_planar(&mut out, resampler.process(&block, None)?);
        pos += need;
    }
    if pos < frames {
        let block: Vec<&[f32]> = input.iter().map(|c| &c[pos..]).collect();
        append_planar(&mut out, resampler.process_partial(Some(block.as_slice()), None)?);
    }

    let mut flushes = 0;
    while out[0].len() < expected && flushes < 64 {
        append_planar(&mut out, resampler.process_partial::<Vec<f32>>(None, None)?);
        flushes += 1;
    }

    for ch in out.iter_mut() {
        ch.resize(expected, 0.0);
    }
    log::debug!("resampled {frames} frames {src_rate} Hz -> {expected} frames {target_rate} Hz");
    PcmBuffer::new(out, target_rate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::dominant_frequency;
    use std::f32::consts::PI;

    fn sine(freq: f32, frames: usize, sr: u32) -> Vec<f32> {
        (0..frames).map(|i| 0.8 * (2.0 * PI * freq * i as f32 / sr as f32).sin()).collect()
    }

    #[test]
    fn halving_rate_keeps_pitch() {
        let b = PcmBuffer::new(vec![sine(1000.0, 44_100, 44_100)], 44_100).unwrap();
        let r = resample(&b, 22_050).unwrap();
        assert_eq!(r.sample_rate(), 22_050);
        assert_eq!(r.frames(), 22_050);
        let f = dominant_frequency(r.channel(0).unwrap(), 22_050);
        assert!((f - 1000.0).abs() < 15.0, "dominant {f}");
    }

    #[test]
    fn output_is_aligned_and_continuous() {
        let b = PcmBuffer::new(vec![sine(220.0, 4800, 48_000); 2], 48_000).unwrap();
        let r = resample(&b, 44_100).unwrap();
        assert_eq!(r.frames(), 4410);
        let out = r.channel(0).unwrap();
        // Starts near zero like the input sine and has no jumps.
        assert!(out[0].abs() < 0.05);
        for w in out[..4000].windows(2) {
            assert!((w[1] - w[0]).abs() < 0.05);
        }
    }

    #[test]
    fn output_tracks_input_without_time_shift() {
        let b = PcmBuffer::new(vec![sine(220.0, 4800, 48_000)], 48_000).unwrap();
        let r = resample(&b, 44_100).unwrap();
        let out = r.channel(0).unwrap();
        let ideal = sine(220.0, 4410, 44_100);
        // Away from the edges the result follows the ideal sine sample for sample.
        for i in 200..4000 {
            assert!((out[i] - ideal[i]).abs() < 0.03, "frame {i}: {} vs {}", out[i], ideal[i]);
        }
    }

    #[test]
    fn same_rate_and_zero_rate() {
        let b = PcmBuffer::new(vec![vec![0.1, 0.2]], 8000).unwrap();
        assert_eq!(resample(&b, 8000).unwrap(), b);
        assert!(resample(&b, 0).is_err());
    }
}
