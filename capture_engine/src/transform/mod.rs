// src/transform/mod.rs
//
// Offline edits over a whole buffer. Every function returns a new buffer and
// leaves its input alone, except `bitcrush_in_place`.

pub mod resample;
pub mod stretch;

use anyhow::Result;

use crate::buffer::PcmBuffer;
use crate::dsp;

pub use crate::effects::equalizer::apply_eq;
pub use resample::resample;
pub use stretch::{StretchEvent, spawn_time_stretch, time_stretch};

pub const MIN_BIT_DEPTH: u32 = 1;
pub const MAX_BIT_DEPTH: u32 = 24;

fn map_samples(buffer: &PcmBuffer, f: impl Fn(f32) -> f32) -> PcmBuffer {
    let mut out = buffer.clone();
    for ch in out.channels_mut() {
        for s in ch.iter_mut() {
            *s = f(*s);
        }
    }
    out
}

/// Scale so the loudest sample sits at full scale. Silence comes back as-is.
pub fn normalize(buffer: &PcmBuffer) -> PcmBuffer {
    let peak = buffer.peak();
    if peak <= 0.0 {
        log::debug!("normalize: silent buffer, nothing to scale");
        return buffer.clone();
    }
    let scale = 1.0 / peak;
    map_samples(buffer, |s| s * scale)
}

pub fn reverse(buffer: &PcmBuffer) -> PcmBuffer {
    let mut out = buffer.clone();
    for ch in out.channels_mut() {
        ch.reverse();
    }
    out
}

/// Gain in dB; the result is clamped to [-1, 1].
pub fn apply_gain(buffer: &PcmBuffer, gain_db: f32) -> PcmBuffer {
    let gain = dsp::db_to_gain(gain_db.clamp(-96.0, 48.0));
    map_samples(buffer, |s| (s * gain).clamp(-1.0, 1.0))
}

/// Lo-fi sample-and-hold: every `factor` frames repeat the first one. The
/// frame count and nominal rate stay the same; aliasing is the point.
pub fn downsample(buffer: &PcmBuffer, factor: usize) -> PcmBuffer {
    let factor = factor.max(1);
    let mut out = buffer.clone();
    if factor == 1 {
        return out;
    }
    for ch in out.channels_mut() {
        for block in ch.chunks_mut(factor) {
            let held = block[0];
            block.fill(held);
        }
    }
    out
}

#[inline]
fn quantize(sample: f32, steps: f32) -> f32 {
    ((sample * steps).round() / steps).clamp(-1.0, 1.0)
}

fn quant_steps(bits: u32) -> f32 {
    let bits = bits.clamp(MIN_BIT_DEPTH, MAX_BIT_DEPTH);
    (1u32 << (bits - 1)) as f32
}

/// Quantize to `2^bits` levels. Idempotent for a fixed depth.
pub fn bitcrush(buffer: &PcmBuffer, bits: u32) -> PcmBuffer {
    let steps = quant_steps(bits);
    map_samples(buffer, |s| quantize(s, steps))
}

/// Same as `bitcrush` without the copy, for callers that own the buffer.
pub fn bitcrush_in_place(buffer: &mut PcmBuffer, bits: u32) {
    let steps = quant_steps(bits);
    for ch in buffer.channels_mut() {
        for s in ch.iter_mut() {
            *s = quantize(*s, steps);
        }
    }
}

/// Convenience used by the terminal app: a trimmed copy of the take between
/// two fractional positions.
pub fn crop(buffer: &PcmBuffer, start: f64, end: f64) -> Result<PcmBuffer> {
    let region = crate::buffer::Region::new(start, end)?;
    Ok(buffer.slice_region(region))
}
