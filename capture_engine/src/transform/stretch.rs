// src/transform/stretch.rs
//
// WSOLA time-stretch. Hann grains are laid down at a fixed synthesis hop of
// half a grain; each grain's read position is nudged within a small window
// so that its first half lines up with what naturally follows the previous
// grain. Pitch is untouched because grains are copied, not resampled.

use std::sync::mpsc::{self, Receiver};
use std::thread;

use crate::buffer::PcmBuffer;
use crate::dsp;

pub const MIN_RATIO: f32 = 0.25;
pub const MAX_RATIO: f32 = 4.0;

const GRAIN_SECS: f32 = 0.05;
const PROGRESS_STEPS: usize = 20;

#[derive(Debug)]
pub enum StretchEvent {
    Progress(f32),
    Finished(PcmBuffer),
}

#[inline]
fn sample_at(samples: &[f32], idx: i64) -> f32 {
    if idx < 0 {
        return 0.0;
    }
    samples.get(idx as usize).copied().unwrap_or(0.0)
}

fn similarity(samples: &[f32], a: i64, b: i64, len: usize) -> f32 {
    let (mut ab, mut aa, mut bb) = (0.0f32, 0.0f32, 0.0f32);
    for i in 0..len as i64 {
        let x = sample_at(samples, a + i);
        let y = sample_at(samples, b + i);
        ab += x * y;
        aa += x * x;
        bb += y * y;
    }
    ab / ((aa * bb).sqrt() + 1e-9)
}

/// Best read position near `nominal` for a grain that should continue from
/// `target` (the input position that naturally follows the previous grain).
fn best_offset(mono: &[f32], nominal: i64, target: i64, overlap: usize, tolerance: i64) -> i64 {
    let mut best = nominal;
    let mut best_score = similarity(mono, nominal, target, overlap);
    for delta in -tolerance..=tolerance {
        if delta == 0 {
            continue;
        }
        let score = similarity(mono, nominal + delta, target, overlap);
        if score > best_score {
            best_score = score;
            best = nominal + delta;
        }
    }
    best
}

/// Stretch `buffer` by `ratio` (> 1 longer, < 1 shorter), clamped to
/// [MIN_RATIO, MAX_RATIO]. `progress` is called with values in [0, 1] and
/// always ends with 1.0.
pub fn time_stretch(buffer: &PcmBuffer, ratio: f32, mut progress: impl FnMut(f32)) -> PcmBuffer {
    let ratio = ratio.clamp(MIN_RATIO, MAX_RATIO) as f64;
    if buffer.is_empty() || (ratio - 1.0).abs() < 1e-6 {
        progress(1.0);
        return buffer.clone();
    }

    let sr = buffer.sample_rate();
    let grain = (((GRAIN_SECS * sr as f32) as usize) & !1).max(64);
    let hop = grain / 2;
    let tolerance = (grain / 4) as i64;
    let window = dsp::hann_window(grain);
    let mono = buffer.to_mono();

    let out_len = (buffer.frames() as f64 * ratio).round() as usize;
    let mut out = vec![vec![0.0f32; out_len]; buffer.channel_count()];
    let mut wsum = vec![0.0f32; out_len];

    let total_grains = out_len / hop + 2;
    let report_every = (total_grains / PROGRESS_STEPS).max(1);

    let mut prev_read: Option<i64> = None;
    let mut k = 0usize;
    loop {
        // One hop of pre-roll so the first output frames get two grains.
        let out_pos = (k * hop) as i64 - hop as i64;
        if out_pos >= out_len as i64 {
            break;
        }
        let nominal = (out_pos as f64 / ratio).round() as i64;
        let read = match prev_read {
            None => nominal,
            Some(prev) => best_offset(&mono, nominal, prev + hop as i64, hop, tolerance),
        };

        for (dst, src) in out.iter_mut().zip(buffer.channels()) {
            for (i, w) in window.iter().enumerate() {
                let o = out_pos + i as i64;
                if o < 0 || o >= out_len as i64 {
                    continue;
                }
                dst[o as usize] += w * sample_at(src, read + i as i64);
            }
        }
        for (i, w) in window.iter().enumerate() {
            let o = out_pos + i as i64;
            if o >= 0 && o < out_len as i64 {
                wsum[o as usize] += w;
            }
        }

        prev_read = Some(read);
        k += 1;
        if k % report_every == 0 {
            progress((out_pos.max(0) as f32 / out_len as f32).min(1.0));
        }
    }

    for ch in out.iter_mut() {
        for (s, &w) in ch.iter_mut().zip(&wsum) {
            if w > 1e-3 {
                *s /= w;
            }
        }
    }
    progress(1.0);
    log::debug!("time-stretched {} -> {} frames (ratio {ratio:.3})", buffer.frames(), out_len);

    // Same channel count and rate as the input, so this can't fail.
    match buffer.with_channels(out) {
        Ok(b) => b,
        Err(_) => buffer.clone(),
    }
}

/// Run `time_stretch` on its own thread. The receiver yields `Progress`
/// events and then exactly one `Finished`; dropping it abandons the result.
pub fn spawn_time_stretch(buffer: PcmBuffer, ratio: f32) -> Receiver<StretchEvent> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let progress_tx = tx.clone();
        let out = time_stretch(&buffer, ratio, |p| {
            let _ = progress_tx.send(StretchEvent::Progress(p));
        });
        let _ = tx.send(StretchEvent::Finished(out));
    });
    rx
}
