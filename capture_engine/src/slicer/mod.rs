// src/slicer/mod.rs

use anyhow::Result;

use crate::buffer::{PcmBuffer, Region};
use crate::dsp;
use crate::error::EngineError;

/// Envelope resolution for onset detection, in frames.
pub const ANALYSIS_WINDOW: usize = 256;
const MIN_THRESHOLD: f32 = 1e-4;

/// Onset frames where the envelope climbs to `threshold` after at least
/// `min_silence_secs` below it. The start of the buffer counts as silence.
/// Strictly increasing; empty for silent input.
pub fn detect_transients(buffer: &PcmBuffer, threshold: f32, min_silence_secs: f32) -> Vec<usize> {
    let threshold = threshold.max(MIN_THRESHOLD);
    let min_silence = dsp::frames_for_secs(buffer.sample_rate(), min_silence_secs);
    let frames = buffer.frames();
    let channels = buffer.channels();

    let mut onsets: Vec<usize> = Vec::new();
    let mut silent_run = usize::MAX;

    for start in (0..frames).step_by(ANALYSIS_WINDOW) {
        let end = (start + ANALYSIS_WINDOW).min(frames);
        let envelope = channels
            .iter()
            .flat_map(|c| c[start..end].iter())
            .fold(0.0f32, |acc, s| acc.max(s.abs()));

        if envelope < threshold {
            silent_run = silent_run.saturating_add(end - start);
            continue;
        }

        // Rising edge only: a window that follows another loud one never
        // starts an onset, even when no silence is required.
        if silent_run > 0 && silent_run >= min_silence {
            // Pin the onset to the first sample that actually crosses.
            let onset = (start..end)
                .find(|&f| channels.iter().any(|c| c[f].abs() >= threshold))
                .unwrap_or(start);
            if onsets.last().is_none_or(|&last| onset > last) {
                onsets.push(onset);
            }
        }
        silent_run = 0;
    }
    onsets
}

/// A segment of a source buffer.
#[derive(Debug, Clone)]
pub struct Chop {
    region: Region,
    pub start_frame: usize,
    pub end_frame: usize,
    pub start_secs: f64,
    pub end_secs: f64,
    cache: Option<PcmBuffer>,
}

impl Chop {
    fn new(source: &PcmBuffer, start_frame: usize, end_frame: usize) -> Result<Self> {
        let sr = source.sample_rate() as f64;
        Ok(Self {
            region: Region::from_frames(start_frame, end_frame, source.frames())?,
            start_frame,
            end_frame,
            start_secs: start_frame as f64 / sr,
            end_secs: end_frame as f64 / sr,
            cache: Some(source.slice(start_frame, end_frame)),
        })
    }

    pub fn region(&self) -> Region {
        self.region
    }

    pub fn frames(&self) -> usize {
        self.end_frame.saturating_sub(self.start_frame)
    }

    /// Materialized audio, if still cached.
    pub fn buffer(&self) -> Option<&PcmBuffer> {
        self.cache.as_ref()
    }

    /// Cached audio, cutting it from `source` first if it was invalidated.
    pub fn materialize(&mut self, source: &PcmBuffer) -> &PcmBuffer {
        let (start, end) = (self.start_frame, self.end_frame);
        self.cache.get_or_insert_with(|| source.slice(start, end))
    }

    /// Drop the cached audio; call when the source buffer changes.
    pub fn invalidate(&mut self) {
        self.cache = None;
    }

    /// Manual edit of the segment bounds. Invalidates the cache.
    pub fn set_region(&mut self, region: Region, source: &PcmBuffer) {
        let (start, end) = region.to_frames(source.frames());
        let sr = source.sample_rate() as f64;
        self.region = region;
        self.start_frame = start;
        self.end_frame = end;
        self.start_secs = start as f64 / sr;
        self.end_secs = end as f64 / sr;
        self.invalidate();
    }
}

/// Contiguous segments from each point to the next, the last one running to
/// the end of the buffer. Frame 0 is an implicit first point, so the chops
/// always cover the whole buffer.
pub fn create_chops(buffer: &PcmBuffer, points: &[usize]) -> Result<Vec<Chop>> {
    let frames = buffer.frames();
    if frames == 0 {
        return Err(EngineError::InvalidParameter("cannot chop an empty buffer".into()).into());
    }
    let increasing = points.windows(2).all(|w| w[0] < w[1]);
    if !increasing || points.last().is_some_and(|&p| p >= frames) {
        return Err(EngineError::InvalidChopPoints.into());
    }

    let mut bounds = Vec::with_capacity(points.len() + 2);
    if points.first() != Some(&0) {
        bounds.push(0);
    }
    bounds.extend_from_slice(points);
    bounds.push(frames);

    bounds
        .windows(2)
        .map(|w| Chop::new(buffer, w[0], w[1]))
        .collect()
}

/// `count` equal segments; the last also takes the remainder frames.
pub fn equal_divide(buffer: &PcmBuffer, count: usize) -> Result<Vec<Chop>> {
    let frames = buffer.frames();
    if count == 0 || count > frames {
        return Err(EngineError::InvalidParameter(format!(
            "cannot divide {frames} frames into {count} slices"
        ))
        .into());
    }
    let len = frames / count;
    let points: Vec<usize> = (0..count).map(|i| i * len).collect();
    create_chops(buffer, &points)
}

/// Detect onsets and cut at them.
pub fn chop_at_transients(buffer: &PcmBuffer, threshold: f32, min_silence_secs: f32) -> Result<Vec<Chop>> {
    let onsets = detect_transients(buffer, threshold, min_silence_secs);
    log::debug!("found {} transients", onsets.len());
    create_chops(buffer, &onsets)
}
