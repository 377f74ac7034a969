// src/buffer.rs

use anyhow::Result;

use crate::dsp;
use crate::error::EngineError;

/// Planar f32 audio at a fixed sample rate. Every channel holds the same
/// number of frames and the rate is never zero.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBuffer {
    channels: Vec<Vec<f32>>,
    sample_rate: u32,
}

impl PcmBuffer {
    pub fn new(channels: Vec<Vec<f32>>, sample_rate: u32) -> Result<Self> {
        if sample_rate == 0 {
            return Err(EngineError::InvalidParameter("sample rate must be > 0".into()).into());
        }
        if channels.is_empty() {
            return Err(EngineError::InvalidParameter("buffer needs at least one channel".into()).into());
        }
        let frames = channels[0].len();
        if channels.iter().any(|c| c.len() != frames) {
            return Err(EngineError::InvalidParameter("channels have different lengths".into()).into());
        }
        Ok(Self { channels, sample_rate })
    }

    pub fn silent(channel_count: usize, frames: usize, sample_rate: u32) -> Result<Self> {
        Self::new(vec![vec![0.0; frames]; channel_count], sample_rate)
    }

    pub fn from_interleaved(samples: &[f32], channel_count: usize, sample_rate: u32) -> Result<Self> {
        if channel_count == 0 {
            return Err(EngineError::InvalidParameter("buffer needs at least one channel".into()).into());
        }
        let mut planar = vec![Vec::with_capacity(samples.len() / channel_count); channel_count];
        dsp::append_interleaved_to_planar(samples, &mut planar, channel_count);
        Self::new(planar, sample_rate)
    }

    pub fn to_interleaved(&self) -> Vec<f32> {
        dsp::interleave(&self.channels)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn frames(&self) -> usize {
        self.channels[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames() == 0
    }

    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.channels.get(index).map(|c| c.as_slice())
    }

    pub fn channels(&self) -> &[Vec<f32>] {
        &self.channels
    }

    /// Mutable access for in-place effects. Lengths can't change through this.
    pub fn channels_mut(&mut self) -> impl Iterator<Item = &mut [f32]> {
        self.channels.iter_mut().map(|c| c.as_mut_slice())
    }

    pub fn into_channels(self) -> Vec<Vec<f32>> {
        self.channels
    }

    /// Largest absolute sample over all channels.
    pub fn peak(&self) -> f32 {
        self.channels
            .iter()
            .flat_map(|c| c.iter())
            .fold(0.0f32, |acc, s| acc.max(s.abs()))
    }

    /// Build a buffer with the same rate and channel count from new data.
    pub fn with_channels(&self, channels: Vec<Vec<f32>>) -> Result<Self> {
        Self::new(channels, self.sample_rate)
    }

    /// Copy of frames `[start, end)`, clamped to the buffer.
    pub fn slice(&self, start: usize, end: usize) -> PcmBuffer {
        let frames = self.frames();
        let end = end.min(frames);
        let start = start.min(end);
        Self {
            channels: self.channels.iter().map(|c| c[start..end].to_vec()).collect(),
            sample_rate: self.sample_rate,
        }
    }

    pub fn slice_region(&self, region: Region) -> PcmBuffer {
        let (start, end) = region.to_frames(self.frames());
        self.slice(start, end)
    }

    /// Average of all channels.
    pub fn to_mono(&self) -> Vec<f32> {
        let count = self.channels.len() as f32;
        (0..self.frames())
            .map(|f| self.channels.iter().map(|c| c[f]).sum::<f32>() / count)
            .collect()
    }
}

/// Fractional selection `[start, end)` over a buffer's duration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Region {
    start: f64,
    end: f64,
}

impl Region {
    pub const FULL: Region = Region { start: 0.0, end: 1.0 };

    pub fn new(start: f64, end: f64) -> Result<Self> {
        // Written positively so NaN fails every comparison and is rejected.
        if !(start >= 0.0 && start < end && end <= 1.0) {
            return Err(EngineError::InvalidParameter(format!(
                "region [{start}, {end}) outside 0 <= start < end <= 1"
            ))
            .into());
        }
        Ok(Self { start, end })
    }

    /// Region covering frames `[start, end)` of a buffer `total` frames long.
    pub fn from_frames(start: usize, end: usize, total: usize) -> Result<Self> {
        if total == 0 {
            return Err(EngineError::InvalidParameter("region over an empty buffer".into()).into());
        }
        Self::new(start as f64 / total as f64, end as f64 / total as f64)
    }

    pub fn start(&self) -> f64 {
        self.start
    }

    pub fn end(&self) -> f64 {
        self.end
    }

    pub fn to_frames(&self, total: usize) -> (usize, usize) {
        let s = (self.start * total as f64).round() as usize;
        let e = (self.end * total as f64).round() as usize;
        (s.min(total), e.min(total))
    }
}
