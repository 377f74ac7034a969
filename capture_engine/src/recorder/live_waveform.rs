// src/recorder/live_waveform.rs

use crate::waveform::{PeakColumns, PeakEntry};

/// Append-only min/max summary of a capture in progress.
///
/// Each sub-chunk is much finer than a pixel so the UI can zoom the live
/// strip later without losing detail. Completed entries are never rewritten.
pub struct LiveWaveform {
    sub_chunk: usize,
    cur_min: f32,
    cur_max: f32,
    in_bin: usize,
    peaks: Vec<PeakEntry>,
}

impl LiveWaveform {
    pub fn new(sub_chunk: usize) -> Self {
        Self {
            sub_chunk: sub_chunk.max(1),
            cur_min: f32::INFINITY,
            cur_max: f32::NEG_INFINITY,
            in_bin: 0,
            peaks: Vec::new(),
        }
    }

    pub fn sub_chunk(&self) -> usize {
        self.sub_chunk
    }

    /// Add one frame's worth of samples (all channels fold into one strip).
    fn add_frame(&mut self, frame: &[f32]) {
        for &s in frame {
            self.cur_min = self.cur_min.min(s);
            self.cur_max = self.cur_max.max(s);
        }
        self.in_bin += 1;
        if self.in_bin >= self.sub_chunk {
            self.peaks.push(PeakEntry::new(self.cur_min, self.cur_max));
            self.cur_min = f32::INFINITY;
            self.cur_max = f32::NEG_INFINITY;
            self.in_bin = 0;
        }
    }

    /// Add an interleaved block. A partial sub-chunk carries into the next block.
    pub fn add_block(&mut self, samples: &[f32], channels: usize) {
        if channels == 0 {
            return;
        }
        for frame in samples.chunks_exact(channels) {
            self.add_frame(frame);
        }
    }

    /// Forget everything, for a new live session.
    pub fn reset(&mut self) {
        self.peaks.clear();
        self.cur_min = f32::INFINITY;
        self.cur_max = f32::NEG_INFINITY;
        self.in_bin = 0;
    }

    pub fn peaks(&self) -> &[PeakEntry] {
        &self.peaks
    }

    /// Entries appended since the caller last saw `seen` of them.
    pub fn since(&self, seen: usize) -> &[PeakEntry] {
        &self.peaks[seen.min(self.peaks.len())..]
    }

    pub fn len(&self) -> usize {
        self.peaks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peaks.is_empty()
    }
}

impl PeakColumns for LiveWaveform {
    fn column(&self, col: usize, width: usize) -> PeakEntry {
        let n = self.peaks.len();
        if n == 0 || width == 0 || col >= width {
            return PeakEntry::default();
        }
        if n <= width {
            // Fewer entries than pixels: draw entries at their own resolution.
            return self.peaks.get(col).copied().unwrap_or_default();
        }
        let a = col * n / width;
        let b = ((col + 1) * n / width).max(a + 1);
        self.peaks[a..b]
            .iter()
            .copied()
            .reduce(PeakEntry::merge)
            .unwrap_or_default()
    }
}
