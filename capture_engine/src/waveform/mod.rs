// src/waveform/mod.rs
pub mod terminal;

use crate::buffer::PcmBuffer;

/// One pixel column worth of waveform, both ends in [-1, 1].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PeakEntry {
    pub min: f32,
    pub max: f32,
}

impl PeakEntry {
    pub fn new(min: f32, max: f32) -> Self {
        Self { min: min.clamp(-1.0, 1.0), max: max.clamp(-1.0, 1.0) }
    }

    /// Entry covering both `self` and `other`.
    pub fn merge(self, other: PeakEntry) -> PeakEntry {
        PeakEntry { min: self.min.min(other.min), max: self.max.max(other.max) }
    }
}

/// Shared rendering contract for the live and static views: ask for any
/// column of a `width`-pixel strip and get its (min, max).
pub trait PeakColumns {
    fn column(&self, col: usize, width: usize) -> PeakEntry;

    fn render(&self, width: usize) -> Vec<PeakEntry> {
        (0..width).map(|col| self.column(col, width)).collect()
    }
}

/// Zoom and scroll over a finished buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaveformView {
    zoom: f64,
    scroll: f64,
}

impl Default for WaveformView {
    fn default() -> Self {
        Self { zoom: 1.0, scroll: 0.0 }
    }
}

impl WaveformView {
    /// `zoom` > 1 zooms in; `scroll` is the view start as a fraction of the
    /// whole duration.
    pub fn new(zoom: f64, scroll: f64) -> Self {
        Self { zoom: zoom.max(1.0), scroll: scroll.clamp(0.0, 1.0) }
    }

    pub fn zoom(&self) -> f64 {
        self.zoom
    }

    pub fn scroll(&self) -> f64 {
        self.scroll
    }

    /// Visible frames `[start, end)` as floating positions. The window is
    /// pushed back inside the buffer if scrolling would run past the end.
    pub fn visible_range(&self, total_frames: usize) -> (f64, f64) {
        let total = total_frames as f64;
        let visible = total / self.zoom;
        let start = (self.scroll * total).min(total - visible).max(0.0);
        (start, start + visible)
    }

    /// Column of the playhead for `progress` over the whole duration, or
    /// `None` when it sits outside the visible window.
    pub fn playhead_column(&self, progress: f64, total_frames: usize, width: usize) -> Option<f64> {
        if total_frames == 0 || width == 0 || !(0.0..=1.0).contains(&progress) {
            return None;
        }
        let (start, end) = self.visible_range(total_frames);
        let pos = progress * total_frames as f64;
        if pos < start || pos > end {
            return None;
        }
        Some((pos - start) / (end - start) * width as f64)
    }
}

/// Peaks recomputed on demand for the visible part of one channel.
pub struct StaticWaveform<'a> {
    samples: &'a [f32],
    view: WaveformView,
}

impl<'a> StaticWaveform<'a> {
    pub fn new(buffer: &'a PcmBuffer, channel: usize, view: WaveformView) -> Self {
        Self {
            samples: buffer.channel(channel).unwrap_or(&[]),
            view,
        }
    }

    pub fn from_samples(samples: &'a [f32], view: WaveformView) -> Self {
        Self { samples, view }
    }
}

impl PeakColumns for StaticWaveform<'_> {
    fn column(&self, col: usize, width: usize) -> PeakEntry {
        let total = self.samples.len();
        if total == 0 || width == 0 || col >= width {
            return PeakEntry::default();
        }
        let (start, end) = self.view.visible_range(total);
        let per_pixel = (end - start) / width as f64;

        if per_pixel < 1.0 {
            // Zoomed past one sample per pixel: nearest sample.
            let idx = (start + (col as f64 + 0.5) * per_pixel) as usize;
            let s = self.samples[idx.min(total - 1)];
            return PeakEntry::new(s, s);
        }

        let a = ((start + col as f64 * per_pixel) as usize).min(total - 1);
        let b = ((start + (col + 1) as f64 * per_pixel) as usize).clamp(a + 1, total);
        let (lo, hi) = self.samples[a..b]
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &s| (lo.min(s), hi.max(s)));
        PeakEntry::new(lo, hi)
    }
}

/// One redraw of a channel at the given zoom/scroll.
pub fn render_static(buffer: &PcmBuffer, channel: usize, view: WaveformView, width: usize) -> Vec<PeakEntry> {
    StaticWaveform::new(buffer, channel, view).render(width)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(frames: usize) -> PcmBuffer {
        let data = (0..frames).map(|i| i as f32 / frames as f32 * 2.0 - 1.0).collect();
        PcmBuffer::new(vec![data], 1000).unwrap()
    }

    #[test]
    fn column_past_width_is_empty() {
        let b = ramp(1000);
        let wf = StaticWaveform::new(&b, 0, WaveformView::default());
        assert_eq!(wf.column(20, 10), PeakEntry::default());
        assert_eq!(wf.column(10, 10), PeakEntry::default());
        assert_ne!(wf.column(9, 10), PeakEntry::default());
    }

    #[test]
    fn full_view_columns_cover_whole_buffer() {
        let b = ramp(1000);
        let peaks = render_static(&b, 0, WaveformView::default(), 10);
        assert_eq!(peaks.len(), 10);
        assert_eq!(peaks[0].min, -1.0);
        assert!((peaks[9].max - 0.998).abs() < 1e-6);
        for w in peaks.windows(2) {
            assert!(w[0].max <= w[1].min);
        }
    }

    #[test]
    fn zoom_and_scroll_select_window() {
        let b = ramp(1000);
        let view = WaveformView::new(4.0, 0.5);
        assert_eq!(view.visible_range(1000), (500.0, 750.0));
        let peaks = render_static(&b, 0, view, 5);
        assert!((peaks[0].min - 0.0).abs() < 1e-6);
        assert!(peaks[4].max < 0.5);
    }

    #[test]
    fn scroll_past_end_is_pulled_back() {
        let view = WaveformView::new(2.0, 0.9);
        assert_eq!(view.visible_range(1000), (500.0, 1000.0));
    }

    #[test]
    fn sub_sample_zoom_uses_nearest_sample() {
        let data = vec![0.1, -0.2, 0.3, -0.4];
        let b = PcmBuffer::new(vec![data], 4).unwrap();
        let peaks = render_static(&b, 0, WaveformView::default(), 8);
        assert_eq!(peaks[0], PeakEntry::new(0.1, 0.1));
        assert_eq!(peaks[1], PeakEntry::new(0.1, 0.1));
        assert_eq!(peaks[2], PeakEntry::new(-0.2, -0.2));
        assert_eq!(peaks[7], PeakEntry::new(-0.4, -0.4));
    }

    #[test]
    fn playhead_hidden_outside_visible_window() {
        let view = WaveformView::new(4.0, 0.25);
        assert_eq!(view.playhead_column(0.1, 1000, 100), None);
        assert_eq!(view.playhead_column(0.9, 1000, 100), None);
        let col = view.playhead_column(0.375, 1000, 100).unwrap();
        assert!((col - 50.0).abs() < 1e-9);
    }

    #[test]
    fn empty_buffer_renders_flat() {
        let b = PcmBuffer::silent(1, 0, 44_100).unwrap();
        let peaks = render_static(&b, 0, WaveformView::default(), 4);
        assert!(peaks.iter().all(|p| *p == PeakEntry::default()));
    }
}
