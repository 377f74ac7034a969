// src/waveform/terminal.rs

use super::PeakEntry;

/// Draw peak columns as block characters, one string per row, top row first.
/// `playhead` marks a column with '|' where the waveform is empty.
pub fn render_ascii(peaks: &[PeakEntry], height: usize, playhead: Option<usize>) -> Vec<String> {
    let h = height.max(4);
    let mut lines = vec![vec![' '; peaks.len()]; h];
    let to_row = |v: f32| -> usize {
        let clamped = v.clamp(-1.0, 1.0);
        let y = (0.5 - 0.5 * clamped) * (h as f32 - 1.0);
        y.round() as usize
    };
    for (x, p) in peaks.iter().enumerate() {
        if playhead == Some(x) {
            for row in lines.iter_mut() {
                row[x] = '|';
            }
        }
        let (a, b) = {
            let (y0, y1) = (to_row(p.min), to_row(p.max));
            if y0 <= y1 { (y0, y1) } else { (y1, y0) }
        };
        for row in &mut lines[a..=b] {
            row[x] = '█';
        }
    }
    lines.into_iter().map(|row| row.into_iter().collect()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_scale_column_fills_every_row() {
        let rows = render_ascii(&[PeakEntry::new(-1.0, 1.0), PeakEntry::default()], 5, None);
        assert_eq!(rows.len(), 5);
        assert!(rows.iter().all(|r| r.starts_with('█')));
        // Silent column only touches the middle row.
        assert_eq!(rows.iter().filter(|r| r.ends_with('█')).count(), 1);
    }

    #[test]
    fn playhead_column_is_marked() {
        let rows = render_ascii(&[PeakEntry::default(); 3], 4, Some(2));
        assert!(rows.iter().all(|r| r.chars().nth(2) == Some('|') || r.chars().nth(2) == Some('█')));
        assert!(rows.iter().any(|r| r.chars().nth(2) == Some('|')));
    }
}
