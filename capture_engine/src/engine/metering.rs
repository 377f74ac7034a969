// src/engine/metering.rs

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use crate::dsp;

/// Calibration offset added to every dB reading shown to the user.
pub const HEADROOM_OFFSET_DB: f32 = 3.0;
/// Levels at or below this are displayed as -inf.
pub const SILENCE_FLOOR: f32 = 1e-4;
/// Meters may read above 1.0 so clipping stays visible, but no further.
pub const MAX_LEVEL: f32 = 2.0;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LevelSnapshot {
    pub instantaneous: f32,
    pub peak_held: f32,
}

impl LevelSnapshot {
    pub fn instantaneous_db(&self) -> f32 {
        level_to_db(self.instantaneous)
    }

    pub fn peak_held_db(&self) -> f32 {
        level_to_db(self.peak_held)
    }
}

pub fn level_to_db(level: f32) -> f32 {
    if level <= SILENCE_FLOOR {
        f32::NEG_INFINITY
    } else {
        20.0 * level.log10() + HEADROOM_OFFSET_DB
    }
}

/// Highest instantaneous level over all channels.
pub fn max_instantaneous(levels: &[LevelSnapshot]) -> f32 {
    levels.iter().fold(0.0f32, |acc, l| acc.max(l.instantaneous))
}

/// The lock-free bridge. The render side publishes, the UI side polls.
/// Reads are best effort: a poll may see one channel from the newer block
/// and another from the older one.
///
/// Peak reset travels the other way: the UI raises a flag and the render
/// side folds it into its own meter at the start of the next block.
pub struct LevelTelemetry {
    instantaneous: Vec<AtomicU32>,
    peak_held: Vec<AtomicU32>,
    reset_requested: AtomicBool,
}

impl LevelTelemetry {
    pub fn new(channels: usize) -> Arc<Self> {
        Arc::new(Self {
            instantaneous: (0..channels).map(|_| AtomicU32::new(0)).collect(),
            peak_held: (0..channels).map(|_| AtomicU32::new(0)).collect(),
            reset_requested: AtomicBool::new(false),
        })
    }

    /// Ask the render side to drop peak-held to the current level. The
    /// published snapshot follows immediately so a poll before the next
    /// block already shows the reset.
    pub fn request_peak_reset(&self) {
        for (inst, peak) in self.instantaneous.iter().zip(&self.peak_held) {
            peak.store(inst.load(Ordering::Relaxed), Ordering::Relaxed);
        }
        self.reset_requested.store(true, Ordering::Release);
    }

    /// Consumes a pending reset request.
    pub fn take_peak_reset(&self) -> bool {
        self.reset_requested.swap(false, Ordering::Acquire)
    }

    pub fn publish(&self, levels: &[LevelSnapshot]) {
        for (i, l) in levels.iter().enumerate() {
            if let (Some(inst), Some(peak)) = (self.instantaneous.get(i), self.peak_held.get(i)) {
                inst.store(l.instantaneous.to_bits(), Ordering::Relaxed);
                peak.store(l.peak_held.to_bits(), Ordering::Relaxed);
            }
        }
    }

    pub fn read(&self) -> Vec<LevelSnapshot> {
        self.instantaneous
            .iter()
            .zip(&self.peak_held)
            .map(|(inst, peak)| LevelSnapshot {
                instantaneous: f32::from_bits(inst.load(Ordering::Relaxed)),
                peak_held: f32::from_bits(peak.load(Ordering::Relaxed)),
            })
            .collect()
    }
}

/// Per-channel meter ballistics. Owned by whichever context drives the ticks.
pub struct LevelMeter {
    attack_coeff: f32,
    release_coeff: f32,
    levels: Vec<LevelSnapshot>,
    block_peaks: Vec<f32>,
}

impl LevelMeter {
    pub fn new(sample_rate: u32, channels: usize, attack_ms: f32, release_ms: f32) -> Self {
        let sr = sample_rate as f32;
        Self {
            attack_coeff: dsp::time_to_coeff(attack_ms, sr),
            release_coeff: dsp::time_to_coeff(release_ms, sr),
            levels: vec![LevelSnapshot::default(); channels],
            block_peaks: vec![0.0; channels],
        }
    }

    /// Run one tick over an interleaved block.
    ///
    /// Smoothing is scaled by the block length, so a render callback of 128
    /// frames and a display poll of 800 frames converge at the same speed.
    pub fn process_interleaved(&mut self, block: &[f32], channels: usize) -> &[LevelSnapshot] {
        if channels == 0 || channels != self.levels.len() {
            return &self.levels;
        }
        let frames = block.len() / channels;
        if frames == 0 {
            return &self.levels;
        }

        self.block_peaks.fill(0.0);
        for frame in block.chunks_exact(channels) {
            for (peak, s) in self.block_peaks.iter_mut().zip(frame) {
                *peak = peak.max(s.abs());
            }
        }

        let attack = self.attack_coeff.powf(frames as f32);
        let release = self.release_coeff.powf(frames as f32);

        for (level, &raw) in self.levels.iter_mut().zip(&self.block_peaks) {
            let raw = raw.min(MAX_LEVEL);
            let coeff = if raw > level.instantaneous { attack } else { release };
            let mut next = raw + coeff * (level.instantaneous - raw);
            if next < 1e-20 {
                next = 0.0; // flush denormals
            }
            level.instantaneous = next.clamp(0.0, MAX_LEVEL);
            level.peak_held = level.peak_held.max(raw);
        }

        &self.levels
    }

    /// Peak-held drops to whatever the meter reads right now.
    pub fn reset_peaks(&mut self) {
        for level in &mut self.levels {
            level.peak_held = level.instantaneous;
        }
    }

    /// Zero everything, used when a new source is connected.
    pub fn clear(&mut self) {
        self.levels.fill(LevelSnapshot::default());
    }

    pub fn levels(&self) -> &[LevelSnapshot] {
        &self.levels
    }
}
