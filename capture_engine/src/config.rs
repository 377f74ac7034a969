// src/config.rs

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use crate::effects::equalizer::EqSettings;
use crate::effects::gate::GateParams;
use crate::engine::metering::MAX_LEVEL;
use crate::transform::{MAX_BIT_DEPTH, MIN_BIT_DEPTH};
use crate::transform::stretch::{MAX_RATIO, MIN_RATIO};

/// Every user-facing knob, as plain numbers. Missing fields in a saved file
/// fall back to the defaults below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Linear level that fires the auto-record while armed.
    pub capture_threshold: f32,
    pub meter_attack_ms: f32,
    pub meter_release_ms: f32,
    pub gate: GateParams,
    pub eq: EqSettings,
    /// Frames per live waveform entry.
    pub waveform_sub_chunk: usize,
    /// Samples the render side can queue before blocks are dropped.
    pub ring_capacity: usize,
    pub transient_threshold: f32,
    pub min_silence_secs: f32,
    pub bit_depth: u32,
    pub downsample_factor: usize,
    pub stretch_ratio: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            capture_threshold: 0.1,
            meter_attack_ms: 10.0,
            meter_release_ms: 300.0,
            gate: GateParams::default(),
            eq: EqSettings::default(),
            waveform_sub_chunk: 64,
            ring_capacity: 192_000,
            transient_threshold: 0.2,
            min_silence_secs: 0.1,
            bit_depth: 8,
            downsample_factor: 4,
            stretch_ratio: 1.5,
        }
    }
}

impl EngineConfig {
    pub fn save_to_disk(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = File::create(path)?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    pub fn load_from_disk(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let config: EngineConfig = serde_json::from_reader(reader)?;
        Ok(config.clamped())
    }

    /// Pull every field back into its legal range.
    pub fn clamped(self) -> Self {
        Self {
            capture_threshold: self.capture_threshold.clamp(0.0, MAX_LEVEL),
            meter_attack_ms: self.meter_attack_ms.max(0.01),
            meter_release_ms: self.meter_release_ms.max(0.01),
            gate: self.gate.clamped(),
            waveform_sub_chunk: self.waveform_sub_chunk.max(1),
            ring_capacity: self.ring_capacity.max(1024),
            transient_threshold: self.transient_threshold.clamp(0.0, 1.0),
            min_silence_secs: self.min_silence_secs.max(0.0),
            bit_depth: self.bit_depth.clamp(MIN_BIT_DEPTH, MAX_BIT_DEPTH),
            downsample_factor: self.downsample_factor.max(1),
            stretch_ratio: self.stretch_ratio.clamp(MIN_RATIO, MAX_RATIO),
            ..self
        }
    }
}
