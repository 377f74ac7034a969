// src/effects/equalizer.rs

use anyhow::Result;
use biquad::*;
use serde::{Deserialize, Serialize};

use crate::buffer::PcmBuffer;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum EqFilterType {
    LowShelf,
    Peaking,
    HighShelf,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EqParams {
    pub filter_type: EqFilterType,
    pub freq: f32, // Hz; corner for shelves, centre for peaking
    pub q: f32,
    pub gain: f32, // dB
}

impl EqParams {
    pub fn low_shelf(freq: f32, gain: f32) -> Self {
        Self { filter_type: EqFilterType::LowShelf, freq, q: Q_BUTTERWORTH_F32, gain }
    }

    pub fn peaking(freq: f32, q: f32, gain: f32) -> Self {
        Self { filter_type: EqFilterType::Peaking, freq, q, gain }
    }

    pub fn high_shelf(freq: f32, gain: f32) -> Self {
        Self { filter_type: EqFilterType::HighShelf, freq, q: Q_BUTTERWORTH_F32, gain }
    }

    fn is_flat(&self) -> bool {
        self.gain.abs() < 1e-3
    }
}

/// Fixed low / mid / high layout.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EqSettings {
    pub low: EqParams,
    pub mid: EqParams,
    pub high: EqParams,
}

impl Default for EqSettings {
    fn default() -> Self {
        Self {
            low: EqParams::low_shelf(200.0, 0.0),
            mid: EqParams::peaking(1000.0, 1.0, 0.0),
            high: EqParams::high_shelf(5000.0, 0.0),
        }
    }
}

impl EqSettings {
    fn bands(&self) -> [EqParams; 3] {
        [self.low, self.mid, self.high]
    }
}

pub struct EqBand {
    filters: Vec<DirectForm2Transposed<f32>>,
    params: EqParams,
    sr: u32,
}

impl EqBand {
    pub fn new(sr: u32, channels: usize, params: EqParams) -> Self {
        let identity = Coefficients { a1: 0.0, a2: 0.0, b0: 1.0, b1: 0.0, b2: 0.0 };
        let mut band = Self {
            filters: (0..channels).map(|_| DirectForm2Transposed::<f32>::new(identity)).collect(),
            params,
            sr,
        };
        band.update_coefficients(true);
        band
    }

    pub fn params(&self) -> EqParams {
        self.params
    }

    pub fn update(&mut self, new_params: EqParams) {
        let type_changed = self.params.filter_type != new_params.filter_type;
        self.params = new_params;
        self.update_coefficients(type_changed);
    }

    fn update_coefficients(&mut self, reset_state: bool) {
        // Freq must stay below Nyquist, Q must be > 0
        let nyquist = self.sr as f32 / 2.0;
        let safe_freq = self.params.freq.clamp(20.0, (nyquist - 1.0).max(20.0));
        let safe_q = self.params.q.max(0.1);
        let gain = self.params.gain.clamp(-24.0, 24.0);

        let biquad_type = match self.params.filter_type {
            EqFilterType::LowShelf => Type::LowShelf(gain),
            EqFilterType::Peaking => Type::PeakingEQ(gain),
            EqFilterType::HighShelf => Type::HighShelf(gain),
        };

        match Coefficients::<f32>::from_params(biquad_type, (self.sr as f32).hz(), safe_freq.hz(), safe_q) {
            Ok(coeffs) => {
                for filter in &mut self.filters {
                    if reset_state {
                        filter.reset_state();
                    }
                    filter.update_coefficients(coeffs);
                }
            }
            Err(e) => log::warn!("EQ coefficients rejected for {safe_freq} Hz: {e:?}"),
        }
    }

    pub fn reset(&mut self) {
        for filter in &mut self.filters {
            filter.reset_state();
        }
    }

    #[inline]
    pub fn process(&mut self, sample: f32, channel_idx: usize) -> f32 {
        if self.params.is_flat() {
            return sample;
        }
        match self.filters.get_mut(channel_idx) {
            Some(filter) => {
                let out = filter.run(sample);
                // Denormal protection
                if out.abs() < 1e-20 { 0.0 } else { out }
            }
            None => sample,
        }
    }
}

/// The low / mid / high chain. One instance per stream; `RenderChain` runs it
/// in the device callback and `apply_eq` runs it offline, so both paths
/// produce identical samples for identical settings.
pub struct ThreeBandEq {
    bands: [EqBand; 3],
}

impl ThreeBandEq {
    pub fn new(sr: u32, channels: usize, settings: EqSettings) -> Self {
        let [low, mid, high] = settings.bands();
        Self {
            bands: [
                EqBand::new(sr, channels, low),
                EqBand::new(sr, channels, mid),
                EqBand::new(sr, channels, high),
            ],
        }
    }

    pub fn update(&mut self, settings: EqSettings) {
        for (band, params) in self.bands.iter_mut().zip(settings.bands()) {
            band.update(params);
        }
    }

    pub fn settings(&self) -> EqSettings {
        EqSettings {
            low: self.bands[0].params(),
            mid: self.bands[1].params(),
            high: self.bands[2].params(),
        }
    }

    pub fn reset(&mut self) {
        for band in &mut self.bands {
            band.reset();
        }
    }

    #[inline]
    pub fn process_sample(&mut self, sample: f32, channel_idx: usize) -> f32 {
        let mut s = sample;
        for band in &mut self.bands {
            s = band.process(s, channel_idx);
        }
        s
    }

    // Zero-allocation in-place processing
    pub fn process_interleaved(&mut self, buffer: &mut [f32], channels: usize) {
        if channels == 0 {
            return;
        }
        for frame in buffer.chunks_exact_mut(channels) {
            for (ch, sample) in frame.iter_mut().enumerate() {
                *sample = self.process_sample(*sample, ch);
            }
        }
    }
}

/// Offline EQ: runs a fresh chain over the whole buffer and returns the result.
pub fn apply_eq(buffer: &PcmBuffer, settings: &EqSettings) -> Result<PcmBuffer> {
    let mut eq = ThreeBandEq::new(buffer.sample_rate(), buffer.channel_count(), *settings);
    let channels = buffer
        .channels()
        .iter()
        .enumerate()
        .map(|(ch, samples)| samples.iter().map(|&s| eq.process_sample(s, ch)).collect())
        .collect();
    buffer.with_channels(channels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn sine(freq: f32, frames: usize, sr: u32) -> Vec<f32> {
        (0..frames).map(|i| 0.5 * (2.0 * PI * freq * i as f32 / sr as f32).sin()).collect()
    }

    fn rms(x: &[f32]) -> f32 {
        (x.iter().map(|s| s * s).sum::<f32>() / x.len() as f32).sqrt()
    }

    fn boosted() -> EqSettings {
        EqSettings {
            low: EqParams::low_shelf(150.0, 6.0),
            mid: EqParams::peaking(1200.0, 0.9, -4.0),
            high: EqParams::high_shelf(6000.0, 3.0),
        }
    }

    #[test]
    fn offline_matches_realtime_chain() {
        let sr = 44_100;
        let left = sine(90.0, 8192, sr);
        let right = sine(3000.0, 8192, sr);
        let buffer = PcmBuffer::new(vec![left, right], sr).unwrap();

        let offline = apply_eq(&buffer, &boosted()).unwrap();

        let mut rt = ThreeBandEq::new(sr, 2, boosted());
        let mut interleaved = buffer.to_interleaved();
        for block in interleaved.chunks_mut(256) {
            rt.process_interleaved(block, 2);
        }
        let realtime = PcmBuffer::from_interleaved(&interleaved, 2, sr).unwrap();

        for (a, b) in offline.channels().iter().zip(realtime.channels()) {
            for (x, y) in a.iter().zip(b) {
                assert!((x - y).abs() <= 1e-6);
            }
        }
    }

    #[test]
    fn flat_settings_leave_buffer_untouched() {
        let sr = 48_000;
        let buffer = PcmBuffer::new(vec![sine(440.0, 4800, sr)], sr).unwrap();
        let out = apply_eq(&buffer, &EqSettings::default()).unwrap();
        assert_eq!(out, buffer);
    }

    #[test]
    fn low_shelf_boost_raises_bass_only() {
        let sr = 44_100;
        let settings = EqSettings { low: EqParams::low_shelf(200.0, 12.0), ..EqSettings::default() };

        let bass = PcmBuffer::new(vec![sine(60.0, 44_100, sr)], sr).unwrap();
        let treble = PcmBuffer::new(vec![sine(8000.0, 44_100, sr)], sr).unwrap();
        let bass_out = apply_eq(&bass, &settings).unwrap();
        let treble_out = apply_eq(&treble, &settings).unwrap();

        let bass_gain = rms(&bass_out.channel(0).unwrap()[22_050..]) / rms(&bass.channel(0).unwrap()[22_050..]);
        let treble_gain = rms(&treble_out.channel(0).unwrap()[22_050..]) / rms(&treble.channel(0).unwrap()[22_050..]);
        assert!(bass_gain > 2.5, "bass gain {bass_gain}");
        assert!((treble_gain - 1.0).abs() < 0.1, "treble gain {treble_gain}");
    }

    #[test]
    fn out_of_range_frequency_is_clamped_and_stable() {
        let sr = 22_050;
        let settings = EqSettings { high: EqParams::high_shelf(40_000.0, 6.0), ..EqSettings::default() };
        let buffer = PcmBuffer::new(vec![sine(1000.0, 2048, sr)], sr).unwrap();
        let out = apply_eq(&buffer, &settings).unwrap();
        assert!(out.channel(0).unwrap().iter().all(|s| s.is_finite() && s.abs() < 4.0));
    }
}
