// src/analyzer.rs

use rustfft::{FftPlanner, num_complex::Complex};

use crate::buffer::PcmBuffer;
use crate::dsp;

const FFT_SIZE: usize = 4096;
const FLOOR_DB: f32 = -60.0;

/// Summary of a finished take, shown after recording and used to sanity
/// check transforms.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct AnalysisProfile {
    pub integrated_rms_db: f32,
    pub max_sample_peak_db: f32,
    pub crest_factor_db: f32,

    pub spectral_centroid_hz: f32,
    pub dominant_frequency_hz: f32,
}

fn amp_to_db(amp: f32) -> f32 {
    if amp > 1e-5 { 20.0 * amp.log10() } else { FLOOR_DB }
}

/// Summed magnitude spectrum of the mono mix over whole FFT_SIZE chunks.
/// Bins run 0..=FFT_SIZE/2. Signals shorter than one chunk are zero-padded.
fn magnitude_spectrum(mono: &[f32]) -> Vec<f32> {
    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(FFT_SIZE);
    let window = dsp::hann_window(FFT_SIZE);

    let mut spectrum = vec![0.0f32; FFT_SIZE / 2 + 1];
    let mut scratch = vec![Complex { re: 0.0, im: 0.0 }; FFT_SIZE];

    let chunks = (mono.len() / FFT_SIZE).max(1);
    for chunk in 0..chunks {
        let start = chunk * FFT_SIZE;
        for (i, slot) in scratch.iter_mut().enumerate() {
            let s = mono.get(start + i).copied().unwrap_or(0.0);
            *slot = Complex { re: s * window[i], im: 0.0 };
        }
        fft.process(&mut scratch);
        for (acc, c) in spectrum.iter_mut().zip(&scratch) {
            *acc += c.norm();
        }
    }
    spectrum
}

fn bin_to_hz(bin: usize, sample_rate: u32) -> f32 {
    bin as f32 * sample_rate as f32 / FFT_SIZE as f32
}

/// Frequency of the strongest bin (DC excluded), or 0 for silence.
pub fn dominant_frequency(samples: &[f32], sample_rate: u32) -> f32 {
    let spectrum = magnitude_spectrum(samples);
    let (bin, mag) = spectrum
        .iter()
        .enumerate()
        .skip(1)
        .fold((0, 0.0f32), |best, (i, &m)| if m > best.1 { (i, m) } else { best });
    if mag <= 0.0 { 0.0 } else { bin_to_hz(bin, sample_rate) }
}

pub fn analyze_buffer(buffer: &PcmBuffer) -> AnalysisProfile {
    if buffer.is_empty() {
        return AnalysisProfile {
            integrated_rms_db: FLOOR_DB,
            max_sample_peak_db: FLOOR_DB,
            ..Default::default()
        };
    }

    // f64 accumulator, long takes lose precision otherwise
    let mut sum_sq = 0.0_f64;
    let mut count = 0usize;
    for ch in buffer.channels() {
        for &s in ch {
            sum_sq += (s as f64) * (s as f64);
        }
        count += ch.len();
    }
    let rms = (sum_sq / count as f64).sqrt() as f32;

    let max_sample_peak_db = amp_to_db(buffer.peak());
    let integrated_rms_db = amp_to_db(rms);
    let crest_factor_db = (max_sample_peak_db - integrated_rms_db).max(0.0);

    let mono = buffer.to_mono();
    let spectrum = magnitude_spectrum(&mono);
    let sr = buffer.sample_rate();

    let mut weighted = 0.0f32;
    let mut total = 0.0f32;
    let mut best = (0usize, 0.0f32);
    for (bin, &mag) in spectrum.iter().enumerate() {
        weighted += bin_to_hz(bin, sr) * mag;
        total += mag;
        if bin > 0 && mag > best.1 {
            best = (bin, mag);
        }
    }

    AnalysisProfile {
        integrated_rms_db,
        max_sample_peak_db,
        crest_factor_db,
        spectral_centroid_hz: if total > 0.0 { weighted / total } else { 0.0 },
        dominant_frequency_hz: if best.1 > 0.0 { bin_to_hz(best.0, sr) } else { 0.0 },
    }
}
