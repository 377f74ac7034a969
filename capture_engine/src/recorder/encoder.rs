// src/recorder/encoder.rs

use anyhow::Result;
use hound::{SampleFormat, WavSpec, WavWriter};
use std::io::Cursor;

use crate::buffer::PcmBuffer;

/// Turns a finished take into a container blob. The capture machine hands
/// over the buffer; what the bytes look like is the encoder's business.
pub trait ContainerEncoder: Send {
    fn encode(&self, buffer: &PcmBuffer) -> Result<Vec<u8>>;
}

/// 16-bit PCM WAV, written into memory.
pub struct WavEncoder;

impl ContainerEncoder for WavEncoder {
    fn encode(&self, buffer: &PcmBuffer) -> Result<Vec<u8>> {
        let spec = WavSpec {
            channels: buffer.channel_count() as u16,
            sample_rate: buffer.sample_rate(),
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };

        let mut bytes = Vec::new();
        let mut writer = WavWriter::new(Cursor::new(&mut bytes), spec)?;
        for s in buffer.to_interleaved() {
            let v = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            writer.write_sample(v)?;
        }
        writer.finalize()?;
        Ok(bytes)
    }
}
