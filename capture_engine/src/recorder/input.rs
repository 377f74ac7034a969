// src/recorder/input.rs

use anyhow::Result;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::sync::Arc;

use crate::effects::equalizer::{EqSettings, ThreeBandEq};
use crate::effects::gate::{GateCommands, GateParams, GateProcessor};
use crate::engine::metering::{LevelMeter, LevelSnapshot, LevelTelemetry};
use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceFormat {
    pub sample_rate: u32,
    pub channels: usize,
}

/// A live stream the capture machine can pull interleaved f32 frames from.
pub trait CaptureSource {
    fn format(&self) -> SourceFormat;

    /// Append everything captured since the last call to `out`, whole frames
    /// only. Returns the number of frames appended.
    fn read_available(&mut self, out: &mut Vec<f32>) -> usize;

    /// Levels published by the render side, if the source runs a meter there.
    fn telemetry(&self) -> Option<Arc<LevelTelemetry>> {
        None
    }
}

/// Hands out capture sources. Failing to open means "no source".
pub trait SourceProvider {
    fn open(&mut self, render: RenderSetup) -> Result<Box<dyn CaptureSource>>;
}

/// What the render side needs to build its processing chain.
pub struct RenderSetup {
    pub gate_commands: Option<GateCommands>,
    pub gate_params: GateParams,
    pub eq: EqSettings,
    pub meter_attack_ms: f32,
    pub meter_release_ms: f32,
    pub ring_capacity: usize,
}

impl Default for RenderSetup {
    fn default() -> Self {
        Self {
            gate_commands: None,
            gate_params: GateParams::default(),
            eq: EqSettings::default(),
            meter_attack_ms: 10.0,
            meter_release_ms: 300.0,
            ring_capacity: 192_000,
        }
    }
}

/// Everything that runs inside the device callback: sample conversion, then
/// gate, EQ and meter, then the hand-off into the ring buffer. Allocation
/// free once the scratch buffer has grown to the device block size.
pub struct RenderChain {
    channels: usize,
    gate: GateProcessor,
    eq: ThreeBandEq,
    meter: LevelMeter,
    telemetry: Arc<LevelTelemetry>,
    producer: HeapProd<f32>,
    scratch: Vec<f32>,
    dropped_blocks: u64,
}

impl RenderChain {
    pub fn new(format: SourceFormat, setup: RenderSetup) -> (Self, RingReader) {
        let channels = format.channels.max(1);
        let (producer, consumer) = HeapRb::<f32>::new(setup.ring_capacity.max(channels)).split();
        let telemetry = LevelTelemetry::new(channels);
        let chain = Self {
            channels,
            gate: GateProcessor::new(format.sample_rate, setup.gate_params, setup.gate_commands),
            eq: ThreeBandEq::new(format.sample_rate, channels, setup.eq),
            meter: LevelMeter::new(format.sample_rate, channels, setup.meter_attack_ms, setup.meter_release_ms),
            telemetry: telemetry.clone(),
            producer,
            scratch: Vec::with_capacity(8192),
            dropped_blocks: 0,
        };
        let reader = RingReader {
            format: SourceFormat { sample_rate: format.sample_rate, channels },
            consumer,
            telemetry,
        };
        (chain, reader)
    }

    /// One device callback's worth of interleaved samples.
    pub fn process<T>(&mut self, data: &[T])
    where
        T: Sample,
        f32: FromSample<T>,
    {
        self.scratch.clear();
        self.scratch.extend(data.iter().map(|&s| s.to_sample::<f32>()));

        if self.telemetry.take_peak_reset() {
            self.meter.reset_peaks();
        }
        self.gate.process_interleaved(&mut self.scratch, self.channels);
        self.eq.process_interleaved(&mut self.scratch, self.channels);
        let levels = self.meter.process_interleaved(&self.scratch, self.channels);
        self.telemetry.publish(levels);

        // All or nothing, so a full ring never splits a frame.
        if self.producer.vacant_len() >= self.scratch.len() {
            self.producer.push_slice(&self.scratch);
        } else {
            self.dropped_blocks += 1;
        }
    }

    pub fn levels(&self) -> &[LevelSnapshot] {
        self.meter.levels()
    }

    pub fn dropped_blocks(&self) -> u64 {
        self.dropped_blocks
    }
}

/// Orchestration-side end of a render chain.
pub struct RingReader {
    format: SourceFormat,
    consumer: HeapCons<f32>,
    telemetry: Arc<LevelTelemetry>,
}

impl CaptureSource for RingReader {
    fn format(&self) -> SourceFormat {
        self.format
    }

    fn read_available(&mut self, out: &mut Vec<f32>) -> usize {
        let channels = self.format.channels;
        let available = self.consumer.occupied_len();
        let whole = available - available % channels;
        if whole == 0 {
            return 0;
        }
        let start = out.len();
        out.resize(start + whole, 0.0);
        let popped = self.consumer.pop_slice(&mut out[start..]);
        out.truncate(start + popped);
        popped / channels
    }

    fn telemetry(&self) -> Option<Arc<LevelTelemetry>> {
        Some(self.telemetry.clone())
    }
}

/// The default input device. Owns the cpal stream; dropping it stops capture
/// and releases the device.
pub struct AudioInput {
    _stream: Stream,
    reader: RingReader,
}

impl AudioInput {
    pub fn open(setup: RenderSetup) -> Result<Self> {
        let unavailable = |e: String| EngineError::SourceUnavailable(e);

        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| unavailable("no input device available".into()))?;

        let supported_config = device.default_input_config().map_err(|e| unavailable(e.to_string()))?;
        let sample_format = supported_config.sample_format();
        let config: StreamConfig = supported_config.into();
        let format = SourceFormat {
            sample_rate: config.sample_rate.0,
            channels: config.channels as usize,
        };

        let (chain, reader) = RenderChain::new(format, setup);
        let stream = match sample_format {
            SampleFormat::F32 => build_stream::<f32>(&device, &config, chain),
            SampleFormat::I16 => build_stream::<i16>(&device, &config, chain),
            SampleFormat::U16 => build_stream::<u16>(&device, &config, chain),
            other => Err(unavailable(format!("unsupported sample format: {other:?}")).into()),
        }?;

        log::info!(
            "Input device opened: {} Hz, {} channel(s)",
            format.sample_rate,
            format.channels
        );
        Ok(Self { _stream: stream, reader })
    }
}

impl CaptureSource for AudioInput {
    fn format(&self) -> SourceFormat {
        self.reader.format()
    }

    fn read_available(&mut self, out: &mut Vec<f32>) -> usize {
        self.reader.read_available(out)
    }

    fn telemetry(&self) -> Option<Arc<LevelTelemetry>> {
        self.reader.telemetry()
    }
}

fn build_stream<T>(device: &cpal::Device, config: &StreamConfig, mut chain: RenderChain) -> Result<Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let err_fn = |err| log::error!("Input stream error: {err:?}");

    let stream = device
        .build_input_stream(config, move |data: &[T], _| chain.process(data), err_fn, None)
        .map_err(|e| EngineError::SourceUnavailable(e.to_string()))?;

    stream.play().map_err(|e| EngineError::SourceUnavailable(e.to_string()))?;
    Ok(stream)
}

/// Opens the system default input device.
pub struct DefaultInputProvider;

impl SourceProvider for DefaultInputProvider {
    fn open(&mut self, render: RenderSetup) -> Result<Box<dyn CaptureSource>> {
        Ok(Box::new(AudioInput::open(render)?))
    }
}
