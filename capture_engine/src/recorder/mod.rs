// src/recorder/mod.rs

pub mod encoder;
pub mod input;
pub mod live_waveform;

use std::sync::mpsc::{self, Receiver, Sender};
use std::time::Duration;

use crate::buffer::PcmBuffer;
use crate::config::EngineConfig;
use crate::dsp;
use crate::engine::metering::{LevelMeter, LevelSnapshot, MAX_LEVEL, max_instantaneous};
use crate::recorder::{
    encoder::ContainerEncoder,
    input::{CaptureSource, RenderSetup, SourceFormat, SourceProvider},
    live_waveform::LiveWaveform,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Armed,
    Recording,
}

/// A finished take and its encoded container, if an encoder is attached.
#[derive(Debug, Clone)]
pub struct Recording {
    pub buffer: PcmBuffer,
    pub blob: Option<Vec<u8>>,
}

/// Notifications for observers. The take itself is handed over by `stop()`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CaptureEvent {
    /// Auto-record fired while armed; `level` is the loudest channel.
    ThresholdExceeded { level: f32 },
    RecordingStopped { frames: usize, duration_secs: f64 },
}

/// Owns the Idle → Armed → Recording lifecycle and the take being recorded.
///
/// The machine is driven from the orchestration side: `tick` pulls whatever
/// the render side queued, meters it, and either watches it against the
/// threshold (armed) or appends it to the take (recording). Illegal
/// transitions are no-ops that return `false` / `None`.
pub struct CaptureMachine {
    state: CaptureState,
    threshold: f32,
    meter_attack_ms: f32,
    meter_release_ms: f32,

    source: Option<Box<dyn CaptureSource>>,
    format: Option<SourceFormat>,
    meter: Option<LevelMeter>,

    take: Vec<Vec<f32>>,
    live_waveform: LiveWaveform,
    encoder: Option<Box<dyn ContainerEncoder>>,
    events: Sender<CaptureEvent>,
    scratch: Vec<f32>,
}

impl CaptureMachine {
    pub fn new(config: &EngineConfig) -> (Self, Receiver<CaptureEvent>) {
        let (events, rx) = mpsc::channel();
        let machine = Self {
            state: CaptureState::Idle,
            threshold: config.capture_threshold.clamp(0.0, MAX_LEVEL),
            meter_attack_ms: config.meter_attack_ms,
            meter_release_ms: config.meter_release_ms,
            source: None,
            format: None,
            meter: None,
            take: Vec::new(),
            live_waveform: LiveWaveform::new(config.waveform_sub_chunk),
            encoder: None,
            events,
            scratch: Vec::with_capacity(16_384),
        };
        (machine, rx)
    }

    pub fn set_encoder(&mut self, encoder: Box<dyn ContainerEncoder>) {
        self.encoder = Some(encoder);
    }

    /// Ask `provider` for a live source. On failure the machine is left Idle
    /// with no source.
    pub fn connect(&mut self, provider: &mut dyn SourceProvider, render: RenderSetup) -> bool {
        self.disconnect();
        match provider.open(render) {
            Ok(source) => {
                self.attach(source);
                true
            }
            Err(e) => {
                log::warn!("Capture source unavailable: {e:#}");
                false
            }
        }
    }

    /// Use an already opened source.
    pub fn attach(&mut self, source: Box<dyn CaptureSource>) {
        self.disconnect();
        let format = source.format();
        self.meter = Some(LevelMeter::new(
            format.sample_rate,
            format.channels,
            self.meter_attack_ms,
            self.meter_release_ms,
        ));
        self.format = Some(format);
        self.source = Some(source);
        log::info!("Capture source connected ({} Hz, {} ch)", format.sample_rate, format.channels);
    }

    /// Drop the source. Anything being recorded is discarded.
    pub fn disconnect(&mut self) {
        if self.state == CaptureState::Recording {
            log::warn!("Source disconnected mid-recording, take discarded");
        }
        self.state = CaptureState::Idle;
        self.take.clear();
        self.source = None;
        self.format = None;
        self.meter = None;
    }

    pub fn is_connected(&self) -> bool {
        self.format.is_some()
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn format(&self) -> Option<SourceFormat> {
        self.format
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Linear amplitude, compared against the loudest channel.
    pub fn set_threshold(&mut self, level: f32) {
        self.threshold = level.clamp(0.0, MAX_LEVEL);
    }

    pub fn arm(&mut self) -> bool {
        if self.state != CaptureState::Idle || !self.is_connected() {
            return false;
        }
        self.state = CaptureState::Armed;
        log::info!("Armed, waiting for level above {:.3}", self.threshold);
        true
    }

    pub fn disarm(&mut self) -> bool {
        if self.state != CaptureState::Armed {
            return false;
        }
        self.state = CaptureState::Idle;
        log::info!("Disarmed");
        true
    }

    /// Manual start; only legal while armed.
    pub fn start(&mut self) -> bool {
        if self.state != CaptureState::Armed {
            return false;
        }
        self.begin_recording();
        true
    }

    /// Finish the take. `None` unless recording.
    pub fn stop(&mut self) -> Option<Recording> {
        if self.state != CaptureState::Recording {
            return None;
        }
        self.state = CaptureState::Idle;

        let format = self.format?;
        let take = std::mem::take(&mut self.take);
        let buffer = match PcmBuffer::new(take, format.sample_rate) {
            Ok(b) => b,
            Err(e) => {
                log::error!("Could not finalize recording: {e:#}");
                return None;
            }
        };
        let blob = self.encoder.as_ref().and_then(|enc| match enc.encode(&buffer) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                log::warn!("Encoding the take failed: {e:#}");
                None
            }
        });

        log::info!(
            "Recording stopped: {} frames ({:.2}s)",
            buffer.frames(),
            buffer.duration_secs()
        );
        let _ = self.events.send(CaptureEvent::RecordingStopped {
            frames: buffer.frames(),
            duration_secs: buffer.duration_secs(),
        });
        Some(Recording { buffer, blob })
    }

    fn begin_recording(&mut self) {
        let channels = self.format.map(|f| f.channels).unwrap_or(1);
        self.take = vec![Vec::new(); channels];
        self.live_waveform.reset();
        self.state = CaptureState::Recording;
        log::info!("Recording");
    }

    /// Meter one interleaved block and route it by state.
    pub fn feed(&mut self, block: &[f32]) {
        let (Some(format), Some(meter)) = (self.format, self.meter.as_mut()) else {
            return;
        };
        let level = max_instantaneous(meter.process_interleaved(block, format.channels));

        if self.state == CaptureState::Armed && level > self.threshold {
            // Single shot: the armed state is consumed by this transition.
            self.begin_recording();
            log::info!("Threshold exceeded ({level:.3}), auto-recording");
            let _ = self.events.send(CaptureEvent::ThresholdExceeded { level });
        }

        if self.state == CaptureState::Recording {
            dsp::append_interleaved_to_planar(block, &mut self.take, format.channels);
            self.live_waveform.add_block(block, format.channels);
        }
    }

    /// Pull what the source captured since the last tick and feed it.
    /// Returns the number of frames processed.
    pub fn tick(&mut self) -> usize {
        let Some(source) = self.source.as_mut() else {
            return 0;
        };
        let mut scratch = std::mem::take(&mut self.scratch);
        scratch.clear();
        let frames = source.read_available(&mut scratch);
        if frames > 0 {
            self.feed(&scratch);
        }
        self.scratch = scratch;
        frames
    }

    /// Levels as seen by the orchestration-side meter.
    pub fn levels(&self) -> Vec<LevelSnapshot> {
        self.meter.as_ref().map(|m| m.levels().to_vec()).unwrap_or_default()
    }

    /// Levels as last published by the render side, if the source meters.
    pub fn render_levels(&self) -> Option<Vec<LevelSnapshot>> {
        self.source.as_ref()?.telemetry().map(|t| t.read())
    }

    /// Resets peak-held on both meters: this one now, the render side's at
    /// its next block.
    pub fn reset_peaks(&mut self) {
        if let Some(meter) = self.meter.as_mut() {
            meter.reset_peaks();
        }
        if let Some(telemetry) = self.source.as_ref().and_then(|s| s.telemetry()) {
            telemetry.request_peak_reset();
        }
    }

    pub fn live_waveform(&self) -> &LiveWaveform {
        &self.live_waveform
    }

    pub fn recorded_frames(&self) -> usize {
        dsp::planar_len(&self.take)
    }

    pub fn recorded_duration(&self) -> Duration {
        match self.format {
            Some(f) if f.sample_rate > 0 => {
                Duration::from_secs_f64(self.recorded_frames() as f64 / f.sample_rate as f64)
            }
            _ => Duration::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::encoder::WavEncoder;
    use anyhow::{Result, bail};
    use std::collections::VecDeque;

    /// Hands out pre-scripted blocks, one per read.
    struct ScriptedSource {
        format: SourceFormat,
        blocks: VecDeque<Vec<f32>>,
    }

    impl CaptureSource for ScriptedSource {
        fn format(&self) -> SourceFormat {
            self.format
        }

        fn read_available(&mut self, out: &mut Vec<f32>) -> usize {
            match self.blocks.pop_front() {
                Some(b) => {
                    out.extend_from_slice(&b);
                    b.len() / self.format.channels
                }
                None => 0,
            }
        }
    }

    struct Provider {
        fail: bool,
    }

    impl SourceProvider for Provider {
        fn open(&mut self, _render: RenderSetup) -> Result<Box<dyn CaptureSource>> {
            if self.fail {
                bail!(crate::error::EngineError::SourceUnavailable("permission denied".into()));
            }
            Ok(Box::new(ScriptedSource {
                format: SourceFormat { sample_rate: 8000, channels: 2 },
                blocks: VecDeque::new(),
            }))
        }
    }

    fn stereo(left: f32, right: f32, frames: usize) -> Vec<f32> {
        (0..frames).flat_map(|_| [left, right]).collect()
    }

    fn connected() -> (CaptureMachine, Receiver<CaptureEvent>) {
        let (mut m, rx) = CaptureMachine::new(&EngineConfig::default());
        assert!(m.connect(&mut Provider { fail: false }, RenderSetup::default()));
        (m, rx)
    }

    #[test]
    fn failed_connect_stays_idle() {
        let (mut m, _rx) = CaptureMachine::new(&EngineConfig::default());
        assert!(!m.connect(&mut Provider { fail: true }, RenderSetup::default()));
        assert_eq!(m.state(), CaptureState::Idle);
        assert!(!m.is_connected());
        assert!(!m.arm());
    }

    #[test]
    fn illegal_transitions_are_noops() {
        let (mut m, _rx) = connected();
        assert!(m.stop().is_none());
        assert!(!m.start());
        assert!(!m.disarm());
        assert!(m.arm());
        assert!(!m.arm());
        assert!(m.start());
        assert!(!m.start());
        assert_eq!(m.state(), CaptureState::Recording);
    }

    #[test]
    fn quiet_signal_never_records() {
        let (mut m, rx) = connected();
        m.arm();
        for _ in 0..20 {
            m.feed(&stereo(0.05, 0.02, 400));
        }
        assert_eq!(m.state(), CaptureState::Armed);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn louder_channel_triggers_once() {
        let (mut m, rx) = connected();
        m.arm();
        m.feed(&stereo(0.0, 0.0, 400));
        m.feed(&stereo(0.01, 0.9, 400));
        assert_eq!(m.state(), CaptureState::Recording);
        assert!(matches!(rx.try_recv(), Ok(CaptureEvent::ThresholdExceeded { .. })));

        m.feed(&stereo(0.0, 0.9, 400));
        assert!(rx.try_recv().is_err());
        assert_eq!(m.recorded_frames(), 800);
        assert_eq!(m.recorded_duration(), Duration::from_millis(100));

        let rec = m.stop().unwrap();
        assert_eq!(rec.buffer.frames(), 800);
        assert_eq!(rec.buffer.channel(1).unwrap()[0], 0.9);
        assert_eq!(rx.try_recv(), Ok(CaptureEvent::RecordingStopped { frames: 800, duration_secs: 0.1 }));

        // Needs re-arming before anything records again.
        m.feed(&stereo(0.9, 0.9, 400));
        assert_eq!(m.state(), CaptureState::Idle);
    }

    #[test]
    fn disarm_produces_nothing() {
        let (mut m, rx) = connected();
        m.arm();
        assert!(m.disarm());
        m.feed(&stereo(1.0, 1.0, 400));
        assert_eq!(m.state(), CaptureState::Idle);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn tick_pulls_from_source_and_encodes() {
        let (mut m, _rx) = CaptureMachine::new(&EngineConfig::default());
        m.set_encoder(Box::new(WavEncoder));
        let blocks = VecDeque::from(vec![stereo(0.5, 0.5, 256), stereo(0.2, -0.2, 256)]);
        m.attach(Box::new(ScriptedSource {
            format: SourceFormat { sample_rate: 8000, channels: 2 },
            blocks,
        }));
        m.arm();
        assert_eq!(m.tick(), 256);
        assert_eq!(m.tick(), 256);
        assert_eq!(m.tick(), 0);
        assert!(!m.live_waveform().is_empty());

        let rec = m.stop().unwrap();
        assert_eq!(rec.buffer.frames(), 512);
        assert!(rec.blob.is_some_and(|b| b.starts_with(b"RIFF")));
    }

    #[test]
    fn new_take_resets_live_waveform() {
        let (mut m, _rx) = connected();
        m.arm();
        m.start();
        m.feed(&stereo(0.5, 0.5, 640));
        let first = m.live_waveform().len();
        m.stop();
        m.arm();
        m.start();
        m.feed(&stereo(0.5, 0.5, 64));
        assert!(m.live_waveform().len() < first);
    }
}
