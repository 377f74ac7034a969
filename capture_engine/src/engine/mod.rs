// src/engine/mod.rs

pub mod metering;

use std::sync::mpsc::Receiver;

use crate::config::EngineConfig;
use crate::effects::gate::{GateControl, GateParams, gate_channel};
use crate::recorder::input::{RenderSetup, SourceProvider};
use crate::recorder::{CaptureEvent, CaptureMachine};
use metering::LevelSnapshot;

const GATE_QUEUE_CAPACITY: usize = 64;

/// The one long-lived engine instance. `open` acquires the capture device and
/// wires the render-side gate to a control handle; `close` (or drop) releases
/// both.
pub struct Engine {
    config: EngineConfig,
    capture: CaptureMachine,
    gate: Option<GateControl>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> (Self, Receiver<CaptureEvent>) {
        let config = config.clamped();
        let (capture, events) = CaptureMachine::new(&config);
        (Self { config, capture, gate: None }, events)
    }

    pub fn open(&mut self, provider: &mut dyn SourceProvider) -> bool {
        self.close();
        let (control, commands) = gate_channel(GATE_QUEUE_CAPACITY);
        let setup = RenderSetup {
            gate_commands: Some(commands),
            gate_params: self.config.gate,
            eq: self.config.eq,
            meter_attack_ms: self.config.meter_attack_ms,
            meter_release_ms: self.config.meter_release_ms,
            ring_capacity: self.config.ring_capacity,
        };
        if !self.capture.connect(provider, setup) {
            return false;
        }
        self.gate = Some(control);
        true
    }

    pub fn close(&mut self) {
        if self.gate.take().is_some() || self.capture.is_connected() {
            log::info!("Engine closed");
        }
        self.capture.disconnect();
    }

    pub fn is_open(&self) -> bool {
        self.capture.is_connected()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn capture(&self) -> &CaptureMachine {
        &self.capture
    }

    pub fn capture_mut(&mut self) -> &mut CaptureMachine {
        &mut self.capture
    }

    pub fn tick(&mut self) -> usize {
        self.capture.tick()
    }

    /// Render-side levels when the source publishes them, otherwise the
    /// capture meter's.
    pub fn levels(&self) -> Vec<LevelSnapshot> {
        self.capture.render_levels().unwrap_or_else(|| self.capture.levels())
    }

    /// Peak-held drops to the current level on every meter the engine runs.
    pub fn reset_peaks(&mut self) {
        self.capture.reset_peaks();
    }

    fn with_gate(&mut self, f: impl FnOnce(&mut GateControl) -> bool) -> bool {
        match self.gate.as_mut() {
            Some(control) => f(control),
            None => false,
        }
    }

    /// Queue a gate update for the render side. `false` if the engine is
    /// closed or the queue is full; the stored config is updated either way.
    pub fn set_gate_threshold(&mut self, threshold: f32) -> bool {
        self.config.gate.threshold = threshold.clamp(0.0, 1.0);
        self.with_gate(|g| g.set_threshold(threshold))
    }

    pub fn set_gate_amount(&mut self, amount: f32) -> bool {
        self.config.gate.amount = amount.clamp(0.0, 1.0);
        self.with_gate(|g| g.set_amount(amount))
    }

    pub fn set_gate_enabled(&mut self, enabled: bool) -> bool {
        self.config.gate.enabled = enabled;
        self.with_gate(|g| g.set_enabled(enabled))
    }

    pub fn set_gate_params(&mut self, params: GateParams) -> bool {
        self.config.gate = params.clamped();
        self.with_gate(|g| g.set_params(params))
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::input::{CaptureSource, RenderChain, SourceFormat};
    use anyhow::{Result, anyhow};
    use std::sync::{Arc, Mutex};

    /// Builds a real render chain and keeps it so the test can play the
    /// device callback.
    struct LoopbackProvider {
        chain: Arc<Mutex<Option<RenderChain>>>,
    }

    impl SourceProvider for LoopbackProvider {
        fn open(&mut self, render: RenderSetup) -> Result<Box<dyn CaptureSource>> {
            let format = SourceFormat { sample_rate: 8000, channels: 1 };
            let (chain, reader) = RenderChain::new(format, render);
            *self.chain.lock().map_err(|_| anyhow!("poisoned"))? = Some(chain);
            Ok(Box::new(reader))
        }
    }

    struct NoDevice;

    impl SourceProvider for NoDevice {
        fn open(&mut self, _render: RenderSetup) -> Result<Box<dyn CaptureSource>> {
            Err(crate::error::EngineError::SourceUnavailable("no device".into()).into())
        }
    }

    #[test]
    fn closed_engine_refuses_gate_updates() {
        let (mut engine, _rx) = Engine::new(EngineConfig::default());
        assert!(!engine.open(&mut NoDevice));
        assert!(!engine.is_open());
        assert!(!engine.set_gate_enabled(true));
        assert!(engine.config().gate.enabled);
    }

    #[test]
    fn gate_updates_reach_render_chain() {
        let chain = Arc::new(Mutex::new(None));
        let mut provider = LoopbackProvider { chain: chain.clone() };
        let (mut engine, _rx) = Engine::new(EngineConfig::default());
        assert!(engine.open(&mut provider));

        assert!(engine.set_gate_params(GateParams { threshold: 1.0, amount: 1.0, enabled: true, ..GateParams::default() }));

        let quiet = vec![0.01f32; 800];
        {
            let mut guard = chain.lock().unwrap();
            let rc = guard.as_mut().unwrap();
            for _ in 0..20 {
                rc.process(&quiet[..]);
            }
        }
        let mut frames = 0;
        loop {
            let n = engine.tick();
            if n == 0 {
                break;
            }
            frames += n;
        }
        assert_eq!(frames, 16_000);
        // Render-side levels come back through telemetry; the gate pulled
        // the quiet signal far down.
        let levels = engine.levels();
        assert!(levels[0].instantaneous < 0.005, "{levels:?}");

        engine.close();
        assert!(!engine.is_open());
        assert!(!engine.set_gate_amount(0.5));
    }

    #[test]
    fn configured_eq_runs_on_the_captured_signal() {
        use crate::effects::equalizer::{EqParams, EqSettings, apply_eq};

        let eq = EqSettings { low: EqParams::low_shelf(300.0, 12.0), ..EqSettings::default() };
        let chain = Arc::new(Mutex::new(None));
        let mut provider = LoopbackProvider { chain: chain.clone() };
        let (mut engine, _rx) = Engine::new(EngineConfig { eq, ..EngineConfig::default() });
        assert!(engine.open(&mut provider));
        assert!(engine.capture_mut().arm());
        assert!(engine.capture_mut().start());

        let tone: Vec<f32> = (0..4000).map(|i| 0.1 * (i as f32 * 0.05).sin()).collect();
        {
            let mut guard = chain.lock().unwrap();
            let rc = guard.as_mut().unwrap();
            for block in tone.chunks(500) {
                rc.process(block);
            }
        }
        while engine.tick() > 0 {}
        let take = engine.capture_mut().stop().unwrap().buffer;

        let expected = apply_eq(&crate::buffer::PcmBuffer::new(vec![tone], 8000).unwrap(), &eq).unwrap();
        assert_eq!(take.frames(), expected.frames());
        for (x, y) in take.channel(0).unwrap().iter().zip(expected.channel(0).unwrap()) {
            assert!((x - y).abs() <= 1e-6);
        }
    }

    #[test]
    fn reset_peaks_reaches_render_side_levels() {
        let chain = Arc::new(Mutex::new(None));
        let mut provider = LoopbackProvider { chain: chain.clone() };
        let (mut engine, _rx) = Engine::new(EngineConfig::default());
        assert!(engine.open(&mut provider));

        let play = |block: &[f32], times: usize| {
            let mut guard = chain.lock().unwrap();
            let rc = guard.as_mut().unwrap();
            for _ in 0..times {
                rc.process(block);
            }
        };
        play(&[1.0f32; 800], 1);
        play(&[0.0f32; 800], 40);
        while engine.tick() > 0 {}
        let before = engine.levels()[0];
        assert_eq!(before.peak_held, 1.0);

        engine.reset_peaks();
        let now = engine.levels()[0];
        assert_eq!(now.peak_held, now.instantaneous);

        // The render meter itself was reset, not just the published copy.
        play(&[0.0f32; 800], 1);
        let after = engine.levels()[0];
        assert!(after.peak_held < 0.5, "{after:?}");
    }
}
