// src/effects/gate.rs

use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use serde::{Deserialize, Serialize};

use crate::dsp;

/// Envelope level the gate opens at when `threshold == 0.0`.
pub const THRESHOLD_FLOOR: f32 = 0.001;
/// Envelope level the gate opens at when `threshold == 1.0`.
pub const THRESHOLD_CEILING: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateParams {
    /// Sensitivity in [0, 1], mapped linearly onto the floor..ceiling range.
    pub threshold: f32,
    /// Depth of attenuation when fully closed, [0, 1].
    pub amount: f32,
    pub enabled: bool,
    pub attack_ms: f32,
    pub release_ms: f32,
    /// Gain smoothing while the gate opens. Short, so transients survive.
    pub open_ms: f32,
    /// Gain smoothing while the gate closes. Long, so it doesn't chatter.
    pub close_ms: f32,
}

impl Default for GateParams {
    fn default() -> Self {
        Self {
            threshold: 0.1,
            amount: 0.8,
            enabled: false,
            attack_ms: 1.0,
            release_ms: 50.0,
            open_ms: 2.0,
            close_ms: 80.0,
        }
    }
}

impl GateParams {
    pub fn clamped(self) -> Self {
        Self {
            threshold: self.threshold.clamp(0.0, 1.0),
            amount: self.amount.clamp(0.0, 1.0),
            attack_ms: self.attack_ms.max(0.01),
            release_ms: self.release_ms.max(0.01),
            open_ms: self.open_ms.max(0.01),
            close_ms: self.close_ms.max(0.01),
            ..self
        }
    }
}

pub fn effective_threshold(threshold: f32) -> f32 {
    THRESHOLD_FLOOR + threshold.clamp(0.0, 1.0) * (THRESHOLD_CEILING - THRESHOLD_FLOOR)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GateCommand {
    Threshold(f32),
    Amount(f32),
    Enabled(bool),
    Timing {
        attack_ms: f32,
        release_ms: f32,
        open_ms: f32,
        close_ms: f32,
    },
}

/// Commands pushed by `GateControl::set_params`.
const PARAMS_COMMANDS: usize = 4;

/// Control-side end of the parameter queue. Never blocks: when the render
/// side hasn't drained the queue yet, the update is refused.
pub struct GateControl {
    producer: HeapProd<GateCommand>,
}

/// Render-side end of the parameter queue.
pub struct GateCommands {
    consumer: HeapCons<GateCommand>,
}

pub fn gate_channel(capacity: usize) -> (GateControl, GateCommands) {
    let (producer, consumer) = HeapRb::<GateCommand>::new(capacity.max(1)).split();
    (GateControl { producer }, GateCommands { consumer })
}

impl GateControl {
    pub fn send(&mut self, cmd: GateCommand) -> bool {
        self.producer.try_push(cmd).is_ok()
    }

    pub fn set_threshold(&mut self, threshold: f32) -> bool {
        self.send(GateCommand::Threshold(threshold.clamp(0.0, 1.0)))
    }

    pub fn set_amount(&mut self, amount: f32) -> bool {
        self.send(GateCommand::Amount(amount.clamp(0.0, 1.0)))
    }

    pub fn set_enabled(&mut self, enabled: bool) -> bool {
        self.send(GateCommand::Enabled(enabled))
    }

    /// Queues a full parameter set. All or nothing: refused without pushing
    /// anything when the queue can't take every command.
    pub fn set_params(&mut self, params: GateParams) -> bool {
        if self.producer.vacant_len() < PARAMS_COMMANDS {
            return false;
        }
        let p = params.clamped();
        self.set_threshold(p.threshold)
            && self.set_amount(p.amount)
            && self.send(GateCommand::Timing {
                attack_ms: p.attack_ms,
                release_ms: p.release_ms,
                open_ms: p.open_ms,
                close_ms: p.close_ms,
            })
            && self.set_enabled(p.enabled)
    }
}

/// Block-synchronous noise gate for the render thread.
///
/// Channel 0 drives the detector and the resulting gain is applied to every
/// channel of the frame, so a stereo image stays centred. Envelope and gain
/// are recurrences: blocks must arrive in order.
pub struct GateProcessor {
    sample_rate: f32,
    commands: Option<GateCommands>,

    enabled: bool,
    threshold: f32,
    amount: f32,
    target_threshold: f32,
    target_amount: f32,

    env_attack: f32,
    env_release: f32,
    gain_open: f32,
    gain_close: f32,

    envelope: f32,
    gain: f32,
}

impl GateProcessor {
    pub fn new(sample_rate: u32, params: GateParams, commands: Option<GateCommands>) -> Self {
        let p = params.clamped();
        let mut gate = Self {
            sample_rate: sample_rate as f32,
            commands,
            enabled: p.enabled,
            threshold: p.threshold,
            amount: p.amount,
            target_threshold: p.threshold,
            target_amount: p.amount,
            env_attack: 0.0,
            env_release: 0.0,
            gain_open: 0.0,
            gain_close: 0.0,
            envelope: 0.0,
            gain: 1.0,
        };
        gate.set_timing(p.attack_ms, p.release_ms, p.open_ms, p.close_ms);
        gate
    }

    fn set_timing(&mut self, attack_ms: f32, release_ms: f32, open_ms: f32, close_ms: f32) {
        self.env_attack = dsp::time_to_coeff(attack_ms, self.sample_rate);
        self.env_release = dsp::time_to_coeff(release_ms, self.sample_rate);
        self.gain_open = dsp::time_to_coeff(open_ms, self.sample_rate);
        self.gain_close = dsp::time_to_coeff(close_ms, self.sample_rate);
    }

    fn reset_state(&mut self) {
        self.envelope = 0.0;
        self.gain = 1.0;
    }

    fn drain_commands(&mut self) {
        let Some(mut commands) = self.commands.take() else {
            return;
        };
        while let Some(cmd) = commands.consumer.try_pop() {
            match cmd {
                GateCommand::Threshold(t) => self.target_threshold = t.clamp(0.0, 1.0),
                GateCommand::Amount(a) => self.target_amount = a.clamp(0.0, 1.0),
                GateCommand::Enabled(on) => {
                    if on != self.enabled {
                        self.enabled = on;
                        self.reset_state();
                    }
                }
                GateCommand::Timing { attack_ms, release_ms, open_ms, close_ms } => {
                    self.set_timing(attack_ms, release_ms, open_ms, close_ms)
                }
            }
        }
        self.commands = Some(commands);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Current smoothed gain, 1.0 when open or disabled.
    pub fn gain(&self) -> f32 {
        self.gain
    }

    pub fn envelope(&self) -> f32 {
        self.envelope
    }

    /// Processes one interleaved block in place.
    /// GUARANTEE: No locks, no blocking, no allocations.
    pub fn process_interleaved(&mut self, buffer: &mut [f32], channels: usize) {
        self.drain_commands();

        if !self.enabled || channels == 0 {
            self.threshold = self.target_threshold;
            self.amount = self.target_amount;
            return;
        }

        let frames = buffer.len() / channels;
        if frames == 0 {
            return;
        }

        // Parameter changes ramp across the block instead of stepping.
        let thr_step = (self.target_threshold - self.threshold) / frames as f32;
        let amt_step = (self.target_amount - self.amount) / frames as f32;
        let mut thr = self.threshold;
        let mut amt = self.amount;

        for frame in buffer.chunks_exact_mut(channels) {
            thr += thr_step;
            amt += amt_step;
            let open_at = effective_threshold(thr);

            let level = frame[0].abs();
            let coeff = if level > self.envelope { self.env_attack } else { self.env_release };
            self.envelope = level + coeff * (self.envelope - level);

            let target = if self.envelope >= open_at {
                1.0
            } else {
                (1.0 - amt * (1.0 - self.envelope / open_at)).clamp(0.0, 1.0)
            };

            let coeff = if target > self.gain { self.gain_open } else { self.gain_close };
            self.gain = target + coeff * (self.gain - target);

            for s in frame.iter_mut() {
                *s *= self.gain;
            }
        }

        if self.envelope < 1e-20 {
            self.envelope = 0.0;
        }
        self.threshold = self.target_threshold;
        self.amount = self.target_amount;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn sine(freq: f32, amp: f32, frames: usize, sr: u32) -> Vec<f32> {
        (0..frames)
            .map(|i| amp * (2.0 * PI * freq * i as f32 / sr as f32).sin())
            .collect()
    }

    fn run_blocks(gate: &mut GateProcessor, data: &mut [f32], channels: usize) {
        for block in data.chunks_mut(128 * channels) {
            gate.process_interleaved(block, channels);
        }
    }

    #[test]
    fn disabled_gate_is_bit_exact_passthrough() {
        let params = GateParams { enabled: false, threshold: 1.0, amount: 1.0, ..Default::default() };
        let mut gate = GateProcessor::new(44_100, params, None);
        let input: Vec<f32> = (0..4096).map(|i| ((i * 7919) % 200) as f32 / 100.0 - 1.0).collect();
        let mut out = input.clone();
        run_blocks(&mut gate, &mut out, 2);
        assert_eq!(out, input);
        assert_eq!(gate.gain(), 1.0);
    }

    #[test]
    fn quiet_signal_is_attenuated_by_full_amount() {
        let params = GateParams { enabled: true, threshold: 0.5, amount: 1.0, ..Default::default() };
        let mut gate = GateProcessor::new(44_100, params, None);
        let mut data = sine(220.0, 0.001, 44_100, 44_100);
        run_blocks(&mut gate, &mut data, 1);
        let tail_peak = data[40_000..].iter().fold(0.0f32, |a, s| a.max(s.abs()));
        assert!(tail_peak < 5e-5, "tail peak {tail_peak}");
    }

    #[test]
    fn loud_signal_passes_at_unity() {
        let params = GateParams { enabled: true, threshold: 0.2, amount: 1.0, ..Default::default() };
        let mut gate = GateProcessor::new(44_100, params, None);
        let input = sine(220.0, 0.8, 44_100, 44_100);
        let mut out = input.clone();
        run_blocks(&mut gate, &mut out, 1);
        assert!((gate.gain() - 1.0).abs() < 1e-3);
        for i in 30_000..44_100 {
            assert!((out[i] - input[i]).abs() < 1e-3);
        }
    }

    #[test]
    fn zero_amount_never_attenuates() {
        let params = GateParams { enabled: true, threshold: 1.0, amount: 0.0, ..Default::default() };
        let mut gate = GateProcessor::new(48_000, params, None);
        let input = sine(100.0, 0.01, 9_600, 48_000);
        let mut out = input.clone();
        run_blocks(&mut gate, &mut out, 1);
        assert_eq!(out, input);
    }

    #[test]
    fn channel_zero_drives_both_channels() {
        let params = GateParams { enabled: true, threshold: 0.5, amount: 1.0, ..Default::default() };
        let mut gate = GateProcessor::new(44_100, params, None);
        // Left silent, right loud: the right channel still gets gated.
        let mut data: Vec<f32> = (0..44_100).flat_map(|_| [0.0f32, 0.9]).collect();
        run_blocks(&mut gate, &mut data, 2);
        let right_tail = data[80_000..].iter().skip(1).step_by(2).fold(0.0f32, |a, s| a.max(s.abs()));
        assert!(right_tail < 1e-3, "right tail {right_tail}");
    }

    #[test]
    fn gate_opens_faster_than_it_closes() {
        let sr = 44_100;
        let params = GateParams { enabled: true, threshold: 0.5, amount: 1.0, ..Default::default() };

        let mut closing = GateProcessor::new(sr, params, None);
        let mut silence = vec![0.0f32; 441];
        closing.process_interleaved(&mut silence, 1);
        let closed_by = 1.0 - closing.gain();

        let mut opening = GateProcessor::new(sr, params, None);
        let mut long_silence = vec![0.0f32; sr as usize];
        run_blocks(&mut opening, &mut long_silence, 1);
        let before = opening.gain();
        let mut burst = vec![0.9f32; 441];
        opening.process_interleaved(&mut burst, 1);
        let opened_by = opening.gain() - before;

        assert!(opened_by > closed_by);
    }

    #[test]
    fn commands_cross_the_queue_at_block_start() {
        let (mut control, commands) = gate_channel(16);
        let mut gate = GateProcessor::new(44_100, GateParams::default(), Some(commands));
        assert!(!gate.is_enabled());

        assert!(control.set_params(GateParams { enabled: true, amount: 1.0, threshold: 1.0, ..Default::default() }));
        let mut block = vec![0.0f32; 128];
        gate.process_interleaved(&mut block, 1);
        assert!(gate.is_enabled());

        assert!(control.set_enabled(false));
        let input = sine(440.0, 0.01, 128, 44_100);
        let mut out = input.clone();
        gate.process_interleaved(&mut out, 1);
        assert!(!gate.is_enabled());
        assert_eq!(gate.gain(), 1.0);
        assert_eq!(out, input);
    }

    #[test]
    fn full_queue_refuses_instead_of_blocking() {
        let (mut control, _commands) = gate_channel(2);
        assert!(control.set_threshold(0.1));
        assert!(control.set_threshold(0.2));
        assert!(!control.set_threshold(0.3));
    }

    #[test]
    fn partial_room_refuses_whole_param_set() {
        let (mut control, commands) = gate_channel(3);
        let mut gate = GateProcessor::new(44_100, GateParams::default(), Some(commands));
        assert!(!control.set_params(GateParams { enabled: true, ..Default::default() }));

        // Nothing was queued, so the render side stays as it was.
        let mut block = vec![0.0f32; 64];
        gate.process_interleaved(&mut block, 1);
        assert!(!gate.is_enabled());
    }

    #[test]
    fn timing_and_enable_toggles_keep_the_queue_attached() {
        let (mut control, commands) = gate_channel(16);
        let mut gate = GateProcessor::new(44_100, GateParams::default(), Some(commands));
        let mut block = vec![0.0f32; 64];
        for round in 0..3 {
            let on = round % 2 == 0;
            assert!(control.send(GateCommand::Timing { attack_ms: 2.0, release_ms: 20.0, open_ms: 1.0, close_ms: 40.0 }));
            assert!(control.set_enabled(on));
            gate.process_interleaved(&mut block, 1);
            assert_eq!(gate.is_enabled(), on);
        }
    }

    #[test]
    fn threshold_maps_onto_amplitude_range() {
        assert_eq!(effective_threshold(0.0), THRESHOLD_FLOOR);
        assert!((effective_threshold(1.0) - THRESHOLD_CEILING).abs() < 1e-6);
        assert_eq!(effective_threshold(7.0), effective_threshold(1.0));
    }
}
