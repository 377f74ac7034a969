// src/console.rs

use std::fmt::Write as FmtWrite;
use std::io::{Write, stdout};
use std::path::Path;
use std::sync::mpsc::{Receiver, TryRecvError};

use anyhow::Result;
use crossterm::event::KeyCode;
use crossterm::{
    cursor::MoveTo,
    execute,
    terminal::{BeginSynchronizedUpdate, Clear, ClearType, EndSynchronizedUpdate},
};

use crate::analyzer::analyze_buffer;
use crate::buffer::PcmBuffer;
use crate::engine::Engine;
use crate::recorder::encoder::{ContainerEncoder, WavEncoder};
use crate::recorder::input::SourceProvider;
use crate::recorder::{CaptureEvent, CaptureState};
use crate::slicer::chop_at_transients;
use crate::transform::{self, StretchEvent};
use crate::waveform::{PeakEntry, WaveformView, render_static, terminal::render_ascii};

const GRID_COLS: usize = 120;
const GRID_ROWS: usize = 20;
const THRESHOLD_STEP: f32 = 0.02;

/// Terminal front end: one capture engine, one take at a time.
pub struct CaptureConsole {
    engine: Engine,
    events: Receiver<CaptureEvent>,

    take: Option<PcmBuffer>,
    blob: Option<Vec<u8>>,
    stretch: Option<Receiver<StretchEvent>>,
    message: String,

    cached_waveform_len: usize,
    force_redraw: bool,
    ascii_grid: Vec<String>,
    draw_buffer: String,
}

impl CaptureConsole {
    pub fn new(mut engine: Engine, events: Receiver<CaptureEvent>, provider: &mut dyn SourceProvider) -> Self {
        engine.capture_mut().set_encoder(Box::new(WavEncoder));
        let message = if engine.open(provider) {
            "Input open. [A] arm".to_string()
        } else {
            "No input device, capture disabled".to_string()
        };
        Self {
            engine,
            events,
            take: None,
            blob: None,
            stretch: None,
            message,
            cached_waveform_len: 0,
            force_redraw: true,
            ascii_grid: vec![String::new(); GRID_ROWS],
            draw_buffer: String::with_capacity(8192),
        }
    }

    pub fn should_quit(&self, key: KeyCode) -> bool {
        matches!(key, KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc)
    }

    pub fn handle_key(&mut self, key: KeyCode) {
        self.force_redraw = true;
        match key {
            KeyCode::Char('a') | KeyCode::Char('A') => self.toggle_arm(),
            KeyCode::Char('s') | KeyCode::Char('S') => {
                if self.engine.capture_mut().start() {
                    self.message = "Recording (manual start)".into();
                }
            }
            KeyCode::Char(' ') => {
                if let Some(rec) = self.engine.capture_mut().stop() {
                    self.finish_take(rec.buffer, rec.blob);
                }
            }
            KeyCode::Char('g') | KeyCode::Char('G') => {
                let enabled = !self.engine.config().gate.enabled;
                self.engine.set_gate_enabled(enabled);
                self.message = format!("Gate {}", if enabled { "on" } else { "off" });
            }
            KeyCode::Up => self.nudge_threshold(THRESHOLD_STEP),
            KeyCode::Down => self.nudge_threshold(-THRESHOLD_STEP),
            KeyCode::Char('p') | KeyCode::Char('P') => self.engine.reset_peaks(),
            KeyCode::Char('n') | KeyCode::Char('N') => self.edit_take("Normalized", transform::normalize),
            KeyCode::Char('r') | KeyCode::Char('R') => self.edit_take("Reversed", transform::reverse),
            KeyCode::Char('e') | KeyCode::Char('E') => {
                let eq = self.engine.config().eq;
                self.edit_take("EQ applied", |b| {
                    transform::apply_eq(b, &eq).unwrap_or_else(|e| {
                        log::warn!("EQ failed: {e:#}");
                        b.clone()
                    })
                });
            }
            KeyCode::Char('b') | KeyCode::Char('B') => {
                let bits = self.engine.config().bit_depth;
                self.edit_take(&format!("Bitcrushed to {bits} bits"), |b| transform::bitcrush(b, bits));
            }
            KeyCode::Char('d') | KeyCode::Char('D') => {
                let factor = self.engine.config().downsample_factor;
                self.edit_take(&format!("Downsampled by {factor}"), |b| transform::downsample(b, factor));
            }
            KeyCode::Char('t') | KeyCode::Char('T') => self.stretch_take(),
            KeyCode::Char('c') | KeyCode::Char('C') => self.chop_take(),
            KeyCode::Char('w') | KeyCode::Char('W') => {
                self.message = match self.write_take(Path::new("take.wav")) {
                    Ok(()) => "Saved take.wav".into(),
                    Err(e) => format!("Save failed: {e:#}"),
                };
            }
            _ => {}
        }
    }

    fn toggle_arm(&mut self) {
        let capture = self.engine.capture_mut();
        let changed = match capture.state() {
            CaptureState::Idle => capture.arm(),
            CaptureState::Armed => capture.disarm(),
            CaptureState::Recording => false,
        };
        if changed {
            self.message = format!("{:?}", capture.state());
        }
    }

    fn nudge_threshold(&mut self, delta: f32) {
        let capture = self.engine.capture_mut();
        capture.set_threshold(capture.threshold() + delta);
        self.message = format!("Threshold {:.2}", capture.threshold());
    }

    fn finish_take(&mut self, buffer: PcmBuffer, blob: Option<Vec<u8>>) {
        let profile = analyze_buffer(&buffer);
        self.message = format!(
            "Take: {:.2}s, peak {:.1} dBFS, rms {:.1} dBFS",
            buffer.duration_secs(),
            profile.max_sample_peak_db,
            profile.integrated_rms_db
        );
        self.take = Some(buffer);
        self.blob = blob;
    }

    fn edit_take(&mut self, label: &str, f: impl Fn(&PcmBuffer) -> PcmBuffer) {
        if self.stretch.is_some() {
            self.message = "Time-stretch still running".into();
            return;
        }
        if let Some(take) = self.take.as_ref() {
            self.take = Some(f(take));
            self.blob = None;
            self.message = label.to_string();
        }
    }

    fn stretch_take(&mut self) {
        if self.stretch.is_some() {
            return;
        }
        if let Some(take) = self.take.clone() {
            let ratio = self.engine.config().stretch_ratio;
            self.stretch = Some(transform::spawn_time_stretch(take, ratio));
            self.message = format!("Stretching x{ratio:.2}...");
        }
    }

    fn poll_stretch(&mut self) {
        let Some(rx) = self.stretch.as_ref() else {
            return;
        };
        loop {
            match rx.try_recv() {
                Ok(StretchEvent::Progress(p)) => self.message = format!("Stretching {:3.0}%", p * 100.0),
                Ok(StretchEvent::Finished(buffer)) => {
                    self.message = format!("Stretched to {:.2}s", buffer.duration_secs());
                    self.take = Some(buffer);
                    self.blob = None;
                    self.stretch = None;
                    self.force_redraw = true;
                    return;
                }
                Err(TryRecvError::Empty) => return,
                Err(TryRecvError::Disconnected) => {
                    self.message = "Time-stretch failed".into();
                    self.stretch = None;
                    return;
                }
            }
        }
    }

    fn chop_take(&mut self) {
        let Some(take) = self.take.as_ref() else {
            return;
        };
        let config = self.engine.config();
        self.message = match chop_at_transients(take, config.transient_threshold, config.min_silence_secs) {
            Ok(chops) => {
                let starts: Vec<String> = chops.iter().map(|c| format!("{:.2}", c.start_secs)).collect();
                format!("{} chop(s) at [{}]s", chops.len(), starts.join(", "))
            }
            Err(e) => format!("Chop failed: {e:#}"),
        };
    }

    fn write_take(&mut self, path: &Path) -> Result<()> {
        let Some(take) = self.take.as_ref() else {
            anyhow::bail!("nothing recorded yet");
        };
        if self.blob.is_none() {
            self.blob = Some(WavEncoder.encode(take)?);
        }
        if let Some(bytes) = self.blob.as_ref() {
            std::fs::write(path, bytes)?;
        }
        Ok(())
    }

    fn drain_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            match event {
                CaptureEvent::ThresholdExceeded { level } => {
                    self.message = format!("Auto-record at level {level:.2}");
                }
                // `stop()` already handed the take over directly.
                CaptureEvent::RecordingStopped { .. } => {}
            }
            self.force_redraw = true;
        }
    }

    fn update_ascii_grid(&mut self) {
        let capture = self.engine.capture();
        let peaks: Vec<PeakEntry> = match (capture.state(), self.take.as_ref()) {
            (CaptureState::Recording, _) => {
                let live = capture.live_waveform();
                live.since(live.len().saturating_sub(GRID_COLS)).to_vec()
            }
            (_, Some(take)) => render_static(take, 0, WaveformView::default(), GRID_COLS),
            _ => Vec::new(),
        };
        self.ascii_grid = render_ascii(&peaks, GRID_ROWS, None);
    }

    pub fn run_tick(&mut self) -> Result<()> {
        self.engine.tick();
        self.drain_events();
        self.poll_stretch();

        let capture = self.engine.capture();
        let wf_len = capture.live_waveform().len();
        let recording = capture.state() == CaptureState::Recording;
        let wf_changed = recording && wf_len != self.cached_waveform_len;
        if wf_changed || self.force_redraw {
            self.update_ascii_grid();
        }
        self.cached_waveform_len = wf_len;
        self.force_redraw = false;

        self.draw_buffer.clear();
        let _ = write!(self.draw_buffer, "{}", MoveTo(0, 0));
        for line in &self.ascii_grid {
            let _ = write!(self.draw_buffer, "{line}\x1b[K\r\n");
        }

        let _ = write!(self.draw_buffer, "{}", MoveTo(0, GRID_ROWS as u16));
        let _ = write!(self.draw_buffer, "{}", Clear(ClearType::UntilNewLine));
        let capture = self.engine.capture();
        let _ = write!(self.draw_buffer, "{:?} | thr {:.2} |", capture.state(), capture.threshold());
        for (ch, level) in self.engine.levels().iter().enumerate() {
            let _ = write!(
                self.draw_buffer,
                " ch{ch} {:6.1} dB (peak {:6.1})",
                level.instantaneous_db(),
                level.peak_held_db()
            );
        }
        if recording {
            let secs = capture.recorded_duration().as_secs();
            let _ = write!(self.draw_buffer, " | REC {:02}:{:02}", secs / 60, secs % 60);
        }
        let _ = write!(self.draw_buffer, "{}\r\n", Clear(ClearType::UntilNewLine));
        let _ = write!(self.draw_buffer, "{}{}", self.message, Clear(ClearType::UntilNewLine));

        let mut stdout = stdout();
        execute!(stdout, BeginSynchronizedUpdate)?;
        stdout.write_all(self.draw_buffer.as_bytes())?;
        execute!(stdout, EndSynchronizedUpdate)?;
        stdout.flush()?;
        Ok(())
    }
}
