// src/lib.rs

pub mod analyzer;
pub mod buffer;
pub mod config;
pub mod console;
pub mod dsp;
pub mod effects;
pub mod engine;
pub mod error;
pub mod recorder;
pub mod slicer;
pub mod transform;
pub mod waveform;

pub use buffer::{PcmBuffer, Region};
pub use config::EngineConfig;
pub use engine::Engine;
pub use error::EngineError;
pub use recorder::{CaptureEvent, CaptureMachine, CaptureState, Recording};
