// src/effects/mod.rs

pub mod equalizer;
pub mod gate;
