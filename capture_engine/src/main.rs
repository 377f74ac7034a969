// src/main.rs

use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use std::time::Duration;

use capture_engine::console::CaptureConsole;
use capture_engine::recorder::input::DefaultInputProvider;
use capture_engine::{Engine, EngineConfig};

fn load_config(path: Option<&String>) -> EngineConfig {
    let Some(path) = path else {
        return EngineConfig::default();
    };
    match EngineConfig::load_from_disk(path) {
        Ok(config) => config,
        Err(e) => {
            log::warn!("Could not load config {path}: {e:#}, using defaults");
            EngineConfig::default()
        }
    }
}

fn main() -> Result<(), anyhow::Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().collect();
    let config = load_config(args.get(1));

    let (engine, events) = Engine::new(config);
    let mut console = CaptureConsole::new(engine, events, &mut DefaultInputProvider);

    println!(
        "[A] Arm/Disarm | [S] Start | [SPACE] Stop | [G] Gate | [Up/Down] Threshold | [P] Reset peaks\r\n\
         [N] Normalize | [R] Reverse | [E] EQ | [B] Bitcrush | [D] Downsample | [T] Stretch\r\n\
         [C] Chop | [W] Write take.wav | [Q] Quit"
    );

    enable_raw_mode()?;

    // ~20 FPS
    let frame = Duration::from_millis(50);
    let result = (|| -> Result<(), anyhow::Error> {
        console.run_tick()?;
        loop {
            if event::poll(frame)? {
                if let Event::Key(ev) = event::read()? {
                    if ev.kind == KeyEventKind::Press {
                        if ev.code == KeyCode::Char('c') && ev.modifiers.contains(KeyModifiers::CONTROL) {
                            break;
                        }
                        if console.should_quit(ev.code) {
                            break;
                        }
                        console.handle_key(ev.code);
                    }
                }
            }
            console.run_tick()?;
        }
        Ok(())
    })();

    disable_raw_mode()?;
    println!("\r\nExiting.");
    result
}
