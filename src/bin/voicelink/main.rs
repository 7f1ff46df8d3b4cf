//! VoiceLink terminal front end: one live voice session driven from stdin.
//!
//! The session engine runs on its own threads; this loop only renders
//! observer events and forwards single-line commands (mute, status, quit).

mod cli_utils;

use anyhow::Result;
use clap::Parser;
use crossbeam_channel::{select, unbounded, Receiver};
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use voicelink::audio::CpalBackend;
use voicelink::config::AppConfig;
use voicelink::transport::WebSocketConnector;
use voicelink::{
    init_logging, init_tracing, log_debug, log_file_path, log_panic, ConnectionState,
    SessionController, SessionEvent,
};

use crate::cli_utils::{level_bar, list_devices, parse_command, Command};

fn main() -> Result<()> {
    let mut config = AppConfig::parse();
    if config.list_devices {
        return list_devices();
    }
    config.validate()?;
    init_logging(&config);
    init_tracing(&config);
    std::panic::set_hook(Box::new(|info| log_panic(info)));
    log_debug("=== VoiceLink Started ===");
    log_debug(&format!("Log file: {:?}", log_file_path()));

    let session_config = config.session_config()?;
    let (event_tx, events) = unbounded();
    let controller = SessionController::new(
        config.engine_config(),
        Arc::new(CpalBackend::new()),
        Arc::new(WebSocketConnector::new()),
        Arc::new(event_tx),
    );
    controller.set_muted(config.muted);
    controller.connect(session_config)?;
    println!("Connecting to {} (voice {})...", config.model, config.voice);
    println!("Commands: m = mute/unmute, s = status, q = quit");

    let commands = spawn_stdin_reader();
    let outcome = run_loop(&controller, &events, &commands);
    controller.disconnect();
    log_debug("=== VoiceLink Exiting ===");
    outcome
}

fn spawn_stdin_reader() -> Receiver<Command> {
    let (tx, rx) = unbounded();
    std::thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            match parse_command(&line) {
                Some(command) => {
                    if tx.send(command).is_err() {
                        return;
                    }
                }
                None if line.trim().is_empty() => {}
                None => eprintln!("Unknown command '{}'. Type h for help.", line.trim()),
            }
        }
        let _ = tx.send(Command::Quit);
    });
    rx
}

fn run_loop(
    controller: &SessionController,
    events: &Receiver<SessionEvent>,
    commands: &Receiver<Command>,
) -> Result<()> {
    let stdout = io::stdout();
    loop {
        select! {
            recv(events) -> event => {
                let Ok(event) = event else { return Ok(()) };
                let mut out = stdout.lock();
                match event {
                    SessionEvent::State(state) => {
                        writeln!(out, "[{}]", state.label())?;
                        match state {
                            ConnectionState::Disconnected => return Ok(()),
                            ConnectionState::Error => {
                                let detail = controller
                                    .last_error()
                                    .map(|err| err.to_string())
                                    .unwrap_or_else(|| "unknown error".to_string());
                                anyhow::bail!("session failed: {detail}");
                            }
                            ConnectionState::Connecting | ConnectionState::Connected => {}
                        }
                    }
                    SessionEvent::Transcription { text: Some(text), is_model } => {
                        let speaker = if is_model { "model" } else { "you" };
                        writeln!(out, "{speaker}: {text}")?;
                    }
                    SessionEvent::Transcription { text: None, .. } => {
                        writeln!(out, "(interrupted)")?;
                    }
                    SessionEvent::Error(err) if err.needs_user_action() => {
                        writeln!(out, "{err}. {}", voicelink::audio::mic_permission_hint())?;
                    }
                    SessionEvent::Error(_)
                    | SessionEvent::Volume(_)
                    | SessionEvent::Audio { .. } => {}
                }
            }
            recv(commands) -> command => {
                let command = command.unwrap_or(Command::Quit);
                let mut out = stdout.lock();
                match command {
                    Command::ToggleMute => {
                        let muted = !controller.is_muted();
                        controller.set_muted(muted);
                        writeln!(out, "{}", if muted { "microphone muted" } else { "microphone live" })?;
                    }
                    Command::Status => {
                        let stats = controller.capture_stats();
                        writeln!(
                            out,
                            "state={} mic {} speaker {} sent={} dropped={} playing={}",
                            controller.state(),
                            level_bar(controller.input_level(), 10),
                            level_bar(controller.output_level(), 10),
                            stats.frames_sent,
                            stats.frames_dropped,
                            controller.in_flight_playback(),
                        )?;
                    }
                    Command::Help => {
                        writeln!(out, "m = mute/unmute, s = status, q = quit")?;
                    }
                    Command::Quit => return Ok(()),
                }
            }
        }
    }
}
