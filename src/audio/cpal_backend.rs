//! Host audio through CPAL.
//!
//! `cpal::Stream` is not `Send`, so every stream lives on a dedicated thread
//! that owns it from construction to drop. The port handles only hold the
//! command channel and the thread handle.

use super::device::{AudioBackend, BlockCallback, InputPort, OutputPort, ScheduledVoice};
use super::dispatch::BlockDispatcher;
use super::mixer::{clock_seconds, Mixer};
use crate::log_debug;
use anyhow::{anyhow, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

const OPEN_TIMEOUT: Duration = Duration::from_secs(5);

/// Names of the host's input and output devices.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeviceList {
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CpalBackend;

impl CpalBackend {
    pub fn new() -> Self {
        Self
    }

    /// List device names so the CLI can expose a human-friendly selector.
    pub fn list_devices() -> Result<DeviceList> {
        let host = cpal::default_host();
        let inputs = host
            .input_devices()
            .context("no input devices available")?
            .filter_map(|d| d.name().ok())
            .collect();
        let outputs = host
            .output_devices()
            .context("no output devices available")?
            .filter_map(|d| d.name().ok())
            .collect();
        Ok(DeviceList { inputs, outputs })
    }
}

impl AudioBackend for CpalBackend {
    fn open_input(&self, preferred: Option<&str>, block_size: usize) -> Result<Box<dyn InputPort>> {
        Ok(Box::new(CpalInput::open(preferred, block_size)?))
    }

    fn open_output(&self, preferred: Option<&str>) -> Result<Box<dyn OutputPort>> {
        Ok(Box::new(CpalOutput::open(preferred)?))
    }
}

fn find_input_device(host: &cpal::Host, preferred: Option<&str>) -> Result<cpal::Device> {
    match preferred {
        Some(name) => host
            .input_devices()
            .context("no input devices available")?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| anyhow!("input device '{name}' not found")),
        None => host
            .default_input_device()
            .context("no default input device available"),
    }
}

fn find_output_device(host: &cpal::Host, preferred: Option<&str>) -> Result<cpal::Device> {
    match preferred {
        Some(name) => host
            .output_devices()
            .context("no output devices available")?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| anyhow!("output device '{name}' not found")),
        None => host
            .default_output_device()
            .context("no default output device available"),
    }
}

struct Opened {
    sample_rate: u32,
    device_name: String,
}

fn await_open(ready_rx: &Receiver<Result<Opened>>, what: &str) -> Result<Opened> {
    ready_rx
        .recv_timeout(OPEN_TIMEOUT)
        .map_err(|_| anyhow!("{what} device did not respond while opening"))?
}

enum InputCommand {
    Start(BlockCallback, Sender<Result<()>>),
    Stop(Sender<()>),
    Close,
}

/// Microphone owned by a capture thread.
pub struct CpalInput {
    sample_rate: u32,
    device_name: String,
    commands: Sender<InputCommand>,
    thread: Option<JoinHandle<()>>,
}

impl CpalInput {
    fn open(preferred: Option<&str>, block_size: usize) -> Result<Self> {
        let preferred = preferred.map(str::to_string);
        let (ready_tx, ready_rx) = bounded(1);
        let (commands, command_rx) = unbounded();
        let thread = std::thread::Builder::new()
            .name("voicelink-capture".into())
            .spawn(move || input_thread(preferred, block_size, ready_tx, command_rx))
            .context("failed to spawn capture thread")?;
        let opened = match await_open(&ready_rx, "input") {
            Ok(opened) => opened,
            Err(err) => {
                let _ = commands.send(InputCommand::Close);
                return Err(anyhow!("{err:#}. {}", mic_permission_hint()));
            }
        };
        log_debug(&format!(
            "capture device '{}' opened at {}Hz",
            opened.device_name, opened.sample_rate
        ));
        Ok(Self {
            sample_rate: opened.sample_rate,
            device_name: opened.device_name,
            commands,
            thread: Some(thread),
        })
    }
}

impl InputPort for CpalInput {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn device_name(&self) -> &str {
        &self.device_name
    }

    fn start(&mut self, on_block: BlockCallback) -> Result<()> {
        let (reply_tx, reply_rx) = bounded(1);
        self.commands
            .send(InputCommand::Start(on_block, reply_tx))
            .map_err(|_| anyhow!("capture thread has exited"))?;
        reply_rx
            .recv_timeout(OPEN_TIMEOUT)
            .map_err(|_| anyhow!("capture thread did not confirm start"))?
    }

    fn stop(&mut self) -> Result<()> {
        let (reply_tx, reply_rx) = bounded(1);
        if self.commands.send(InputCommand::Stop(reply_tx)).is_err() {
            return Ok(());
        }
        reply_rx
            .recv_timeout(OPEN_TIMEOUT)
            .map_err(|_| anyhow!("capture thread did not confirm stop"))
    }

    fn close(&mut self) -> Result<()> {
        let _ = self.commands.send(InputCommand::Close);
        if let Some(thread) = self.thread.take() {
            thread
                .join()
                .map_err(|_| anyhow!("capture thread panicked"))?;
        }
        Ok(())
    }
}

impl Drop for CpalInput {
    fn drop(&mut self) {
        let _ = self.commands.send(InputCommand::Close);
    }
}

fn input_thread(
    preferred: Option<String>,
    block_size: usize,
    ready_tx: Sender<Result<Opened>>,
    commands: Receiver<InputCommand>,
) {
    let host = cpal::default_host();
    let prepared = find_input_device(&host, preferred.as_deref()).and_then(|device| {
        let config = device.default_input_config()?;
        Ok((device, config))
    });
    let (device, default_config) = match prepared {
        Ok(found) => found,
        Err(err) => {
            let _ = ready_tx.send(Err(err));
            return;
        }
    };
    let format = default_config.sample_format();
    let config: StreamConfig = default_config.into();
    let device_name = device
        .name()
        .unwrap_or_else(|_| "unknown input device".to_string());
    let _ = ready_tx.send(Ok(Opened {
        sample_rate: config.sample_rate.0,
        device_name,
    }));

    let mut stream: Option<cpal::Stream> = None;
    for command in commands.iter() {
        match command {
            InputCommand::Start(on_block, reply) => {
                let result = build_input_stream(&device, &config, format, block_size, on_block)
                    .and_then(|s| {
                        s.play()?;
                        Ok(s)
                    });
                let _ = reply.send(result.map(|s| {
                    stream = Some(s);
                }));
            }
            InputCommand::Stop(reply) => {
                if let Some(s) = stream.take() {
                    if let Err(err) = s.pause() {
                        log_debug(&format!("failed to pause capture stream: {err}"));
                    }
                }
                let _ = reply.send(());
            }
            InputCommand::Close => break,
        }
    }
    drop(stream);
    log_debug("capture thread exiting");
}

fn build_input_stream(
    device: &cpal::Device,
    config: &StreamConfig,
    format: SampleFormat,
    block_size: usize,
    mut on_block: BlockCallback,
) -> Result<cpal::Stream> {
    let channels = usize::from(config.channels.max(1));
    let mut dispatcher = BlockDispatcher::new(block_size);
    let err_fn = |err| log_debug(&format!("audio_stream_error: {err}"));
    let stream = match format {
        SampleFormat::F32 => device.build_input_stream(
            config,
            move |data: &[f32], _| {
                dispatcher.push(data, channels, |sample| sample, |block| on_block(block));
            },
            err_fn,
            None,
        )?,
        SampleFormat::I16 => device.build_input_stream(
            config,
            move |data: &[i16], _| {
                dispatcher.push(
                    data,
                    channels,
                    |sample| sample as f32 / 32_768.0_f32,
                    |block| on_block(block),
                );
            },
            err_fn,
            None,
        )?,
        SampleFormat::U16 => device.build_input_stream(
            config,
            move |data: &[u16], _| {
                dispatcher.push(
                    data,
                    channels,
                    |sample| (sample as f32 - 32_768.0_f32) / 32_768.0_f32,
                    |block| on_block(block),
                );
            },
            err_fn,
            None,
        )?,
        other => return Err(anyhow!("unsupported sample format: {other:?}")),
    };
    Ok(stream)
}

/// Speaker owned by a playback thread that mixes scheduled voices.
pub struct CpalOutput {
    sample_rate: u32,
    device_name: String,
    frames_rendered: Arc<AtomicU64>,
    voices: Option<Sender<ScheduledVoice>>,
    stop_tx: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl CpalOutput {
    fn open(preferred: Option<&str>) -> Result<Self> {
        let preferred = preferred.map(str::to_string);
        let frames_rendered = Arc::new(AtomicU64::new(0));
        let (ready_tx, ready_rx) = bounded(1);
        let (stop_tx, stop_rx) = bounded(1);
        let (voices, voice_rx) = unbounded();
        let clock = Arc::clone(&frames_rendered);
        let thread = std::thread::Builder::new()
            .name("voicelink-playback".into())
            .spawn(move || output_thread(preferred, clock, voice_rx, ready_tx, stop_rx))
            .context("failed to spawn playback thread")?;
        let opened = match await_open(&ready_rx, "output") {
            Ok(opened) => opened,
            Err(err) => {
                let _ = stop_tx.try_send(());
                return Err(err);
            }
        };
        log_debug(&format!(
            "playback device '{}' opened at {}Hz",
            opened.device_name, opened.sample_rate
        ));
        Ok(Self {
            sample_rate: opened.sample_rate,
            device_name: opened.device_name,
            frames_rendered,
            voices: Some(voices),
            stop_tx,
            thread: Some(thread),
        })
    }
}

impl OutputPort for CpalOutput {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn device_name(&self) -> &str {
        &self.device_name
    }

    fn now(&self) -> f64 {
        clock_seconds(&self.frames_rendered, self.sample_rate)
    }

    fn schedule(&mut self, voice: ScheduledVoice) -> Result<()> {
        self.voices
            .as_ref()
            .ok_or_else(|| anyhow!("output device is closed"))?
            .send(voice)
            .map_err(|_| anyhow!("playback thread has exited"))
    }

    fn close(&mut self) -> Result<()> {
        self.voices = None;
        let _ = self.stop_tx.try_send(());
        if let Some(thread) = self.thread.take() {
            thread
                .join()
                .map_err(|_| anyhow!("playback thread panicked"))?;
        }
        Ok(())
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        let _ = self.stop_tx.try_send(());
    }
}

fn output_thread(
    preferred: Option<String>,
    frames_rendered: Arc<AtomicU64>,
    voices: Receiver<ScheduledVoice>,
    ready_tx: Sender<Result<Opened>>,
    stop_rx: Receiver<()>,
) {
    let host = cpal::default_host();
    let started = find_output_device(&host, preferred.as_deref()).and_then(|device| {
        let default_config = device.default_output_config()?;
        let format = default_config.sample_format();
        let config: StreamConfig = default_config.into();
        let mixer = Mixer::new(
            config.sample_rate.0,
            usize::from(config.channels.max(1)),
            frames_rendered,
            voices,
        );
        let stream = build_output_stream(&device, &config, format, mixer)?;
        stream.play()?;
        let device_name = device
            .name()
            .unwrap_or_else(|_| "unknown output device".to_string());
        Ok((
            stream,
            Opened {
                sample_rate: config.sample_rate.0,
                device_name,
            },
        ))
    });
    let stream = match started {
        Ok((stream, opened)) => {
            let _ = ready_tx.send(Ok(opened));
            stream
        }
        Err(err) => {
            let _ = ready_tx.send(Err(err));
            return;
        }
    };
    let _ = stop_rx.recv();
    if let Err(err) = stream.pause() {
        log_debug(&format!("failed to pause playback stream: {err}"));
    }
    drop(stream);
    log_debug("playback thread exiting");
}

fn build_output_stream(
    device: &cpal::Device,
    config: &StreamConfig,
    format: SampleFormat,
    mut mixer: Mixer,
) -> Result<cpal::Stream> {
    let err_fn = |err| log_debug(&format!("audio_stream_error: {err}"));
    let mut scratch: Vec<f32> = Vec::new();
    let stream = match format {
        SampleFormat::F32 => device.build_output_stream(
            config,
            move |data: &mut [f32], _| {
                mixer.render(data);
            },
            err_fn,
            None,
        )?,
        SampleFormat::I16 => device.build_output_stream(
            config,
            move |data: &mut [i16], _| {
                scratch.resize(data.len(), 0.0);
                mixer.render(&mut scratch);
                for (out, sample) in data.iter_mut().zip(&scratch) {
                    *out = (sample * 32_767.0).round() as i16;
                }
            },
            err_fn,
            None,
        )?,
        SampleFormat::U16 => device.build_output_stream(
            config,
            move |data: &mut [u16], _| {
                scratch.resize(data.len(), 0.0);
                mixer.render(&mut scratch);
                for (out, sample) in data.iter_mut().zip(&scratch) {
                    *out = (sample * 32_767.0 + 32_768.0).round() as u16;
                }
            },
            err_fn,
            None,
        )?,
        other => return Err(anyhow!("unsupported sample format: {other:?}")),
    };
    Ok(stream)
}

/// OS-specific pointer for where microphone access is granted.
pub fn mic_permission_hint() -> &'static str {
    #[cfg(target_os = "macos")]
    {
        "macOS: System Settings > Privacy & Security > Microphone (enable your terminal)."
    }
    #[cfg(target_os = "linux")]
    {
        "Linux: check PipeWire/PulseAudio permissions and ensure the device is not muted."
    }
    #[cfg(target_os = "windows")]
    {
        "Windows: Settings > Privacy & Security > Microphone (allow access for your terminal)."
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        "Check OS microphone permissions."
    }
}
