//! Session lifecycle: connect, route inbound traffic, tear down.
//!
//! `connect` only flips the state to `Connecting` and spawns a worker. The
//! worker acquires the microphone, the speaker, and the remote stream in that
//! order, then pumps stream events until the session ends. Each attempt
//! carries its own [`CancelToken`]; every state change and every resource
//! hand-off checks it, so a worker from an abandoned attempt can never touch
//! the next session.
//!
//! State changes are decided under the lifecycle lock but reported after it
//! is released, through an ordered notice queue, so observers may call back
//! into the controller.

use super::capture::{CaptureCounters, CaptureEncoder, CaptureStats};
use super::events::SessionObserver;
use super::playback::PlaybackScheduler;
use super::{ConnectionState, SessionConfig};
use crate::audio::{AudioBackend, InputPort, LiveMeter, Resampler, VolumeMeter};
use crate::cancel::CancelToken;
use crate::codec::{FrameDecoder, CAPTURE_RATE, PLAYBACK_RATE};
use crate::config::EngineConfig;
use crate::error::SessionError;
use crate::lock::lock_or_recover;
use crate::protocol::{ServerContent, ServerMessage};
use crate::transport::{Connector, SessionSetup, StreamEvent, StreamWriter};
use crate::{log_debug, log_debug_content};
use anyhow::Result;
use crossbeam_channel::RecvTimeoutError;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const EVENT_POLL: Duration = Duration::from_millis(50);

/// Public control surface of the voice engine. Only one session runs at a time.
pub struct SessionController {
    engine: EngineConfig,
    backend: Arc<dyn AudioBackend>,
    connector: Arc<dyn Connector>,
    shared: Arc<Shared>,
}

struct Shared {
    observer: Arc<dyn SessionObserver>,
    lifecycle: Mutex<Lifecycle>,
    resources: Mutex<Resources>,
    notices: Mutex<VecDeque<Notice>>,
    flushing: AtomicBool,
    muted: Arc<AtomicBool>,
    input_level: LiveMeter,
    output_level: LiveMeter,
    counters: Arc<CaptureCounters>,
}

#[derive(Default)]
struct Lifecycle {
    state: ConnectionState,
    attempt: Option<CancelToken>,
    last_error: Option<SessionError>,
}

enum Notice {
    State(ConnectionState),
    Error(SessionError),
}

/// How a session attempt ended.
enum Ending {
    Failed(SessionError),
    /// The endpoint closed the stream.
    RemoteClosed(String),
}

#[derive(Default)]
struct Resources {
    input: Option<Box<dyn InputPort>>,
    playback: Option<PlaybackScheduler>,
    stream: Option<StreamWriter>,
}

impl SessionController {
    pub fn new(
        engine: EngineConfig,
        backend: Arc<dyn AudioBackend>,
        connector: Arc<dyn Connector>,
        observer: Arc<dyn SessionObserver>,
    ) -> Self {
        Self {
            engine,
            backend,
            connector,
            shared: Arc::new(Shared {
                observer,
                lifecycle: Mutex::new(Lifecycle::default()),
                resources: Mutex::new(Resources::default()),
                notices: Mutex::new(VecDeque::new()),
                flushing: AtomicBool::new(false),
                muted: Arc::new(AtomicBool::new(false)),
                input_level: LiveMeter::new(),
                output_level: LiveMeter::new(),
                counters: Arc::new(CaptureCounters::default()),
            }),
        }
    }

    /// Start a session. Returns immediately; progress arrives through the
    /// observer. Rejected while another session is connecting or connected.
    pub fn connect(&self, config: SessionConfig) -> Result<(), SessionError> {
        let mut lifecycle = lock_or_recover(&self.shared.lifecycle, "session lifecycle");
        if lifecycle.state.is_active() {
            return Err(SessionError::SessionBusy);
        }
        let token = CancelToken::new();
        lifecycle.attempt = Some(token.clone());
        lifecycle.last_error = None;
        lifecycle.state = ConnectionState::Connecting;
        self.shared.counters.reset();
        self.shared.input_level.set(0.0);
        self.shared.output_level.set(0.0);
        tracing::info!(model = %self.engine.model, voice = %config.persona_voice_id(), "session connecting");
        log_debug("session connecting");
        self.shared
            .queue_notice(Notice::State(ConnectionState::Connecting));

        let worker = SessionWorker {
            token: token.clone(),
            engine: self.engine.clone(),
            config,
            backend: Arc::clone(&self.backend),
            connector: Arc::clone(&self.connector),
            shared: Arc::clone(&self.shared),
        };
        let spawned = std::thread::Builder::new()
            .name("voicelink-session".into())
            .spawn(move || worker.run());
        let result = match spawned {
            Ok(_) => Ok(()),
            Err(err) => {
                let error = SessionError::Worker(err.to_string());
                token.cancel();
                lifecycle.attempt = None;
                lifecycle.state = ConnectionState::Error;
                lifecycle.last_error = Some(error.clone());
                self.shared.queue_notice(Notice::Error(error.clone()));
                self.shared
                    .queue_notice(Notice::State(ConnectionState::Error));
                Err(error)
            }
        };
        drop(lifecycle);
        self.shared.flush_notices();
        result
    }

    /// Tear the session down. Safe from any state and safe to repeat.
    pub fn disconnect(&self) {
        let taken = {
            let mut lifecycle = lock_or_recover(&self.shared.lifecycle, "session lifecycle");
            if let Some(token) = lifecycle.attempt.take() {
                token.cancel();
            }
            if lifecycle.state != ConnectionState::Disconnected {
                lifecycle.state = ConnectionState::Disconnected;
                tracing::info!("session disconnected by caller");
                log_debug("session disconnected by caller");
                self.shared
                    .queue_notice(Notice::State(ConnectionState::Disconnected));
            }
            self.shared.take_resources()
        };
        self.shared.flush_notices();
        self.shared.release(taken);
    }

    /// Suppress transmission without stopping capture. Valid in any state.
    pub fn set_muted(&self, muted: bool) {
        let was = self.shared.muted.swap(muted, Ordering::AcqRel);
        if was != muted {
            log_debug(&format!("microphone {}", if muted { "muted" } else { "unmuted" }));
        }
        if muted {
            self.shared.input_level.set(0.0);
            self.shared.observer.on_volume_change(0.0);
        }
    }

    pub fn is_muted(&self) -> bool {
        self.shared.muted.load(Ordering::Acquire)
    }

    pub fn state(&self) -> ConnectionState {
        lock_or_recover(&self.shared.lifecycle, "session lifecycle").state
    }

    /// The failure behind the current `Error` state, if any.
    pub fn last_error(&self) -> Option<SessionError> {
        lock_or_recover(&self.shared.lifecycle, "session lifecycle")
            .last_error
            .clone()
    }

    /// Most recent microphone level (0 while muted).
    pub fn input_level(&self) -> f32 {
        self.shared.input_level.level()
    }

    /// Level of the most recent inbound chunk.
    pub fn output_level(&self) -> f32 {
        self.shared.output_level.level()
    }

    pub fn in_flight_playback(&self) -> usize {
        lock_or_recover(&self.shared.resources, "session resources")
            .playback
            .as_mut()
            .map_or(0, PlaybackScheduler::in_flight_len)
    }

    pub fn capture_stats(&self) -> CaptureStats {
        self.shared.counters.snapshot()
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl Shared {
    /// Connecting -> Connected. False when the attempt is stale or the
    /// session already advanced.
    fn mark_connected(&self, token: &CancelToken) -> bool {
        {
            let mut lifecycle = lock_or_recover(&self.lifecycle, "session lifecycle");
            if token.is_cancelled() || lifecycle.state != ConnectionState::Connecting {
                return false;
            }
            lifecycle.state = ConnectionState::Connected;
            tracing::info!("session connected");
            log_debug("session connected");
            self.queue_notice(Notice::State(ConnectionState::Connected));
        }
        self.flush_notices();
        true
    }

    /// End the attempt and run cleanup. Ignored for stale attempts.
    ///
    /// A remote close before `setupComplete` means the endpoint rejected the
    /// setup (bad key, unknown model), so it counts as an open failure.
    fn finish(&self, token: &CancelToken, ending: Ending) {
        let taken = {
            let mut lifecycle = lock_or_recover(&self.lifecycle, "session lifecycle");
            if token.is_cancelled() {
                return;
            }
            token.cancel();
            lifecycle.attempt = None;
            let error = match ending {
                Ending::Failed(error) => Some(error),
                Ending::RemoteClosed(reason) if lifecycle.state == ConnectionState::Connecting => {
                    Some(SessionError::TransportOpen(format!(
                        "stream closed before setup completed: {reason}"
                    )))
                }
                Ending::RemoteClosed(reason) => {
                    log_debug(&format!("stream closed: {reason}"));
                    None
                }
            };
            let state = match &error {
                Some(error) => {
                    tracing::warn!(kind = error.label(), error = %error, "session failed");
                    log_debug(&format!("session failed: {error}"));
                    lifecycle.last_error = Some(error.clone());
                    self.queue_notice(Notice::Error(error.clone()));
                    ConnectionState::Error
                }
                None => {
                    tracing::info!("session ended by endpoint");
                    log_debug("session ended by endpoint");
                    ConnectionState::Disconnected
                }
            };
            lifecycle.state = state;
            self.queue_notice(Notice::State(state));
            self.take_resources()
        };
        self.flush_notices();
        self.release(taken);
    }

    fn fail(&self, token: &CancelToken, error: SessionError) {
        self.finish(token, Ending::Failed(error));
    }

    /// Callers hold the lifecycle lock, so notices queue in transition order.
    fn queue_notice(&self, notice: Notice) {
        lock_or_recover(&self.notices, "session notices").push_back(notice);
    }

    /// Deliver queued notices with no controller lock held. One thread
    /// delivers at a time; a notice queued from inside an observer callback
    /// is delivered by the outer call once that callback returns.
    fn flush_notices(&self) {
        loop {
            if self.flushing.swap(true, Ordering::AcqRel) {
                return;
            }
            loop {
                let next = lock_or_recover(&self.notices, "session notices").pop_front();
                match next {
                    Some(Notice::State(state)) => self.observer.on_connection_state_change(state),
                    Some(Notice::Error(error)) => self.observer.on_error(&error),
                    None => break,
                }
            }
            self.flushing.store(false, Ordering::Release);
            if lock_or_recover(&self.notices, "session notices").is_empty() {
                return;
            }
        }
    }

    /// Hand a resource to the session unless the attempt was cancelled
    /// meanwhile; in that case the resource comes back to the caller.
    fn adopt<T>(
        &self,
        token: &CancelToken,
        value: T,
        slot: impl FnOnce(&mut Resources, T),
    ) -> Option<T> {
        let mut resources = lock_or_recover(&self.resources, "session resources");
        if token.is_cancelled() {
            return Some(value);
        }
        slot(&mut resources, value);
        None
    }

    /// Detach every resource from the session. Callers hold the lifecycle
    /// lock, so a newer attempt cannot adopt anything until this returns.
    fn take_resources(&self) -> Resources {
        std::mem::take(&mut *lock_or_recover(&self.resources, "session resources"))
    }

    /// One best-effort pass over detached resources. Each step runs even if
    /// an earlier one failed or panicked.
    fn release(&self, resources: Resources) {
        let Resources {
            mut input,
            mut playback,
            stream,
        } = resources;

        if let Some(port) = input.as_mut() {
            best_effort("stop capture", || port.stop());
            best_effort("release microphone", || port.close());
        }
        if let Some(scheduler) = playback.as_mut() {
            best_effort("cancel playback", || {
                let cancelled = scheduler.interrupt();
                if cancelled > 0 {
                    log_debug(&format!("cancelled {cancelled} playback buffers on teardown"));
                }
                Ok(())
            });
        }
        if let Some(writer) = stream.as_ref() {
            best_effort("close stream", || writer.close());
        }
        if let Some(scheduler) = playback.as_mut() {
            best_effort("release output", || scheduler.close());
        }
        self.input_level.set(0.0);
        self.output_level.set(0.0);
    }
}

fn best_effort(step: &str, action: impl FnOnce() -> Result<()>) {
    match panic::catch_unwind(AssertUnwindSafe(action)) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            tracing::warn!(step, error = %err, "cleanup step failed");
            log_debug(&format!("cleanup step '{step}' failed: {err:#}"));
        }
        Err(_) => {
            tracing::error!(step, "cleanup step panicked");
            log_debug(&format!("cleanup step '{step}' panicked"));
        }
    }
}

/// Everything one connection attempt needs, moved onto its own thread.
struct SessionWorker {
    token: CancelToken,
    engine: EngineConfig,
    config: SessionConfig,
    backend: Arc<dyn AudioBackend>,
    connector: Arc<dyn Connector>,
    shared: Arc<Shared>,
}

impl SessionWorker {
    fn run(self) {
        if let Err(error) = self.acquire() {
            self.shared.fail(&self.token, error);
            return;
        }
        let events = match self.open_stream() {
            Ok(Some(events)) => events,
            Ok(None) => return,
            Err(error) => {
                self.shared.fail(&self.token, error);
                return;
            }
        };
        self.pump(events);
    }

    /// Microphone first, then the speaker.
    fn acquire(&self) -> Result<(), SessionError> {
        let input = self
            .backend
            .open_input(self.engine.input_device.as_deref(), self.engine.block_size)
            .map_err(|err| SessionError::MicrophoneUnavailable(format!("{err:#}")))?;
        log_debug(&format!(
            "microphone '{}' at {}Hz",
            input.device_name(),
            input.sample_rate()
        ));
        if let Some(mut input) = self
            .shared
            .adopt(&self.token, input, |r, v| r.input = Some(v))
        {
            best_effort("release microphone", || input.close());
            return Ok(());
        }

        let output = self
            .backend
            .open_output(self.engine.output_device.as_deref())
            .map_err(|err| SessionError::OutputUnavailable(format!("{err:#}")))?;
        log_debug(&format!(
            "speaker '{}' at {}Hz",
            output.device_name(),
            output.sample_rate()
        ));
        let scheduler = PlaybackScheduler::new(output);
        if let Some(mut scheduler) = self
            .shared
            .adopt(&self.token, scheduler, |r, v| r.playback = Some(v))
        {
            best_effort("release output", || scheduler.close());
        }
        Ok(())
    }

    fn open_stream(&self) -> Result<Option<crossbeam_channel::Receiver<StreamEvent>>, SessionError> {
        if self.token.is_cancelled() {
            return Ok(None);
        }
        let setup = SessionSetup {
            endpoint: self.engine.endpoint.clone(),
            model: self.engine.model.clone(),
            voice: self.config.persona_voice_id().to_string(),
            system_instruction: self.config.system_instruction().to_string(),
            credential: self.config.credential_token().to_string(),
            transcribe_input: self.engine.transcribe_input,
            outbound_capacity: self.engine.outbound_capacity,
        };
        let handle = self
            .connector
            .open(&setup)
            .map_err(|err| SessionError::TransportOpen(format!("{err:#}")))?;
        let writer = handle.writer.clone();
        if let Some(writer) = self
            .shared
            .adopt(&self.token, writer, |r, v| r.stream = Some(v))
        {
            best_effort("close stream", || writer.close());
            return Ok(None);
        }
        Ok(Some(handle.events))
    }

    fn pump(&self, events: crossbeam_channel::Receiver<StreamEvent>) {
        let decoder = FrameDecoder::new(PLAYBACK_RATE);
        let output_meter = VolumeMeter::new(self.engine.volume_gain);
        while !self.token.is_cancelled() {
            match events.recv_timeout(EVENT_POLL) {
                Ok(StreamEvent::Message(message)) => {
                    self.handle_message(message, &decoder, &output_meter)
                }
                Ok(StreamEvent::Closed(reason)) => {
                    self.shared.finish(&self.token, Ending::RemoteClosed(reason));
                    return;
                }
                Ok(StreamEvent::Failed(reason)) => {
                    self.shared
                        .fail(&self.token, SessionError::TransportRuntime(reason));
                    return;
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    self.shared.fail(
                        &self.token,
                        SessionError::TransportRuntime("stream ended unexpectedly".to_string()),
                    );
                    return;
                }
            }
        }
        log_debug("session worker exiting");
    }

    fn handle_message(&self, message: ServerMessage, decoder: &FrameDecoder, meter: &VolumeMeter) {
        if message.setup_complete.is_some() && self.shared.mark_connected(&self.token) {
            if let Err(error) = self.start_capture() {
                self.shared.fail(&self.token, error);
                return;
            }
        }
        if let Some(content) = &message.server_content {
            self.handle_content(content, decoder, meter);
        }
        if let Some(go_away) = &message.go_away {
            let time_left = go_away.time_left.as_deref().unwrap_or("unknown");
            tracing::warn!(time_left, "endpoint announced shutdown");
            log_debug(&format!("endpoint going away, time left {time_left}"));
        }
    }

    fn start_capture(&self) -> Result<(), SessionError> {
        let mut resources = lock_or_recover(&self.shared.resources, "session resources");
        if self.token.is_cancelled() {
            return Ok(());
        }
        let Some(writer) = resources.stream.clone() else {
            return Ok(());
        };
        let Some(input) = resources.input.as_mut() else {
            return Ok(());
        };
        let resampler = Resampler::for_blocks(input.sample_rate(), CAPTURE_RATE, self.engine.block_size)
            .map_err(|err| SessionError::MicrophoneUnavailable(format!("{err:#}")))?;
        let mut encoder = CaptureEncoder::new(
            VolumeMeter::new(self.engine.volume_gain),
            resampler,
            writer,
            Arc::clone(&self.shared.observer),
            Arc::clone(&self.shared.muted),
            self.token.clone(),
            self.shared.input_level.clone(),
            Arc::clone(&self.shared.counters),
        );
        input
            .start(Box::new(move |block| encoder.process_block(block)))
            .map_err(|err| SessionError::MicrophoneUnavailable(format!("{err:#}")))?;
        tracing::info!(block_size = self.engine.block_size, "capture started");
        log_debug("capture started");
        Ok(())
    }

    fn handle_content(&self, content: &ServerContent, decoder: &FrameDecoder, meter: &VolumeMeter) {
        let observer = &self.shared.observer;
        // Interrupt before scheduling: audio in the same message already
        // belongs to the turn that follows the barge-in.
        if content.interrupted {
            let cancelled = lock_or_recover(&self.shared.resources, "session resources")
                .playback
                .as_mut()
                .map_or(0, PlaybackScheduler::interrupt);
            tracing::info!(cancelled, "playback interrupted");
            log_debug(&format!("barge-in: cancelled {cancelled} buffers"));
            self.shared.output_level.set(0.0);
            observer.on_transcription(None, true);
        }

        for blob in content.audio_parts() {
            let audio = match decoder.decode(blob) {
                Ok(audio) => audio,
                Err(err) => {
                    tracing::warn!(error = %err, "dropping undecodable audio chunk");
                    log_debug(&format!("audio decode failed: {err:#}"));
                    continue;
                }
            };
            observer.on_audio_data(&audio.samples, audio.sample_rate);
            self.shared.output_level.set(meter.level(&audio.samples));

            let mut resources = lock_or_recover(&self.shared.resources, "session resources");
            if self.token.is_cancelled() {
                return;
            }
            if let Some(playback) = resources.playback.as_mut() {
                if let Err(err) = playback.schedule(audio) {
                    tracing::warn!(error = %err, "dropping audio chunk");
                    log_debug(&format!("playback schedule failed: {err:#}"));
                }
            }
        }

        if let Some(text) = content.output_text() {
            log_debug_content(&format!("model: {text}"));
            observer.on_transcription(Some(text), true);
        }
        if let Some(text) = content.input_text() {
            log_debug_content(&format!("user: {text}"));
            observer.on_transcription(Some(text), false);
        }
        if content.turn_complete {
            log_debug("model turn complete");
        }
    }
}
