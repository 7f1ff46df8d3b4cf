//! Remote live stream, modelled as a task plus channels.
//!
//! A connector opens the stream and hands back a [`StreamHandle`]: a cloneable
//! writer that feeds a bounded outbound queue, and a receiver of inbound
//! [`StreamEvent`]s produced by the stream's I/O thread.

mod websocket;

use crate::protocol::{Blob, ClientMessage, ServerMessage};
use anyhow::{anyhow, Result};
use crossbeam_channel::{Receiver, Sender, TrySendError};

pub use websocket::WebSocketConnector;

/// Everything needed to open one live session.
#[derive(Clone)]
pub struct SessionSetup {
    pub endpoint: String,
    pub model: String,
    pub voice: String,
    pub system_instruction: String,
    pub credential: String,
    pub transcribe_input: bool,
    pub outbound_capacity: usize,
}

impl std::fmt::Debug for SessionSetup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionSetup")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("voice", &self.voice)
            .field("transcribe_input", &self.transcribe_input)
            .field("outbound_capacity", &self.outbound_capacity)
            .finish_non_exhaustive()
    }
}

/// Opens the remote stream. Blocks until the handshake and setup message
/// have gone through; failures here are transport-establishment errors.
pub trait Connector: Send + Sync {
    fn open(&self, setup: &SessionSetup) -> Result<StreamHandle>;
}

/// What the I/O thread reports back.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Message(ServerMessage),
    /// The endpoint closed the stream normally.
    Closed(String),
    /// The stream failed after it was established.
    Failed(String),
}

pub(crate) enum Outbound {
    Message(ClientMessage),
    Close,
}

pub struct StreamHandle {
    pub writer: StreamWriter,
    pub events: Receiver<StreamEvent>,
}

impl StreamHandle {
    pub(crate) fn new(outbound: Sender<Outbound>, events: Receiver<StreamEvent>) -> Self {
        Self {
            writer: StreamWriter { outbound },
            events,
        }
    }
}

/// Fire-and-forget sender used from the capture callback.
#[derive(Clone)]
pub struct StreamWriter {
    outbound: Sender<Outbound>,
}

impl StreamWriter {
    /// Queue one audio chunk without blocking. A full queue drops the chunk.
    pub fn send_frame(&self, blob: Blob) -> Result<()> {
        match self.outbound.try_send(Outbound::Message(ClientMessage::audio(blob))) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(anyhow!("outbound queue full")),
            Err(TrySendError::Disconnected(_)) => Err(anyhow!("stream closed")),
        }
    }

    /// Ask the I/O thread to close the socket. Safe to call repeatedly.
    pub fn close(&self) -> Result<()> {
        match self.outbound.try_send(Outbound::Close) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => Ok(()),
            Err(TrySendError::Full(_)) => Err(anyhow!(
                "outbound queue full; stream will close when the writer is dropped"
            )),
        }
    }
}

#[cfg(test)]
pub(crate) mod fake {
    //! Channel-backed connector for session tests.

    use super::*;
    use crate::lock::lock_or_recover;
    use crossbeam_channel::{bounded, unbounded};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// The test's end of one opened stream.
    pub(crate) struct RemoteEnd {
        pub(crate) sent: Receiver<Outbound>,
        pub(crate) events: Sender<StreamEvent>,
    }

    impl RemoteEnd {
        /// Audio chunks the client queued so far, without close requests.
        pub(crate) fn drain_frames(&self) -> Vec<Blob> {
            self.sent
                .try_iter()
                .filter_map(|outbound| match outbound {
                    Outbound::Message(ClientMessage::RealtimeInput(input)) => {
                        input.media_chunks.into_iter().next()
                    }
                    _ => None,
                })
                .collect()
        }

        pub(crate) fn saw_close(&self) -> bool {
            self.sent
                .try_iter()
                .any(|outbound| matches!(outbound, Outbound::Close))
        }

        pub(crate) fn send(&self, event: StreamEvent) {
            let _ = self.events.send(event);
        }
    }

    #[derive(Default)]
    pub(crate) struct FakeConnector {
        pub(crate) fail_open: AtomicBool,
        /// Calls to `open`, counted before any gate wait.
        pub(crate) entered: AtomicUsize,
        pub(crate) opened: AtomicUsize,
        pub(crate) last_setup: Mutex<Option<SessionSetup>>,
        remotes: Mutex<Vec<RemoteEnd>>,
        /// Holds `open` until the test releases it.
        gate: Mutex<Option<Receiver<()>>>,
    }

    impl FakeConnector {
        /// Make the next `open` block until the returned sender is used or dropped.
        pub(crate) fn hold_open(&self) -> Sender<()> {
            let (tx, rx) = bounded(0);
            *lock_or_recover(&self.gate, "fake gate") = Some(rx);
            tx
        }

        pub(crate) fn take_remote(&self) -> Option<RemoteEnd> {
            let mut remotes = lock_or_recover(&self.remotes, "fake remotes");
            (!remotes.is_empty()).then(|| remotes.remove(0))
        }
    }

    impl Connector for FakeConnector {
        fn open(&self, setup: &SessionSetup) -> Result<StreamHandle> {
            self.entered.fetch_add(1, Ordering::SeqCst);
            let gate = lock_or_recover(&self.gate, "fake gate").take();
            if let Some(gate) = gate {
                let _ = gate.recv();
            }
            *lock_or_recover(&self.last_setup, "fake setup") = Some(setup.clone());
            if self.fail_open.load(Ordering::SeqCst) {
                return Err(anyhow!("HTTP error: 401 Unauthorized"));
            }
            self.opened.fetch_add(1, Ordering::SeqCst);
            let (out_tx, out_rx) = bounded(setup.outbound_capacity.max(1));
            let (event_tx, event_rx) = unbounded();
            lock_or_recover(&self.remotes, "fake remotes").push(RemoteEnd {
                sent: out_rx,
                events: event_tx,
            });
            Ok(StreamHandle::new(out_tx, event_rx))
        }
    }
}
