use super::{Connector, Outbound, SessionSetup, StreamEvent, StreamHandle};
use crate::log_debug;
use crate::protocol::{ClientMessage, ServerMessage, Setup};
use anyhow::{Context, Result};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TryRecvError};
use std::io::ErrorKind;
use std::net::TcpStream;
use std::time::Duration;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Error as WsError, Message, WebSocket};

/// Poll interval of the I/O thread; bounds the extra latency of outbound frames.
const READ_POLL: Duration = Duration::from_millis(10);

type Socket = WebSocket<MaybeTlsStream<TcpStream>>;

/// Opens the live session over a WebSocket and runs one I/O thread per stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    pub fn new() -> Self {
        Self
    }
}

impl Connector for WebSocketConnector {
    fn open(&self, setup: &SessionSetup) -> Result<StreamHandle> {
        // The URL carries the credential; keep it out of every log line.
        let url = format!("{}?key={}", setup.endpoint, setup.credential);
        let (mut socket, response) = tungstenite::connect(url.as_str())
            .map_err(|err| anyhow::anyhow!("{err}"))
            .with_context(|| format!("failed to connect to {}", setup.endpoint))?;
        log_debug(&format!(
            "live stream handshake complete (status {})",
            response.status()
        ));
        set_read_timeout(&socket, READ_POLL)?;

        let message = ClientMessage::Setup(Setup::new(
            &setup.model,
            &setup.voice,
            &setup.system_instruction,
            setup.transcribe_input,
        ));
        let payload = serde_json::to_string(&message).context("failed to encode setup message")?;
        socket
            .send(Message::Text(payload))
            .context("failed to send setup message")?;
        tracing::info!(model = %setup.model, voice = %setup.voice, "live session setup sent");

        let (outbound_tx, outbound_rx) = bounded(setup.outbound_capacity.max(1));
        let (event_tx, event_rx) = unbounded();
        std::thread::Builder::new()
            .name("voicelink-stream".into())
            .spawn(move || run_socket(socket, outbound_rx, event_tx))
            .context("failed to spawn stream thread")?;
        Ok(StreamHandle::new(outbound_tx, event_rx))
    }
}

fn set_read_timeout(socket: &Socket, timeout: Duration) -> Result<()> {
    let stream = match socket.get_ref() {
        MaybeTlsStream::Plain(stream) => stream,
        MaybeTlsStream::Rustls(tls) => &tls.sock,
        _ => return Ok(()),
    };
    stream
        .set_read_timeout(Some(timeout))
        .context("failed to set socket read timeout")
}

fn run_socket(mut socket: Socket, outbound: Receiver<Outbound>, events: Sender<StreamEvent>) {
    loop {
        if let Some(event) = drain_outbound(&mut socket, &outbound) {
            if let StreamEvent::Failed(reason) = &event {
                tracing::warn!(%reason, "live stream write failed");
            }
            let _ = events.send(event);
            return;
        }

        match socket.read() {
            Ok(Message::Text(text)) => dispatch(text.as_bytes(), &events),
            Ok(Message::Binary(bytes)) => dispatch(&bytes, &events),
            Ok(Message::Close(frame)) => {
                let reason = frame
                    .map(|f| format!("{} {}", u16::from(f.code), f.reason))
                    .unwrap_or_else(|| "closed by endpoint".to_string());
                tracing::info!(%reason, "live stream closed by endpoint");
                let _ = events.send(StreamEvent::Closed(reason));
                return;
            }
            Ok(_) => {}
            Err(WsError::Io(err))
                if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => {
                let _ = events.send(StreamEvent::Closed("connection closed".to_string()));
                return;
            }
            Err(err) => {
                tracing::warn!(error = %err, "live stream read failed");
                let _ = events.send(StreamEvent::Failed(err.to_string()));
                return;
            }
        }
    }
}

/// Flush queued client messages. Returns the terminal event once the stream
/// should stop.
fn drain_outbound(socket: &mut Socket, outbound: &Receiver<Outbound>) -> Option<StreamEvent> {
    loop {
        match outbound.try_recv() {
            Ok(Outbound::Message(message)) => {
                let payload = match serde_json::to_string(&message) {
                    Ok(payload) => payload,
                    Err(err) => {
                        log_debug(&format!("dropping unencodable client message: {err}"));
                        continue;
                    }
                };
                if let Err(err) = socket.send(Message::Text(payload)) {
                    return Some(StreamEvent::Failed(err.to_string()));
                }
            }
            Ok(Outbound::Close) | Err(TryRecvError::Disconnected) => {
                close_quietly(socket);
                return Some(StreamEvent::Closed("closed by client".to_string()));
            }
            Err(TryRecvError::Empty) => return None,
        }
    }
}

fn close_quietly(socket: &mut Socket) {
    if let Err(err) = socket.close(None) {
        log_debug(&format!("live stream close failed: {err}"));
        return;
    }
    if let Err(err) = socket.flush() {
        log_debug(&format!("live stream close flush failed: {err}"));
    }
}

fn dispatch(raw: &[u8], events: &Sender<StreamEvent>) {
    match ServerMessage::parse(raw) {
        Ok(message) => {
            let _ = events.send(StreamEvent::Message(message));
        }
        Err(err) => {
            tracing::warn!(error = %err, "skipping unparseable server message");
            log_debug(&format!("unparseable server message: {err}"));
        }
    }
}
