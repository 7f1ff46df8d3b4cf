use super::ConnectionState;
use crate::error::SessionError;
use crossbeam_channel::Sender;

/// Callbacks from the engine to whatever renders it.
///
/// Called from engine threads, including the capture callback for
/// `on_volume_change`, so implementations must return quickly. State and
/// error callbacks run with no controller lock held and may query or
/// disconnect the controller.
pub trait SessionObserver: Send + Sync {
    fn on_connection_state_change(&self, _state: ConnectionState) {}

    /// Microphone level in `0.0..=1.0`; always 0 while muted.
    fn on_volume_change(&self, _level: f32) {}

    /// `None` clears the displayed text (sent after an interruption).
    fn on_transcription(&self, _text: Option<&str>, _is_model: bool) {}

    /// Decoded inbound audio, for visualisation only.
    fn on_audio_data(&self, _samples: &[f32], _sample_rate: u32) {}

    /// Session-level failure; followed by the `Error` state.
    fn on_error(&self, _error: &SessionError) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl SessionObserver for NullObserver {}

/// Owned form of every observer callback, for UIs that poll a channel.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    State(ConnectionState),
    Volume(f32),
    Transcription { text: Option<String>, is_model: bool },
    Audio { samples: usize, sample_rate: u32 },
    Error(SessionError),
}

/// Never blocks: a full channel drops the event.
impl SessionObserver for Sender<SessionEvent> {
    fn on_connection_state_change(&self, state: ConnectionState) {
        let _ = self.try_send(SessionEvent::State(state));
    }

    fn on_volume_change(&self, level: f32) {
        let _ = self.try_send(SessionEvent::Volume(level));
    }

    fn on_transcription(&self, text: Option<&str>, is_model: bool) {
        let _ = self.try_send(SessionEvent::Transcription {
            text: text.map(str::to_string),
            is_model,
        });
    }

    fn on_audio_data(&self, samples: &[f32], sample_rate: u32) {
        let _ = self.try_send(SessionEvent::Audio {
            samples: samples.len(),
            sample_rate,
        });
    }

    fn on_error(&self, error: &SessionError) {
        let _ = self.try_send(SessionEvent::Error(error.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::{bounded, unbounded};

    #[test]
    fn channel_observer_forwards_events_in_order() {
        let (tx, rx) = unbounded();
        tx.on_connection_state_change(ConnectionState::Connecting);
        tx.on_transcription(Some("hello"), true);
        tx.on_transcription(None, true);
        tx.on_audio_data(&[0.0; 480], 24_000);
        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![
                SessionEvent::State(ConnectionState::Connecting),
                SessionEvent::Transcription {
                    text: Some("hello".to_string()),
                    is_model: true
                },
                SessionEvent::Transcription {
                    text: None,
                    is_model: true
                },
                SessionEvent::Audio {
                    samples: 480,
                    sample_rate: 24_000
                },
            ]
        );
    }

    #[test]
    fn full_channel_drops_instead_of_blocking() {
        let (tx, rx) = bounded(1);
        tx.on_volume_change(0.1);
        tx.on_volume_change(0.2);
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![SessionEvent::Volume(0.1)]);
    }
}
