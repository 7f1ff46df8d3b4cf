//! JSON wire model for the bidirectional live stream.
//!
//! Client messages are externally tagged (`{"setup": {...}}`,
//! `{"realtimeInput": {...}}`). Server messages carry exactly one populated
//! top-level field; unknown fields are ignored so newer server revisions keep
//! parsing.

use serde::{Deserialize, Serialize};

// ============================================================================
// Client → endpoint
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Setup),
    RealtimeInput(RealtimeInput),
}

/// Session open parameters, sent once right after the socket handshake.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: Content,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_transcription: Option<AudioTranscriptionConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<AudioTranscriptionConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<Modality>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Modality {
    Audio,
    Text,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

/// Presence alone enables transcription; the object has no options.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct AudioTranscriptionConfig {}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<Blob>,
}

impl Setup {
    pub fn new(
        model: &str,
        voice_name: &str,
        system_instruction: &str,
        transcribe_input: bool,
    ) -> Self {
        Self {
            model: model.to_string(),
            generation_config: GenerationConfig {
                response_modalities: vec![Modality::Audio],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: voice_name.to_string(),
                        },
                    },
                },
            },
            system_instruction: Content::text(system_instruction),
            output_audio_transcription: Some(AudioTranscriptionConfig::default()),
            input_audio_transcription: transcribe_input
                .then(AudioTranscriptionConfig::default),
        }
    }
}

impl ClientMessage {
    /// One realtime audio chunk.
    pub fn audio(blob: Blob) -> Self {
        ClientMessage::RealtimeInput(RealtimeInput {
            media_chunks: vec![blob],
        })
    }
}

// ============================================================================
// Shared payloads
// ============================================================================

/// Base64 payload tagged with its MIME type (`audio/pcm;rate=16000`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    pub fn text(text: &str) -> Self {
        Self {
            role: None,
            parts: vec![Part {
                text: Some(text.to_string()),
                inline_data: None,
            }],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
}

// ============================================================================
// Endpoint → client
// ============================================================================

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default)]
    pub setup_complete: Option<SetupComplete>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
    #[serde(default)]
    pub go_away: Option<GoAway>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct SetupComplete {}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub model_turn: Option<Content>,
    #[serde(default)]
    pub output_transcription: Option<Transcription>,
    #[serde(default)]
    pub input_transcription: Option<Transcription>,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub turn_complete: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct Transcription {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoAway {
    #[serde(default)]
    pub time_left: Option<String>,
}

impl ServerMessage {
    pub fn parse(raw: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(raw)
    }
}

impl ServerContent {
    /// Inline audio parts of the model turn, in order.
    pub fn audio_parts(&self) -> impl Iterator<Item = &Blob> {
        self.model_turn
            .iter()
            .flat_map(|turn| turn.parts.iter())
            .filter_map(|part| part.inline_data.as_ref())
            .filter(|blob| blob.mime_type.starts_with("audio/"))
    }

    pub fn output_text(&self) -> Option<&str> {
        transcription_text(self.output_transcription.as_ref())
    }

    pub fn input_text(&self) -> Option<&str> {
        transcription_text(self.input_transcription.as_ref())
    }
}

fn transcription_text(transcription: Option<&Transcription>) -> Option<&str> {
    transcription
        .and_then(|t| t.text.as_deref())
        .filter(|text| !text.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn setup_serializes_to_wire_shape() {
        let msg = ClientMessage::Setup(Setup::new("models/live", "Kore", "Be brief.", false));
        let value: Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({
                "setup": {
                    "model": "models/live",
                    "generationConfig": {
                        "responseModalities": ["AUDIO"],
                        "speechConfig": {
                            "voiceConfig": {"prebuiltVoiceConfig": {"voiceName": "Kore"}}
                        }
                    },
                    "systemInstruction": {"parts": [{"text": "Be brief."}]},
                    "outputAudioTranscription": {}
                }
            })
        );
    }

    #[test]
    fn setup_requests_input_transcription_when_enabled() {
        let msg = ClientMessage::Setup(Setup::new("m", "Puck", "", true));
        let value: Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["setup"]["inputAudioTranscription"], json!({}));
    }

    #[test]
    fn realtime_audio_chunk_shape() {
        let msg = ClientMessage::audio(Blob {
            mime_type: "audio/pcm;rate=16000".to_string(),
            data: "AAA=".to_string(),
        });
        let value: Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({"realtimeInput": {"mediaChunks": [
                {"mimeType": "audio/pcm;rate=16000", "data": "AAA="}
            ]}})
        );
    }

    #[test]
    fn parses_setup_complete() {
        let msg = ServerMessage::parse(br#"{"setupComplete": {}}"#).unwrap();
        assert!(msg.setup_complete.is_some());
        assert!(msg.server_content.is_none());
    }

    #[test]
    fn parses_audio_transcription_and_interrupt() {
        let raw = br#"{
            "serverContent": {
                "modelTurn": {"parts": [
                    {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "AAAA"}},
                    {"text": "thinking"}
                ]},
                "outputTranscription": {"text": "Hello trader"},
                "interrupted": true
            },
            "usageMetadata": {"totalTokenCount": 12}
        }"#;
        let msg = ServerMessage::parse(raw).unwrap();
        let content = msg.server_content.expect("server content");
        let audio: Vec<_> = content.audio_parts().collect();
        assert_eq!(audio.len(), 1);
        assert_eq!(audio[0].data, "AAAA");
        assert_eq!(content.output_text(), Some("Hello trader"));
        assert_eq!(content.input_text(), None);
        assert!(content.interrupted);
        assert!(!content.turn_complete);
    }

    #[test]
    fn empty_transcription_text_is_ignored() {
        let raw = br#"{"serverContent": {"inputTranscription": {"text": ""}}}"#;
        let msg = ServerMessage::parse(raw).unwrap();
        assert_eq!(msg.server_content.unwrap().input_text(), None);
    }

    #[test]
    fn parses_go_away() {
        let msg = ServerMessage::parse(br#"{"goAway": {"timeLeft": "10s"}}"#).unwrap();
        assert_eq!(msg.go_away.unwrap().time_left.as_deref(), Some("10s"));
    }
}
