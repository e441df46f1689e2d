//! Wire event shapes for the realtime duplex speech service.
//! Named after the client/server event vocabulary of a realtime-duplex
//! speech API: a session-scoped tagged protocol over one WebSocket.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct SessionConfig {
    pub input_audio_format: String,
    pub output_audio_format: String,
    /// `None` disables server-side turn detection — the engine makes the
    /// endpointing decision itself.
    pub turn_detection: Option<serde_json::Value>,
    pub temperature: f32,
    pub max_response_output_tokens: Option<u32>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            input_audio_format: "g711_ulaw".to_string(),
            output_audio_format: "pcm16".to_string(),
            turn_detection: None,
            temperature: 0.6,
            max_response_output_tokens: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionConfig },
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend { audio: String },
    #[serde(rename = "input_audio_buffer.commit")]
    InputAudioBufferCommit {},
    #[serde(rename = "input_audio_buffer.clear")]
    InputAudioBufferClear {},
    #[serde(rename = "response.create")]
    ResponseCreate {},
    #[serde(rename = "response.cancel")]
    ResponseCancel {
        #[serde(skip_serializing_if = "Option::is_none")]
        response_id: Option<String>,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResponseRef {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorDetail {
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
#[allow(clippy::large_enum_variant)]
pub enum ServerEvent {
    #[serde(rename = "session.created")]
    SessionCreated {},
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    InputAudioTranscriptionCompleted { transcript: String },
    #[serde(rename = "conversation.item.created")]
    ConversationItemCreated {},
    #[serde(rename = "response.created")]
    ResponseCreated { response: ResponseRef },
    #[serde(rename = "response.audio_transcript.done")]
    ResponseAudioTranscriptDone { transcript: String },
    #[serde(rename = "response.audio.delta")]
    ResponseAudioDelta { delta: String },
    #[serde(rename = "response.done")]
    ResponseDone { response: ResponseRef },
    #[serde(rename = "error")]
    Error { error: ErrorDetail },
    #[serde(other)]
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_event_session_update_serializes_with_tag() {
        let event = ClientEvent::SessionUpdate {
            session: SessionConfig::default(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "session.update");
        assert_eq!(json["session"]["input_audio_format"], "g711_ulaw");
    }

    #[test]
    fn server_event_parses_completed_transcription() {
        let json = r#"{"type":"conversation.item.input_audio_transcription.completed","transcript":"hola"}"#;
        let event: ServerEvent = serde_json::from_str(json).unwrap();
        match event {
            ServerEvent::InputAudioTranscriptionCompleted { transcript } => {
                assert_eq!(transcript, "hola");
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn unknown_server_event_does_not_fail_parsing() {
        let json = r#"{"type":"rate_limits.updated"}"#;
        let event: ServerEvent = serde_json::from_str(json).unwrap();
        assert!(matches!(event, ServerEvent::Unknown));
    }
}
