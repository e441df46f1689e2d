//! Stasis event shapes consumed from the PBX event WebSocket.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelRef {
    pub id: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum StasisEvent {
    StasisStart {
        channel: ChannelRef,
        args: Vec<String>,
    },
    StasisEnd {
        channel: ChannelRef,
    },
    ChannelTalkingStarted {
        channel: ChannelRef,
    },
    ChannelTalkingFinished {
        channel: ChannelRef,
        duration: Option<u64>,
    },
    PlaybackFinished {
        playback: PlaybackRef,
    },
    PlaybackStopped {
        playback: PlaybackRef,
    },
    PlaybackFailed {
        playback: PlaybackRef,
    },
    RecordingFinished {
        recording: RecordingRef,
    },
    RecordingFailed {
        recording: RecordingRef,
    },
    ChannelDestroyed {
        channel: ChannelRef,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlaybackRef {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordingRef {
    pub name: String,
}

impl StasisEvent {
    /// Pull the `linkedId` correlation token out of a `StasisStart`'s
    /// `appArgs="linkedId=<id>"` convention. Other event kinds don't carry
    /// it directly; callers correlate by channel/bridge id.
    pub fn linked_id(&self) -> Option<String> {
        if let StasisEvent::StasisStart { args, .. } = self {
            for arg in args {
                if let Some(id) = arg.strip_prefix("linkedId=") {
                    return Some(id.to_string());
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_stasis_start_with_linked_id_arg() {
        let json = r#"{"type":"StasisStart","channel":{"id":"c1"},"args":["linkedId=abc123","role=externalMedia"]}"#;
        let event: StasisEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.linked_id(), Some("abc123".to_string()));
    }

    #[test]
    fn unknown_event_type_does_not_fail_parsing() {
        let json = r#"{"type":"ChannelVarset","channel":{"id":"c1"}}"#;
        let event: StasisEvent = serde_json::from_str(json).unwrap();
        assert!(matches!(event, StasisEvent::Unknown));
    }
}
