//! Domain Port: the seam between the engine and the
//! business dialogue. `domain(ctx) -> result` is meant to be a pure
//! function — no I/O, no timers — so that everything upstream of it (turn
//! detection, RUT capture, media plane) stays decoupled from the particular
//! clinic script being run.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainEvent {
    Init,
    Turn,
    NoInput,
}

/// Everything the domain function is allowed to see.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainContext {
    pub event: DomainEventWire,
    pub transcript: Option<String>,
    pub session_id: String,
    pub ani: Option<String>,
    pub dnis: Option<String>,
    pub state: serde_json::Value,
}

/// Wire-safe mirror of `DomainEvent` (`serde` needs a type it can derive
/// on; `DomainEvent` itself stays a plain enum for ergonomic matching).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DomainEventWire {
    Init,
    Turn,
    NoInput,
}

impl From<DomainEvent> for DomainEventWire {
    fn from(event: DomainEvent) -> Self {
        match event {
            DomainEvent::Init => DomainEventWire::Init,
            DomainEvent::Turn => DomainEventWire::Turn,
            DomainEvent::NoInput => DomainEventWire::NoInput,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptPolicy {
    Interruptible,
    NonInterruptible,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    PlayAudio { audio: String, interrupt_policy: InterruptPolicy },
    SayText { text: String, interrupt_policy: InterruptPolicy },
    Hangup { reason: Option<String> },
    WaitInput,
}

/// `result` of `domain(ctx)`, fields all optional. `silent`
/// maps onto each action's `InterruptPolicy`, so it is folded into the
/// `Action` variants above rather than carried separately here.
#[derive(Debug, Clone, Default)]
pub struct DomainResult {
    pub action: Option<Action>,
    pub next_phase: Option<String>,
    /// Patch merged into the call's persisted state (shape owned by the
    /// domain script, opaque to the engine).
    pub state_patch: Option<serde_json::Value>,
    pub skip_input: bool,
    pub enable_incremental: bool,
    pub disable_incremental: bool,
    pub should_hangup: bool,
    pub playback_only: bool,
}

/// Implemented by a particular dialogue script (e.g. the clinic triage
/// flow); the engine only ever talks to this trait.
pub trait DomainPort: Send + Sync {
    fn handle(&self, ctx: &DomainContext) -> DomainResult;
}

#[derive(Debug, thiserror::Error)]
pub enum DomainError {
    #[error("bot output used sound: prefix in a text field; use the audio field instead")]
    SoundPrefixMisuse,
}

/// Normalization rule: `text` may never carry a `sound:`
/// reference — static audio must go through the dedicated `audio` field.
/// Rejects the output with a warning instead of silently stripping it, so
/// the bug surfaces during development.
pub fn normalize_bot_output(result: DomainResult) -> Result<DomainResult, DomainError> {
    if let Some(Action::SayText { text, .. }) = &result.action {
        if text.starts_with("sound:") {
            tracing::warn!(%text, "domain result misuse: text field carries a sound: reference");
            return Err(DomainError::SoundPrefixMisuse);
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoDomain;

    impl DomainPort for EchoDomain {
        fn handle(&self, ctx: &DomainContext) -> DomainResult {
            match ctx.event {
                DomainEventWire::Init => DomainResult {
                    action: Some(Action::PlayAudio {
                        audio: "greeting".to_string(),
                        interrupt_policy: InterruptPolicy::NonInterruptible,
                    }),
                    next_phase: Some("LISTEN_RUT".to_string()),
                    ..Default::default()
                },
                DomainEventWire::Turn => DomainResult {
                    action: Some(Action::SayText {
                        text: ctx.transcript.clone().unwrap_or_default(),
                        interrupt_policy: InterruptPolicy::Interruptible,
                    }),
                    ..Default::default()
                },
                DomainEventWire::NoInput => DomainResult {
                    should_hangup: true,
                    action: Some(Action::Hangup { reason: Some("no_input".to_string()) }),
                    ..Default::default()
                },
            }
        }
    }

    fn ctx(event: DomainEventWire, transcript: Option<&str>) -> DomainContext {
        DomainContext {
            event,
            transcript: transcript.map(str::to_string),
            session_id: "sess-1".to_string(),
            ani: None,
            dnis: None,
            state: serde_json::json!({}),
        }
    }

    #[test]
    fn init_event_plays_greeting_and_advances_phase() {
        let domain = EchoDomain;
        let result = domain.handle(&ctx(DomainEventWire::Init, None));
        assert_eq!(result.next_phase.as_deref(), Some("LISTEN_RUT"));
        assert!(matches!(result.action, Some(Action::PlayAudio { .. })));
    }

    #[test]
    fn no_input_event_requests_hangup() {
        let domain = EchoDomain;
        let result = domain.handle(&ctx(DomainEventWire::NoInput, None));
        assert!(result.should_hangup);
    }

    #[test]
    fn normalize_rejects_sound_prefixed_text() {
        let result = DomainResult {
            action: Some(Action::SayText {
                text: "sound:greeting".to_string(),
                interrupt_policy: InterruptPolicy::Interruptible,
            }),
            ..Default::default()
        };
        let err = normalize_bot_output(result).unwrap_err();
        assert!(matches!(err, DomainError::SoundPrefixMisuse));
    }

    #[test]
    fn normalize_passes_through_well_formed_text() {
        let result = DomainResult {
            action: Some(Action::SayText {
                text: "hola".to_string(),
                interrupt_policy: InterruptPolicy::Interruptible,
            }),
            ..Default::default()
        };
        assert!(normalize_bot_output(result).is_ok());
    }
}
