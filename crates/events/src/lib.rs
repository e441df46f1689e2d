//! Shared event contracts for cross-component communication.
//!
//! This crate defines the formal DTOs for events that flow between the
//! engine's components (media plane, STT client, turn machine, RUT
//! orchestrator) and the `EventBus` trait used to emit them, decoupled from
//! any particular transport (structured log, metrics sink, websocket to an
//! ops dashboard, ...).

mod bus;

pub use bus::{EmittedEvent, EventBus, EventBusRef, InMemoryEventBus, NullEventBus, TracingEventBus};

use serde::{Deserialize, Serialize};

/// Event emitted for every entry appended to a call's audio mark ledger (C2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioMarkEvent {
    pub linked_id: String,
    pub mark_type: String,
    pub offset_ms: u64,
}

/// Event emitted on every snoop contract state transition (C3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnoopTransitionEvent {
    pub linked_id: String,
    pub from: String,
    pub to: String,
}

/// Event emitted whenever the Phase Contract denies an action (C4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseViolationEvent {
    pub linked_id: String,
    pub phase: String,
    pub action: String,
}

/// Event emitted for each STT partial transcript (C5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SttPartialEvent {
    pub linked_id: String,
    pub text: String,
    pub is_delta: bool,
}

/// Event emitted when the STT client derives a stream-stability signal (C5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamStableEvent {
    pub linked_id: String,
    pub reason: String,
}

/// Event emitted on every turn dispatch decision (C8/C11).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnDispatchedEvent {
    pub linked_id: String,
    pub turn: u32,
    pub transcript: Option<String>,
    pub consecutive_silences: u32,
}

/// Event emitted when the RUT validation webhook succeeds or is rejected (C9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RutWebhookEvent {
    pub linked_id: String,
    pub accepted: bool,
    pub rut: Option<String>,
    pub reason: Option<String>,
}

/// Event names as constants to prevent typos.
pub mod event_names {
    pub const AUDIO_MARK_APPENDED: &str = "marks:appended";
    pub const SNOOP_TRANSITIONED: &str = "snoop:transitioned";
    pub const PHASE_VIOLATION: &str = "phase:violation";
    pub const STT_PARTIAL: &str = "stt:partial";
    pub const STT_STREAM_STABLE: &str = "stt:stream_stable";
    pub const TURN_DISPATCHED: &str = "turn:dispatched";
    pub const RUT_WEBHOOK_SUCCESS: &str = "rut:webhook_success";
    pub const RUT_WEBHOOK_REJECTED: &str = "rut:webhook_rejected";
}
