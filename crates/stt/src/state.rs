//! Per-call STT session state.

use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Three event classes delivered to callers. `StreamStable`'s
/// `reason` distinguishes the three locally-derived sub-conditions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SttEvent {
    Partial { text: String, is_delta: bool },
    StreamStable { reason: StreamStableReason },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStableReason {
    StreamPaused,
    StreamStable,
    StreamComplete,
}

impl StreamStableReason {
    pub fn as_str(self) -> &'static str {
        match self {
            StreamStableReason::StreamPaused => "stream-paused",
            StreamStableReason::StreamStable => "stream-stable",
            StreamStableReason::StreamComplete => "stream-complete",
        }
    }
}

/// Tracks delta arrival to derive stream-stability locally: a
/// gap in audio deltas longer than the configured threshold means the
/// stream has gone quiet. `paused_emitted`/`stable_emitted` guard against
/// re-emitting the same derived event on every watchdog tick.
#[derive(Debug, Clone, Default)]
pub struct DeltaTracking {
    pub last_delta_at: Option<Instant>,
    pub is_stream_active: bool,
    pub paused_emitted: bool,
    pub stable_emitted: bool,
}

impl DeltaTracking {
    pub fn reset_emitted(&mut self) {
        self.paused_emitted = false;
        self.stable_emitted = false;
    }
}

/// Invariant: at most one response is "active" at a time — it has
/// an id and hasn't been completed or cancelled.
#[derive(Debug, Clone, Default)]
pub struct SttState {
    pub connection: Option<ConnectionState>,
    pub active_response_id: Option<String>,
    pub last_transcript: String,
    pub last_assistant_response: String,
    pub delta_tracking: DeltaTracking,
    pub incremental_mode: bool,
    /// Bytes appended to the input buffer since the last commit; used for
    /// the minimum-audio-length check before `commit()`.
    pub buffered_bytes: usize,
}

impl SttState {
    pub fn new() -> Self {
        Self {
            connection: Some(ConnectionState::Disconnected),
            ..Default::default()
        }
    }

    pub fn has_active_response(&self) -> bool {
        self.active_response_id.is_some()
    }

    pub fn begin_response(&mut self, id: String) {
        self.active_response_id = Some(id);
    }

    pub fn clear_response(&mut self) {
        self.active_response_id = None;
    }
}
