//! Turn state machine: the per-turn loop that waits for
//! voice, arbitrates the two endpoint triggers, tracks silence counters, and
//! decides barge-in. This crate holds the decision logic only — driving I/O
//! (media plane, STT, domain dispatch) lives in the engine runner; everything
//! here is a pure function or a small owned struct so it can be exercised
//! without an async runtime.

use callcore_phase::ConversationPhase;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TurnState {
    Greeting,
    Listening,
    RecordingDone,
    Dispatching,
    PlaybackActive,
    SilentAdvance,
    Terminating,
}

#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    #[error("illegal turn transition from {from:?} to {to:?}")]
    IllegalTransition { from: TurnState, to: TurnState },
}

pub type Result<T> = std::result::Result<T, TurnError>;

/// Legal edges of the per-turn loop. `Terminating` is
/// absorbing; every other state can reach it (hangup can be requested from
/// any dispatch).
fn is_legal(from: TurnState, to: TurnState) -> bool {
    use TurnState::*;
    match (from, to) {
        (Terminating, Terminating) => true,
        (Terminating, _) => false,
        (_, Terminating) => true,
        (Greeting, Listening) => true,
        (Listening, RecordingDone) => true,
        (Listening, SilentAdvance) => true,
        (RecordingDone, Dispatching) => true,
        (SilentAdvance, Dispatching) => true,
        (Dispatching, PlaybackActive) => true,
        (Dispatching, Listening) => true,
        (PlaybackActive, Listening) => true,
        _ => false,
    }
}

/// Drives `TurnState` through the legal-edge graph above, rejecting illegal
/// transitions instead of silently clamping (mirrors the snoop contract's
/// `can_transition_to` discipline).
#[derive(Debug, Clone)]
pub struct TurnMachine {
    state: TurnState,
}

impl TurnMachine {
    pub fn new() -> Self {
        Self {
            state: TurnState::Greeting,
        }
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn transition_to(&mut self, to: TurnState) -> Result<()> {
        if !is_legal(self.state, to) {
            return Err(TurnError::IllegalTransition { from: self.state, to });
        }
        self.state = to;
        Ok(())
    }
}

impl Default for TurnMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// Evidence of caller voice activity observed while `LISTENING`:
/// talk-detection on the caller leg, or any partial/completed STT
/// event — both count as "voice has started".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceEvidence {
    TalkDetected,
    SttPartial,
    SttCompleted,
}

/// Which of the two parallel endpoint triggers fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointTrigger {
    Silence,
    StreamStable,
}

/// Picks whichever endpoint trigger became ready first. Both are timestamps
/// relative to the same turn clock; `None` means that trigger hasn't fired
/// yet. When both fire at the exact same instant, silence endpointing wins
/// (it is the more conservative of the two: it requires talk-finished *and*
/// a quiet window, whereas stream-stability is a looser inference).
pub fn arbitrate_endpoint(silence_at_ms: Option<u64>, stream_stable_at_ms: Option<u64>) -> Option<EndpointTrigger> {
    match (silence_at_ms, stream_stable_at_ms) {
        (Some(s), Some(t)) => {
            if s <= t {
                Some(EndpointTrigger::Silence)
            } else {
                Some(EndpointTrigger::StreamStable)
            }
        }
        (Some(_), None) => Some(EndpointTrigger::Silence),
        (None, Some(_)) => Some(EndpointTrigger::StreamStable),
        (None, None) => None,
    }
}

/// Resolves step 1 of the per-turn algorithm: a pending `skipInput` request
/// from the previous dispatch is honored only outside the three listening
/// phases, and is always cleared for them so the machine keeps listening.
pub fn resolve_skip_input(requested_skip_input: bool, phase: ConversationPhase) -> bool {
    if phase.requires_input() {
        false
    } else {
        requested_skip_input
    }
}

/// A new voice event during an interruptible playback stops it, cancels the
/// in-flight STT response, and starts a fresh listening cycle.
/// Non-interruptible playback ignores voice
/// events entirely until it finishes on its own.
pub fn should_barge_in(state: TurnState, playback_interruptible: bool, voice_evidence: Option<VoiceEvidence>) -> bool {
    state == TurnState::PlaybackActive && playback_interruptible && voice_evidence.is_some()
}

/// Tracks `consecutiveSilences`/`maxTurns` caps.
#[derive(Debug, Clone, Copy, Default)]
pub struct TurnCounters {
    pub turn_count: u32,
    pub consecutive_silences: u32,
}

impl TurnCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// `had_transcript` also covers a barge-in turn (voice evidence arrived
    /// even if the transcript itself ends up empty); callers pass `true`
    /// whenever the turn is not purely silent.
    pub fn record_turn(&mut self, had_transcript_or_bargein: bool) {
        self.turn_count += 1;
        if had_transcript_or_bargein {
            self.consecutive_silences = 0;
        } else {
            self.consecutive_silences += 1;
        }
    }

    pub fn exceeded(&self, max_turns: u32, max_silent_turns: u32) -> bool {
        self.turn_count >= max_turns || self.consecutive_silences >= max_silent_turns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn greeting_advances_through_a_full_turn_to_listening() {
        let mut m = TurnMachine::new();
        m.transition_to(TurnState::Listening).unwrap();
        m.transition_to(TurnState::RecordingDone).unwrap();
        m.transition_to(TurnState::Dispatching).unwrap();
        m.transition_to(TurnState::PlaybackActive).unwrap();
        m.transition_to(TurnState::Listening).unwrap();
        assert_eq!(m.state(), TurnState::Listening);
    }

    #[test]
    fn silent_turn_routes_through_silent_advance_to_dispatching() {
        let mut m = TurnMachine::new();
        m.transition_to(TurnState::Listening).unwrap();
        m.transition_to(TurnState::SilentAdvance).unwrap();
        m.transition_to(TurnState::Dispatching).unwrap();
        assert_eq!(m.state(), TurnState::Dispatching);
    }

    #[test]
    fn any_state_can_terminate_but_terminating_is_absorbing() {
        let mut m = TurnMachine::new();
        m.transition_to(TurnState::Terminating).unwrap();
        let err = m.transition_to(TurnState::Listening).unwrap_err();
        assert!(matches!(err, TurnError::IllegalTransition { .. }));
    }

    #[test]
    fn illegal_skip_is_rejected() {
        let mut m = TurnMachine::new();
        let err = m.transition_to(TurnState::Dispatching).unwrap_err();
        assert!(matches!(
            err,
            TurnError::IllegalTransition {
                from: TurnState::Greeting,
                to: TurnState::Dispatching
            }
        ));
    }

    #[test]
    fn silence_wins_a_tie_with_stream_stability() {
        assert_eq!(arbitrate_endpoint(Some(800), Some(800)), Some(EndpointTrigger::Silence));
    }

    #[test]
    fn earlier_trigger_wins() {
        assert_eq!(arbitrate_endpoint(Some(900), Some(400)), Some(EndpointTrigger::StreamStable));
        assert_eq!(arbitrate_endpoint(Some(400), Some(900)), Some(EndpointTrigger::Silence));
    }

    #[test]
    fn no_trigger_yet_is_none() {
        assert_eq!(arbitrate_endpoint(None, None), None);
    }

    #[test]
    fn skip_input_is_forced_clear_in_listening_phases() {
        assert!(!resolve_skip_input(true, ConversationPhase::ListenRut));
        assert!(resolve_skip_input(true, ConversationPhase::Confirm));
        assert!(!resolve_skip_input(false, ConversationPhase::Confirm));
    }

    #[test]
    fn barge_in_only_during_interruptible_playback_with_evidence() {
        assert!(should_barge_in(TurnState::PlaybackActive, true, Some(VoiceEvidence::TalkDetected)));
        assert!(!should_barge_in(TurnState::PlaybackActive, false, Some(VoiceEvidence::TalkDetected)));
        assert!(!should_barge_in(TurnState::PlaybackActive, true, None));
        assert!(!should_barge_in(TurnState::Listening, true, Some(VoiceEvidence::SttPartial)));
    }

    #[test]
    fn counters_reset_on_transcript_and_cap_on_repeated_silence() {
        let mut counters = TurnCounters::new();
        counters.record_turn(false);
        counters.record_turn(false);
        assert!(!counters.exceeded(15, 3));
        counters.record_turn(false);
        assert!(counters.exceeded(15, 3));
    }

    #[test]
    fn max_turns_cap_triggers_independent_of_silence() {
        let mut counters = TurnCounters::new();
        for _ in 0..15 {
            counters.record_turn(true);
        }
        assert!(counters.exceeded(15, 3));
    }
}
