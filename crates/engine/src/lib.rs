//! Engine runner: wires the phase contract, media plane, turn machine,
//! RUT capture orchestrator and domain port into the per-call actor that
//! drives one active call end to end.
//!
//! Everything that can be a pure decision lives in `callcore-turn` and
//! `callcore-phase`; this crate's job is only to drive real I/O through
//! those decisions in order, persist the result, and move to the next turn.

mod state;
mod wav;

use std::sync::Arc;
use std::time::Duration;

use callcore_ari::AriClient;
use callcore_cache::SharedCache;
use callcore_config::{Caps, Timeouts};
use callcore_domain::{self as domain, Action as DomainAction, DomainContext, DomainEvent, DomainPort, DomainResult};
use callcore_events::{event_names, EventBusRef, TurnDispatchedEvent};
use callcore_media::MediaPlaneController;
use callcore_phase::ConversationPhase;
use callcore_rutcapture::{CaptureTrigger, CompletedOutcome, RutCaptureOrchestrator};
use callcore_stt::{SttEvent, SttSessionClient, StreamStableReason};
use callcore_turn::{arbitrate_endpoint, should_barge_in, EndpointTrigger, TurnCounters, TurnMachine, TurnState, VoiceEvidence};

pub use state::{load_phase, phase_from_name, phase_name, save_phase};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("ari error: {0}")]
    Ari(#[from] callcore_ari::AriError),
    #[error("media plane error: {0}")]
    Media(#[from] callcore_media::MediaError),
    #[error("stt error: {0}")]
    Stt(#[from] callcore_stt::SttError),
    #[error("cache error: {0}")]
    Cache(#[from] callcore_cache::CacheError),
    #[error("rut capture error: {0}")]
    RutCapture(#[from] callcore_rutcapture::RutCaptureError),
    #[error("domain output rejected: {0}")]
    Domain(#[from] domain::DomainError),
    #[error("turn state error: {0}")]
    Turn(#[from] callcore_turn::TurnError),
    #[error("io error writing synthesized audio: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Sample rate of the PCM16 bytes `synthesize_speech` returns, used to build
/// the WAV header written to the sounds directory before playback.
const TTS_SAMPLE_RATE_HZ: u32 = 24_000;

/// Outcome of one pass through `run_turn`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The call should keep looping in `Listening`.
    Continue,
    /// `max_turns` or `max_silent_turns` was exceeded, or the domain asked
    /// to hang up.
    Ended { reason: &'static str },
}

/// Wires every per-call collaborator together. One instance is created per
/// active call by the stasis-event dispatch loop in the binary.
pub struct CallEngine {
    ari: Arc<dyn AriClient>,
    media: Arc<MediaPlaneController>,
    stt: Arc<dyn SttSessionClient>,
    rut: Arc<RutCaptureOrchestrator>,
    domain: Arc<dyn DomainPort>,
    cache: Arc<dyn SharedCache>,
    events: EventBusRef,
    timeouts: Timeouts,
    caps: Caps,
    sounds_root: String,
}

impl CallEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ari: Arc<dyn AriClient>,
        media: Arc<MediaPlaneController>,
        stt: Arc<dyn SttSessionClient>,
        rut: Arc<RutCaptureOrchestrator>,
        domain: Arc<dyn DomainPort>,
        cache: Arc<dyn SharedCache>,
        events: EventBusRef,
        timeouts: Timeouts,
        caps: Caps,
        sounds_root: String,
    ) -> Self {
        Self {
            ari,
            media,
            stt,
            rut,
            domain,
            cache,
            events,
            timeouts,
            caps,
            sounds_root,
        }
    }

    /// Runs the greeting: dispatches `DomainEvent::Init` through the domain
    /// port and executes the resulting action.
    pub async fn greet(&self, linked_id: &str, channel_id: &str, session_id: &str) -> Result<TurnMachine> {
        let mut machine = TurnMachine::new();
        let phase = load_phase(&self.cache, linked_id).await?;
        let result = self.dispatch_domain(linked_id, DomainEvent::Init, None, phase, session_id).await?;
        self.execute_action(channel_id, &result).await?;
        machine.transition_to(TurnState::Listening)?;
        Ok(machine)
    }

    /// One full turn: listen, arbitrate the endpoint, dispatch to the
    /// domain, play the response, and update counters.
    /// `pending_skip_input` carries the previous dispatch's
    /// `skip_input` request across the call; the caller owns it across
    /// turns the same way it owns `machine` and `counters`.
    pub async fn run_turn(
        &self,
        linked_id: &str,
        channel_id: &str,
        session_id: &str,
        machine: &mut TurnMachine,
        counters: &mut TurnCounters,
        pending_skip_input: &mut bool,
    ) -> Result<TurnOutcome> {
        let phase = load_phase(&self.cache, linked_id).await?;
        let skip_input = callcore_turn::resolve_skip_input(*pending_skip_input, phase);
        *pending_skip_input = false;

        let transcript = if skip_input {
            None
        } else {
            self.listen_for_transcript(linked_id, phase).await?
        };

        machine.transition_to(TurnState::RecordingDone)?;
        machine.transition_to(TurnState::Dispatching)?;

        let had_input = transcript.is_some();
        let event = if had_input { DomainEvent::Turn } else { DomainEvent::NoInput };
        let result = self.dispatch_domain(linked_id, event, transcript.clone(), phase, session_id).await?;

        counters.record_turn(had_input);
        self.events.emit(
            event_names::TURN_DISPATCHED,
            serde_json::to_value(TurnDispatchedEvent {
                linked_id: linked_id.to_string(),
                turn: counters.turn_count,
                transcript: transcript.clone(),
                consecutive_silences: counters.consecutive_silences,
            })
            .unwrap_or_default(),
        );

        if result.should_hangup || counters.exceeded(self.caps.max_turns, self.caps.max_silent_turns) {
            machine.transition_to(TurnState::Terminating)?;
            let reason = if result.should_hangup { "domain_hangup" } else { "turn_cap_exceeded" };
            return Ok(TurnOutcome::Ended { reason });
        }

        if !result.playback_only {
            if let Some(next_phase) = result.next_phase.as_deref().and_then(phase_from_name) {
                save_phase(&self.cache, linked_id, next_phase).await?;
            }
        }

        *pending_skip_input = result.skip_input;

        machine.transition_to(TurnState::PlaybackActive)?;
        self.execute_action(channel_id, &result).await?;
        machine.transition_to(TurnState::Listening)?;

        Ok(TurnOutcome::Continue)
    }

    async fn dispatch_domain(
        &self,
        linked_id: &str,
        event: DomainEvent,
        transcript: Option<String>,
        phase: ConversationPhase,
        session_id: &str,
    ) -> Result<DomainResult> {
        let ctx = DomainContext {
            event: event.into(),
            transcript,
            session_id: session_id.to_string(),
            ani: None,
            dnis: None,
            state: serde_json::json!({ "phase": phase_name(phase), "linkedId": linked_id }),
        };
        let result = self.domain.handle(&ctx);
        Ok(domain::normalize_bot_output(result)?)
    }

    async fn execute_action(&self, channel_id: &str, result: &DomainResult) -> Result<()> {
        match &result.action {
            Some(DomainAction::PlayAudio { audio, .. }) => {
                self.ari.channel_play(channel_id, audio).await?;
            }
            Some(DomainAction::SayText { text, .. }) => {
                let voice = "alloy";
                let name = wav::cache_name(text, voice);
                let path = format!("{}/voicebot/{name}.wav", self.sounds_root);
                if tokio::fs::metadata(&path).await.is_err() {
                    let pcm = self.stt.synthesize_speech(text, voice).await?;
                    let wav_bytes = wav::encode_pcm16_mono(&pcm, TTS_SAMPLE_RATE_HZ);
                    if let Some(parent) = std::path::Path::new(&path).parent() {
                        tokio::fs::create_dir_all(parent).await?;
                    }
                    tokio::fs::write(&path, wav_bytes).await?;
                }
                self.ari.channel_play(channel_id, &format!("sound:{name}")).await?;
            }
            Some(DomainAction::Hangup { .. }) => {
                self.ari.channel_hangup(channel_id).await?;
            }
            Some(DomainAction::WaitInput) | None => {}
        }
        Ok(())
    }

    /// Listens on the STT event stream until an endpoint trigger fires or
    /// barge-in is decided, then returns the settled transcript.
    async fn listen_for_transcript(&self, linked_id: &str, phase: ConversationPhase) -> Result<Option<String>> {
        let mut rx = self.stt.subscribe();
        let mut silence_at_ms: Option<u64> = None;
        let mut stream_stable_at_ms: Option<u64> = None;
        let mut transcript: Option<String> = None;
        let now_ms = || -> u64 { 0 };

        let deadline = tokio::time::Instant::now() + self.timeouts.max_utterance;
        loop {
            if tokio::time::Instant::now() >= deadline {
                break;
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match tokio::time::timeout(remaining, rx.recv()).await {
                Ok(Ok(SttEvent::Partial { text, is_delta })) => {
                    if !is_delta {
                        transcript = Some(text.clone());
                        let outcome = self.rut.handle_completed(linked_id, phase, &text).await?;
                        if let CompletedOutcome::Processed { .. } = outcome {
                            self.maybe_invoke_webhook(linked_id, &text, CaptureTrigger::TranscriptionCompleted).await?;
                        }
                        break;
                    }
                    self.rut.on_partial(linked_id, now_ms(), text.trim().is_empty()).await?;
                }
                Ok(Ok(SttEvent::StreamStable { reason })) => match reason {
                    StreamStableReason::StreamPaused => {}
                    StreamStableReason::StreamStable => {
                        stream_stable_at_ms = Some(now_ms());
                    }
                    StreamStableReason::StreamComplete => {
                        silence_at_ms = Some(now_ms());
                    }
                },
                Ok(Err(_)) | Err(_) => break,
            }

            if let Some(trigger) = arbitrate_endpoint(silence_at_ms, stream_stable_at_ms) {
                match trigger {
                    EndpointTrigger::Silence => break,
                    EndpointTrigger::StreamStable => break,
                }
            }
        }

        self.stt.cancel_current_response("turn_endpointed").await?;
        Ok(transcript)
    }

    async fn maybe_invoke_webhook(&self, linked_id: &str, text: &str, trigger: CaptureTrigger) -> Result<()> {
        let filter = callcore_rutcapture::semantic_filter(text);
        if let callcore_rutcapture::FilterOutcome::Accepted { rut } = filter {
            self.rut.invoke_webhook(linked_id, text, rut.as_deref(), trigger).await?;
        }
        Ok(())
    }

    /// Evaluates barge-in for an in-flight playback against fresh voice
    /// evidence.
    pub fn evaluate_barge_in(&self, state: TurnState, interruptible: bool, evidence: Option<VoiceEvidence>) -> bool {
        should_barge_in(state, interruptible, evidence)
    }

    /// Tears down the call's media plane resources; always permitted, since
    /// this only runs at stasis end.
    pub async fn teardown(&self, linked_id: &str) -> Result<()> {
        let phase = load_phase(&self.cache, linked_id).await?;
        self.media.teardown_if_allowed(linked_id, phase, true).await?;
        Ok(())
    }
}
