//! Cross-component scenario tests: the engine, media plane, RUT capture
//! and event bus wired together the way the stasis dispatch loop wires
//! them, driven through `CallEngine`'s public API plus the sibling
//! collaborators it shares a cache with.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use callcore_ari::{AriClient, InMemoryAriClient};
use callcore_cache::{InMemoryCache, SharedCache};
use callcore_config::{Caps, Timeouts};
use callcore_domain::{Action as DomainAction, DomainContext, DomainEventWire, DomainPort, DomainResult, InterruptPolicy};
use callcore_engine::{load_phase, save_phase, CallEngine, TurnOutcome};
use callcore_events::{EventBusRef, InMemoryEventBus};
use callcore_media::MediaPlaneController;
use callcore_phase::ConversationPhase;
use callcore_rutcapture::{CaptureTrigger, InMemoryRutWebhookClient, RutCaptureOrchestrator, WebhookInvocation};
use callcore_snoop::{SnoopContractStore, SnoopState};
use callcore_stt::{SttError, SttEvent, SttSessionClient};
use callcore_turn::{TurnCounters, TurnMachine, TurnState, VoiceEvidence};

/// Drives `SttEvent`s to whatever `CallEngine::run_turn` is currently
/// listening on; `synthesize_speech` returns a fixed byte stub so
/// `SayText` playback exercises the cache-write path without a real TTS
/// backend.
struct ScriptedStt {
    events_tx: tokio::sync::broadcast::Sender<SttEvent>,
    cancelled: Mutex<u32>,
}

impl ScriptedStt {
    fn new() -> Arc<Self> {
        let (events_tx, _) = tokio::sync::broadcast::channel(32);
        Arc::new(Self { events_tx, cancelled: Mutex::new(0) })
    }

    fn say(&self, text: &str) {
        let _ = self.events_tx.send(SttEvent::Partial { text: text.to_string(), is_delta: false });
    }

    /// Sends the completed transcript shortly after this is called, giving
    /// `run_turn`'s internal `subscribe()` time to happen first — a
    /// `broadcast` channel only delivers to receivers that already exist.
    fn say_soon(self: &Arc<Self>, text: &str) {
        let stt = self.clone();
        let text = text.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            stt.say(&text);
        });
    }
}

#[async_trait]
impl SttSessionClient for ScriptedStt {
    async fn connect(&self) -> callcore_stt::Result<()> {
        Ok(())
    }
    async fn disconnect(&self) -> callcore_stt::Result<()> {
        Ok(())
    }
    async fn update_session(&self, _config: callcore_stt::SessionConfig) -> callcore_stt::Result<()> {
        Ok(())
    }
    async fn stream_audio(&self, _bytes: &[u8]) -> callcore_stt::Result<()> {
        Ok(())
    }
    async fn commit(&self) -> callcore_stt::Result<()> {
        Ok(())
    }
    async fn wait_for_transcript(&self, _timeout: Duration) -> callcore_stt::Result<String> {
        Err(SttError::Protocol("not used in scenario tests".to_string()))
    }
    async fn cancel_current_response(&self, _reason: &str) -> callcore_stt::Result<()> {
        *self.cancelled.lock().unwrap() += 1;
        Ok(())
    }
    async fn synthesize_speech(&self, _text: &str, _voice: &str) -> callcore_stt::Result<Vec<u8>> {
        Ok(vec![0u8; 32])
    }
    fn subscribe(&self) -> tokio::sync::broadcast::Receiver<SttEvent> {
        self.events_tx.subscribe()
    }
    fn enable_incremental(&self) {}
    fn disable_incremental(&self) {}
}

/// Small clinic-like script: greets into `LISTEN_RUT`, echoes a
/// confirmation with `SayText` and moves to `CONFIRM`, and on silence
/// leaves termination to the engine's own turn-cap enforcement rather
/// than hanging up itself — that's what lets S4 exercise the cap path
/// instead of a domain-initiated hangup.
struct ScenarioDomain;

impl DomainPort for ScenarioDomain {
    fn handle(&self, ctx: &DomainContext) -> DomainResult {
        match ctx.event {
            DomainEventWire::Init => DomainResult {
                action: Some(DomainAction::PlayAudio {
                    audio: "sound:greeting".to_string(),
                    interrupt_policy: InterruptPolicy::Interruptible,
                }),
                next_phase: Some("LISTEN_RUT".to_string()),
                ..Default::default()
            },
            DomainEventWire::Turn => {
                let transcript = ctx.transcript.clone().unwrap_or_default();
                DomainResult {
                    action: Some(DomainAction::SayText {
                        text: format!("Confirmo su rut: {transcript}"),
                        interrupt_policy: InterruptPolicy::Interruptible,
                    }),
                    next_phase: Some("CONFIRM".to_string()),
                    ..Default::default()
                }
            }
            DomainEventWire::NoInput => DomainResult {
                action: Some(DomainAction::WaitInput),
                ..Default::default()
            },
        }
    }
}

struct Harness {
    engine: CallEngine,
    stt: Arc<ScriptedStt>,
    ari: Arc<InMemoryAriClient>,
    cache: Arc<dyn SharedCache>,
    webhook: Arc<InMemoryRutWebhookClient>,
}

fn build(webhook: Arc<InMemoryRutWebhookClient>) -> Harness {
    let ari_concrete = Arc::new(InMemoryAriClient::new());
    let ari: Arc<dyn AriClient> = ari_concrete.clone();
    let cache: Arc<dyn SharedCache> = Arc::new(InMemoryCache::new());
    let snoop_store = Arc::new(SnoopContractStore::new(cache.clone()));
    let media = Arc::new(MediaPlaneController::new(ari.clone(), snoop_store, "crm_app", 3));
    let stt = ScriptedStt::new();
    let events: EventBusRef = Arc::new(InMemoryEventBus::new());
    let rut = Arc::new(RutCaptureOrchestrator::new(cache.clone(), webhook.clone(), events.clone(), "clinica", 2));
    let domain: Arc<dyn DomainPort> = Arc::new(ScenarioDomain);

    let engine = CallEngine::new(
        ari,
        media,
        stt.clone(),
        rut,
        domain,
        cache.clone(),
        events,
        Timeouts {
            max_utterance: Duration::from_millis(200),
            ..Timeouts::default()
        },
        Caps::default(),
        std::env::temp_dir().join("callcore-engine-scenarios").display().to_string(),
    );

    Harness { engine, stt, ari: ari_concrete, cache, webhook }
}

/// S1 — happy path: a fully spoken-out RUT with a correct check digit
/// parses to body=14348258/dv='8', the webhook is invoked and accepted,
/// and the phase advances away from `LISTEN_RUT`.
#[tokio::test]
async fn s1_happy_path_parses_validates_and_advances_phase() {
    let text = "catorce millones trescientos cuarenta y ocho mil doscientos cincuenta y ocho, guión ocho";

    let parsed = callcore_rut::parse(text);
    assert_eq!(parsed.body, Some(14_348_258));
    assert_eq!(parsed.dv, Some('8'));
    assert!(parsed.ok);
    assert_eq!(parsed.rut.as_deref(), Some("14348258-8"));

    let harness = build(Arc::new(InMemoryRutWebhookClient::accepting("14348258-8")));
    let mut machine = harness.engine.greet("call-1", "chan-1", "call-1").await.unwrap();
    assert_eq!(load_phase(&harness.cache, "call-1").await.unwrap(), ConversationPhase::ListenRut);

    let mut counters = TurnCounters::new();
    let mut skip_input = false;
    harness.stt.say_soon(text);
    let outcome = harness
        .engine
        .run_turn("call-1", "chan-1", "call-1", &mut machine, &mut counters, &mut skip_input)
        .await
        .unwrap();

    assert_eq!(outcome, TurnOutcome::Continue);
    assert_eq!(load_phase(&harness.cache, "call-1").await.unwrap(), ConversationPhase::Confirm);
    assert_eq!(counters.consecutive_silences, 0);

    let webhook_calls = harness.webhook.calls.lock().unwrap();
    assert_eq!(webhook_calls.len(), 1);
    assert_eq!(webhook_calls[0], text);

    // The confirmation SayText played back a cache-backed sound reference,
    // not a fixed placeholder — the whole point of the TTS-playback fix.
    let ari_calls = harness.ari.calls.lock().unwrap();
    assert!(ari_calls.iter().any(|c| c.starts_with("channel_play:chan-1:sound:tts-")));
}

/// S2 — dv mismatch: the spoken check digit doesn't match the computed
/// one; the parser rejects with `dv_mismatch` but the body still parses,
/// so the semantic filter accepts the text and the webhook still runs
/// (and reports the rejection back).
#[tokio::test]
async fn s2_dv_mismatch_is_rejected_by_the_parser_but_webhook_still_runs() {
    let text = "catorce millones trescientos cuarenta y ocho mil doscientos cincuenta y ocho, guión siete";
    let parsed = callcore_rut::parse(text);
    assert_eq!(parsed.body, Some(14_348_258));
    assert!(!parsed.ok);
    assert_eq!(parsed.reason.as_deref(), Some("dv_mismatch"));
    assert_eq!(parsed.rut, None);

    let harness = build(Arc::new(InMemoryRutWebhookClient::rejecting("dv_mismatch")));
    save_phase(&harness.cache, "call-1", ConversationPhase::ListenRut).await.unwrap();
    let mut machine = TurnMachine::new();
    machine.transition_to(TurnState::Listening).unwrap();
    let mut counters = TurnCounters::new();
    let mut skip_input = false;

    harness.stt.say_soon(text);
    harness
        .engine
        .run_turn("call-1", "chan-1", "call-1", &mut machine, &mut counters, &mut skip_input)
        .await
        .unwrap();

    let calls = harness.webhook.calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0], text);
}

/// S3 — barge-in: during an interruptible playback, fresh voice evidence
/// stops it immediately; a non-interruptible playback, or no evidence,
/// never does.
#[tokio::test]
async fn s3_barge_in_stops_interruptible_playback_only() {
    let harness = build(Arc::new(InMemoryRutWebhookClient::rejecting("unused")));
    assert!(harness
        .engine
        .evaluate_barge_in(TurnState::PlaybackActive, true, Some(VoiceEvidence::TalkDetected)));
    assert!(!harness
        .engine
        .evaluate_barge_in(TurnState::PlaybackActive, false, Some(VoiceEvidence::TalkDetected)));
    assert!(!harness.engine.evaluate_barge_in(TurnState::PlaybackActive, true, None));
    assert!(!harness
        .engine
        .evaluate_barge_in(TurnState::Listening, true, Some(VoiceEvidence::SttPartial)));
}

/// S4 — silence max: three consecutive silent turns end the call once
/// the turn-cap check trips, not because the domain asked to hang up.
#[tokio::test]
async fn s4_three_silent_turns_end_the_call() {
    let harness = build(Arc::new(InMemoryRutWebhookClient::rejecting("unused")));
    let mut machine = harness.engine.greet("call-1", "chan-1", "call-1").await.unwrap();
    let mut counters = TurnCounters::new();
    let mut skip_input = false;

    for _ in 0..2 {
        let outcome = harness
            .engine
            .run_turn("call-1", "chan-1", "call-1", &mut machine, &mut counters, &mut skip_input)
            .await
            .unwrap();
        assert_eq!(outcome, TurnOutcome::Continue);
    }

    let outcome = harness
        .engine
        .run_turn("call-1", "chan-1", "call-1", &mut machine, &mut counters, &mut skip_input)
        .await
        .unwrap();
    assert_eq!(outcome, TurnOutcome::Ended { reason: "turn_cap_exceeded" });
    assert_eq!(counters.consecutive_silences, 3);
    assert_eq!(machine.state(), TurnState::Terminating);
}

/// S5 — snoop not ready: while the contract sits in `WAITING_AST`, the
/// media plane doesn't recreate the snoop and `wait_audio_ready` times
/// out instead of reporting ready; retrying after the contract settles
/// succeeds without ever creating a second snoop channel.
#[tokio::test]
async fn s5_snoop_waiting_ast_is_not_recreated_and_gates_audio_ready() {
    let ari: Arc<dyn AriClient> = Arc::new(InMemoryAriClient::new());
    let cache: Arc<dyn SharedCache> = Arc::new(InMemoryCache::new());
    let store = Arc::new(SnoopContractStore::new(cache.clone()));
    let media = MediaPlaneController::new(ari, store.clone(), "crm_app", 3);

    let snoop_id = media.ensure_snoop("call-1", "chan-1", 0).await.unwrap();
    store.transition("call-1", SnoopState::WaitingAst, 1).await.unwrap();

    let timed_out = media.wait_audio_ready("call-1", &snoop_id, Duration::from_millis(80)).await;
    assert!(timed_out.is_err());

    // Retry: ensure_snoop must hand back the same in-flight snoop, not spawn
    // a second one, while the contract is still not Destroyed/Releasable.
    let retried_id = media.ensure_snoop("call-1", "chan-1", 2).await.unwrap();
    assert_eq!(retried_id, snoop_id);

    store.transition("call-1", SnoopState::Ready, 3).await.unwrap();
    media
        .wait_audio_ready("call-1", &snoop_id, Duration::from_millis(200))
        .await
        .unwrap();
}

/// S6 — webhook duplicate suppression: two `completed` events carrying
/// identical text suppress the second webhook call by hash idempotence,
/// distinct from the `already_validated` short-circuit (neither call here
/// is accepted, so that path can't be what's doing the suppressing).
#[tokio::test]
async fn s6_duplicate_completed_text_suppresses_the_second_webhook_call() {
    let cache: Arc<dyn SharedCache> = Arc::new(InMemoryCache::new());
    let webhook = Arc::new(InMemoryRutWebhookClient::rejecting("digit_count_out_of_range"));
    let events: EventBusRef = Arc::new(InMemoryEventBus::new());
    let rut = RutCaptureOrchestrator::new(cache.clone(), webhook.clone(), events, "clinica", 2);

    let text = "mi rut es 14.348.258-8";
    rut.handle_completed("call-1", ConversationPhase::ListenRut, text).await.unwrap();

    let first = rut.invoke_webhook("call-1", text, None, CaptureTrigger::TranscriptionCompleted).await.unwrap();
    let second = rut.invoke_webhook("call-1", text, None, CaptureTrigger::TranscriptionCompleted).await.unwrap();

    assert!(matches!(first, WebhookInvocation::Invoked { accepted: false, .. }));
    assert_eq!(second, WebhookInvocation::Skipped { reason: "duplicate_hash" });
    assert_eq!(webhook.calls.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn teardown_releases_media_resources_acquired_mid_call() {
    let harness = build(Arc::new(InMemoryRutWebhookClient::rejecting("unused")));
    harness.engine.greet("call-1", "chan-1", "call-1").await.unwrap();
    harness.ari.calls.lock().unwrap().clear();
    harness.engine.teardown("call-1").await.unwrap();
}
