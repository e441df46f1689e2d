//! RUT Capture Orchestrator: runs alongside the turn state machine while
//! the phase is one of the three listening phases, freezing capture on
//! the first completed transcript in `LISTEN_RUT`, filtering candidate text,
//! and driving the at-most-once validation webhook.

mod filter;
mod trigger;
mod webhook;

use std::sync::Arc;

use callcore_cache::{keys, ttl, SharedCache};
use callcore_events::{event_names, EventBusRef, RutWebhookEvent};
use callcore_phase::ConversationPhase;
use sha2::{Digest, Sha256};

pub use filter::{semantic_filter, FilterOutcome};
pub use trigger::CaptureTrigger;
pub use webhook::{HttpRutWebhookClient, InMemoryRutWebhookClient, RutWebhookClient, WebhookRequest, WebhookResponse};

#[derive(Debug, thiserror::Error)]
pub enum RutCaptureError {
    #[error("cache error: {0}")]
    Cache(#[from] callcore_cache::CacheError),
    #[error("webhook error: {0}")]
    Webhook(#[from] webhook::WebhookError),
}

pub type Result<T> = std::result::Result<T, RutCaptureError>;

/// Result of observing a partial (delta) event; timing-only, never used to
/// assemble the RUT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartialOutcome {
    Tracked,
    /// `N` consecutive empty deltas reached; the orchestrator should treat
    /// this as `early-stable-state` and may attempt the webhook.
    EarlyStableStateReached,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletedOutcome {
    /// Capture was already frozen for this call; the event is ignored.
    Dropped,
    Processed {
        /// Hard-stop STT is required exactly once: the first completed event
        /// observed while in `LISTEN_RUT`.
        requires_hard_stop: bool,
        filter: FilterOutcome,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookInvocation {
    Skipped { reason: &'static str },
    Invoked { accepted: bool, rut: Option<String>, reason: Option<String> },
}

pub struct RutCaptureOrchestrator {
    cache: Arc<dyn SharedCache>,
    webhook: Arc<dyn RutWebhookClient>,
    events: EventBusRef,
    domain: String,
    early_stable_n: u32,
}

impl RutCaptureOrchestrator {
    pub fn new(cache: Arc<dyn SharedCache>, webhook: Arc<dyn RutWebhookClient>, events: EventBusRef, domain: impl Into<String>, early_stable_n: u32) -> Self {
        Self {
            cache,
            webhook,
            events,
            domain: domain.into(),
            early_stable_n,
        }
    }

    pub fn audio_settled_deadline_ms(&self, last_speech_ts_ms: u64, debounce_ms: u64) -> u64 {
        last_speech_ts_ms + debounce_ms
    }

    pub async fn is_frozen(&self, linked_id: &str) -> Result<bool> {
        Ok(self.cache.get(&keys::rut_capture_frozen(&self.domain, linked_id)).await?.is_some())
    }

    /// Partial (delta) event handling: updates `lastSpeechTs` and the
    /// empty-delta counter. Never assembles a transcript from deltas.
    pub async fn on_partial(&self, linked_id: &str, now_ms: u64, is_empty: bool) -> Result<PartialOutcome> {
        self.cache
            .set_ex(&keys::rut_last_speech_ts(&self.domain, linked_id), &now_ms.to_string(), ttl::RUT_LAST_SPEECH_TS)
            .await?;

        let key = keys::rut_delta_state(&self.domain, linked_id);
        let current: u32 = self.cache.get(&key).await?.and_then(|s| s.parse().ok()).unwrap_or(0);

        if !is_empty {
            self.cache.del(&key).await?;
            return Ok(PartialOutcome::Tracked);
        }

        let next = current + 1;
        self.cache.set_ex(&key, &next.to_string(), ttl::RUT_DELTA_STATE).await?;
        if next >= self.early_stable_n {
            Ok(PartialOutcome::EarlyStableStateReached)
        } else {
            Ok(PartialOutcome::Tracked)
        }
    }

    /// Completed-event handling: freeze capture, persist the consolidated
    /// text, and run it through the semantic filter.
    pub async fn handle_completed(&self, linked_id: &str, phase: ConversationPhase, text: &str) -> Result<CompletedOutcome> {
        let frozen_key = keys::rut_capture_frozen(&self.domain, linked_id);
        if self.cache.get(&frozen_key).await?.is_some() {
            return Ok(CompletedOutcome::Dropped);
        }

        let requires_hard_stop = phase == ConversationPhase::ListenRut;
        if requires_hard_stop {
            tracing::debug!(linked_id, "freezing rut capture on first completed event in listen_rut");
            self.cache.set_ex(&frozen_key, "true", ttl::RUT_CAPTURE_FROZEN).await?;
        }

        self.cache
            .set_ex(&keys::rut_consolidated_text(&self.domain, linked_id), text, ttl::RUT_CONSOLIDATED_TEXT)
            .await?;

        let filter = semantic_filter(text);
        Ok(CompletedOutcome::Processed { requires_hard_stop, filter })
    }

    /// At-most-once webhook invocation with hash-based idempotence and
    /// upgrade-only-on-strictly-stronger-trigger ordering.
    pub async fn invoke_webhook(&self, linked_id: &str, text: &str, rut_hint: Option<&str>, trigger: CaptureTrigger) -> Result<WebhookInvocation> {
        let validated_key = keys::rut_validated(linked_id);
        if self.cache.get(&validated_key).await?.is_some() {
            return Ok(WebhookInvocation::Skipped { reason: "already_validated" });
        }

        let trimmed = text.trim();
        let hash = hash_text(trimmed);
        let hash_key = keys::rut_webhook_hash(linked_id);

        if let Some(stored) = self.cache.get(&hash_key).await? {
            if let Some((stored_hash, stored_rank)) = stored.split_once(':') {
                if stored_hash == hash {
                    return Ok(WebhookInvocation::Skipped { reason: "duplicate_hash" });
                }
                let stored_rank: u8 = stored_rank.parse().unwrap_or(0);
                if trigger.rank() <= stored_rank {
                    return Ok(WebhookInvocation::Skipped { reason: "weaker_trigger" });
                }
            }
        }

        self.cache
            .set_ex(&hash_key, &format!("{hash}:{}", trigger.rank()), ttl::RUT_WEBHOOK_HASH)
            .await?;

        let response = self
            .webhook
            .validate(WebhookRequest {
                linked_id,
                raw_text: trimmed,
                rut: rut_hint,
            })
            .await?;

        self.cache.set_ex(&keys::rut_webhook_sent(linked_id), "true", ttl::RUT_WEBHOOK_SENT).await?;
        if response.accepted {
            self.cache.set_ex(&validated_key, trimmed, ttl::RUT_VALIDATED).await?;
        }

        let topic = if response.accepted { event_names::RUT_WEBHOOK_SUCCESS } else { event_names::RUT_WEBHOOK_REJECTED };
        self.events.emit(
            topic,
            serde_json::to_value(RutWebhookEvent {
                linked_id: linked_id.to_string(),
                accepted: response.accepted,
                rut: response.rut.clone(),
                reason: response.reason.clone(),
            })
            .unwrap_or_default(),
        );

        Ok(WebhookInvocation::Invoked {
            accepted: response.accepted,
            rut: response.rut,
            reason: response.reason,
        })
    }
}

fn hash_text(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    hex::encode(&digest[..16])
}
