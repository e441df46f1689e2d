//! Media Plane Controller: creates the snoop, capture bridge and
//! ExternalMedia channel for a call, enforces the audio-ready gate, and
//! owns teardown order.
//!
//! Ownership boundary: this controller owns the ARI-side resources
//! (snoop, bridges, ExternalMedia). Cancelling the active STT response
//! and closing the UDP socket are owned by the STT client and the UDP
//! tap respectively — callers run those before `teardown_if_allowed`.

use std::sync::Arc;
use std::time::Duration;

use callcore_ari::{AriClient, AriError, ExternalMediaParams, SnoopParams};
use callcore_phase::ConversationPhase;
use callcore_snoop::{SnoopContractStore, SnoopError, SnoopState};

#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("ari error: {0}")]
    Ari(#[from] AriError),
    #[error("snoop contract error: {0}")]
    Snoop(#[from] SnoopError),
    #[error("teardown denied for current phase")]
    TeardownDenied,
    #[error("timed out waiting for audio-ready")]
    AudioReadyTimeout,
    #[error("exceeded retry budget adding channel to bridge")]
    RetriesExhausted,
}

pub type Result<T> = std::result::Result<T, MediaError>;

pub struct MediaPlaneController {
    ari: Arc<dyn AriClient>,
    snoop_store: Arc<SnoopContractStore>,
    ari_app: String,
    addchannel_max_retries: u32,
}

impl MediaPlaneController {
    pub fn new(ari: Arc<dyn AriClient>, snoop_store: Arc<SnoopContractStore>, ari_app: impl Into<String>, addchannel_max_retries: u32) -> Self {
        Self {
            ari,
            snoop_store,
            ari_app: ari_app.into(),
            addchannel_max_retries,
        }
    }

    /// The snoop is a session resource, not a phase resource: while in a
    /// transitory state the controller waits rather than
    /// recreating, and recreation is only permitted from `DESTROYED` or
    /// `RELEASABLE`.
    pub async fn ensure_snoop(&self, linked_id: &str, parent_channel_id: &str, now_ms: i64) -> Result<String> {
        if let Some(existing) = self.snoop_store.get(linked_id).await? {
            if existing.state != SnoopState::Destroyed && existing.state != SnoopState::Releasable {
                return Ok(existing.snoop_id);
            }
        }

        let channel = self
            .ari
            .snoop_channel(
                parent_channel_id,
                SnoopParams {
                    app: &self.ari_app,
                    app_args: &format!("linkedId={linked_id}"),
                    spy: "in",
                    whisper: "none",
                },
            )
            .await?;

        self.snoop_store
            .create(linked_id, &channel.id, parent_channel_id, now_ms)
            .await?;
        Ok(channel.id)
    }

    pub async fn ensure_capture_bridge(&self, linked_id: &str) -> Result<String> {
        if let Some(existing) = self.snoop_store.get(linked_id).await? {
            if let Some(bridge_id) = existing.capture_bridge_id {
                return Ok(bridge_id);
            }
        }

        let bridge = self.ari.bridge_create("mixing").await?;
        self.ari.set_channel_var(&bridge.id, "TALK_DETECT", "set").await.ok();
        self.snoop_store.attach_bridge(linked_id, &bridge.id).await?;
        Ok(bridge.id)
    }

    /// Adds the ExternalMedia channel to the capture bridge with
    /// exponential-backoff retry for the two recoverable ARI errors
    /// (100ms -> 800ms, capped retries).
    pub async fn ensure_external_media(&self, linked_id: &str, bridge_id: &str, udp_host: &str, udp_port: u16) -> Result<String> {
        if let Some(existing) = self.snoop_store.get(linked_id).await? {
            if let Some(external_media_id) = existing.external_media_id {
                return Ok(external_media_id);
            }
        }

        let channel = self
            .ari
            .external_media(ExternalMediaParams {
                app: &self.ari_app,
                external_host: &format!("{udp_host}:{udp_port}"),
                format: "ulaw",
                direction: "both",
                app_args: &format!("linkedId={linked_id},role=externalMedia,kind=stt"),
            })
            .await?;

        self.add_channel_with_retry(bridge_id, &channel.id).await?;
        self.snoop_store.attach_external_media(linked_id, &channel.id).await?;
        Ok(channel.id)
    }

    async fn add_channel_with_retry(&self, bridge_id: &str, channel_id: &str) -> Result<()> {
        let mut delay = Duration::from_millis(100);
        for attempt in 0..self.addchannel_max_retries {
            match self.ari.bridge_add_channel(bridge_id, channel_id).await {
                Ok(()) => return Ok(()),
                Err(err) if err.recoverable() => {
                    tracing::debug!(attempt, ?delay, "retrying addChannel after recoverable ari error");
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(Duration::from_millis(800));
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(MediaError::RetriesExhausted)
    }

    /// Snoop "ready for audio" is the contract reaching `READY`; a
    /// best-effort channel query is telemetry only and must never cause a
    /// false negative.
    pub async fn wait_audio_ready(&self, linked_id: &str, snoop_id: &str, timeout: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(contract) = self.snoop_store.get(linked_id).await? {
                if contract.state == SnoopState::Ready {
                    if let Ok(channel) = self.ari.channel_get(snoop_id).await {
                        tracing::debug!(state = %channel.state, "telemetry channel query at audio-ready");
                    }
                    return Ok(());
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(MediaError::AudioReadyTimeout);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// During stasis end, teardown is always permitted regardless of phase;
    /// pass `force_stasis_end = true` in that case.
    pub async fn teardown_if_allowed(&self, linked_id: &str, phase: ConversationPhase, force_stasis_end: bool) -> Result<()> {
        if !force_stasis_end && !callcore_phase::is_teardown_allowed(phase) {
            return Err(MediaError::TeardownDenied);
        }

        if let Some(contract) = self.snoop_store.get(linked_id).await? {
            if let Some(external_media_id) = &contract.external_media_id {
                self.ari.channel_hangup(external_media_id).await.ok();
            }
            if let Some(bridge_id) = &contract.capture_bridge_id {
                self.ari.bridge_destroy(bridge_id).await.ok();
            }
        }

        self.snoop_store.release(linked_id, 0).await?;
        self.snoop_store.destroy(linked_id).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use callcore_ari::InMemoryAriClient;
    use callcore_cache::InMemoryCache;
    use callcore_snoop::SnoopState;

    fn controller() -> (MediaPlaneController, Arc<InMemoryAriClient>) {
        let ari = Arc::new(InMemoryAriClient::new());
        let store = Arc::new(SnoopContractStore::new(Arc::new(InMemoryCache::new())));
        (
            MediaPlaneController::new(ari.clone(), store, "crm_app", 3),
            ari,
        )
    }

    #[tokio::test]
    async fn ensure_snoop_creates_once_and_reuses_afterward() {
        let (controller, _ari) = controller();
        let id1 = controller.ensure_snoop("call-1", "chan-1", 0).await.unwrap();
        let id2 = controller.ensure_snoop("call-1", "chan-1", 0).await.unwrap();
        assert_eq!(id1, id2);
    }

    #[tokio::test]
    async fn ensure_capture_bridge_is_idempotent() {
        let (controller, _ari) = controller();
        controller.ensure_snoop("call-1", "chan-1", 0).await.unwrap();
        let b1 = controller.ensure_capture_bridge("call-1").await.unwrap();
        let b2 = controller.ensure_capture_bridge("call-1").await.unwrap();
        assert_eq!(b1, b2);
    }

    #[tokio::test]
    async fn wait_audio_ready_succeeds_once_contract_reaches_ready() {
        let ari = Arc::new(InMemoryAriClient::new());
        let store = Arc::new(SnoopContractStore::new(Arc::new(InMemoryCache::new())));
        let controller = MediaPlaneController::new(ari, store.clone(), "crm_app", 3);

        let snoop_id = controller.ensure_snoop("call-2", "chan-2", 0).await.unwrap();
        store.transition("call-2", SnoopState::WaitingAst, 1).await.unwrap();
        store.transition("call-2", SnoopState::Ready, 2).await.unwrap();

        controller
            .wait_audio_ready("call-2", &snoop_id, Duration::from_millis(200))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn wait_audio_ready_times_out_while_snoop_stays_waiting() {
        let ari = Arc::new(InMemoryAriClient::new());
        let store = Arc::new(SnoopContractStore::new(Arc::new(InMemoryCache::new())));
        let controller = MediaPlaneController::new(ari, store.clone(), "crm_app", 3);

        let snoop_id = controller.ensure_snoop("call-3", "chan-3", 0).await.unwrap();
        store.transition("call-3", SnoopState::WaitingAst, 1).await.unwrap();

        let err = controller
            .wait_audio_ready("call-3", &snoop_id, Duration::from_millis(80))
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::AudioReadyTimeout));
    }

    #[tokio::test]
    async fn teardown_denied_outside_stasis_end_for_non_teardown_phase() {
        let (controller, _ari) = controller();
        controller.ensure_snoop("call-1", "chan-1", 0).await.unwrap();
        let err = controller
            .teardown_if_allowed("call-1", ConversationPhase::ListenRut, false)
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::TeardownDenied));
    }

    #[tokio::test]
    async fn teardown_forced_at_stasis_end_destroys_snoop() {
        let (controller, _ari) = controller();
        controller.ensure_snoop("call-1", "chan-1", 0).await.unwrap();
        controller
            .teardown_if_allowed("call-1", ConversationPhase::ListenRut, true)
            .await
            .unwrap();
    }
}
