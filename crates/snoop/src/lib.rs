//! Snoop contract store: a finite-state contract for
//! each call's audio-tap channel, persisted so the engine and any
//! PBX-event listener agree on readiness.

use std::sync::Arc;

use callcore_cache::{keys, ttl, CacheError, SharedCache};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum SnoopError {
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("an active snoop contract already exists for this call")]
    AlreadyActive,
    #[error("no snoop contract exists for this call")]
    NotFound,
    #[error("illegal transition from {from:?} to {to:?}")]
    IllegalTransition { from: SnoopState, to: SnoopState },
}

pub type Result<T> = std::result::Result<T, SnoopError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnoopState {
    Created,
    WaitingAst,
    Ready,
    Consumed,
    Releasable,
    Destroyed,
}

impl SnoopState {
    /// The legal transition graph: `CREATED -> WAITING_AST ->
    /// READY -> CONSUMED -> RELEASABLE -> DESTROYED`.
    fn can_transition_to(self, to: SnoopState) -> bool {
        matches!(
            (self, to),
            (SnoopState::Created, SnoopState::WaitingAst)
                | (SnoopState::WaitingAst, SnoopState::Ready)
                | (SnoopState::Ready, SnoopState::Consumed)
                | (SnoopState::Consumed, SnoopState::Releasable)
                | (SnoopState::Releasable, SnoopState::Destroyed)
        )
    }

    /// Only `DESTROYED` and `RELEASABLE` permit a new snoop to be created
    /// for the same call; every other state has a live snoop/bridge still
    /// in use.
    fn is_active(self) -> bool {
        !matches!(self, SnoopState::Destroyed | SnoopState::Releasable)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnoopContract {
    pub snoop_id: String,
    pub parent_channel_id: String,
    pub capture_bridge_id: Option<String>,
    pub external_media_id: Option<String>,
    pub state: SnoopState,
    /// Epoch-ms timestamp of the most recent state transition.
    pub transitioned_at_ms: i64,
}

pub struct SnoopContractStore {
    cache: Arc<dyn SharedCache>,
}

impl SnoopContractStore {
    pub fn new(cache: Arc<dyn SharedCache>) -> Self {
        Self { cache }
    }

    pub async fn create(
        &self,
        linked_id: &str,
        snoop_id: &str,
        parent_channel_id: &str,
        now_ms: i64,
    ) -> Result<SnoopContract> {
        if let Some(existing) = self.get(linked_id).await? {
            if existing.state.is_active() {
                return Err(SnoopError::AlreadyActive);
            }
        }

        let contract = SnoopContract {
            snoop_id: snoop_id.to_string(),
            parent_channel_id: parent_channel_id.to_string(),
            capture_bridge_id: None,
            external_media_id: None,
            state: SnoopState::Created,
            transitioned_at_ms: now_ms,
        };
        self.persist(linked_id, &contract).await?;
        Ok(contract)
    }

    pub async fn get(&self, linked_id: &str) -> Result<Option<SnoopContract>> {
        let raw = self.cache.get(&keys::snoop_contract(linked_id)).await?;
        Ok(raw.and_then(|s| serde_json::from_str(&s).ok()))
    }

    pub async fn transition(
        &self,
        linked_id: &str,
        to: SnoopState,
        now_ms: i64,
    ) -> Result<SnoopContract> {
        let mut contract = self.get(linked_id).await?.ok_or(SnoopError::NotFound)?;
        if !contract.state.can_transition_to(to) {
            tracing::warn!(linked_id, from = ?contract.state, to = ?to, "rejected illegal snoop transition");
            return Err(SnoopError::IllegalTransition {
                from: contract.state,
                to,
            });
        }
        contract.state = to;
        contract.transitioned_at_ms = now_ms;
        self.persist(linked_id, &contract).await?;
        Ok(contract)
    }

    pub async fn attach_bridge(&self, linked_id: &str, bridge_id: &str) -> Result<SnoopContract> {
        let mut contract = self.get(linked_id).await?.ok_or(SnoopError::NotFound)?;
        contract.capture_bridge_id = Some(bridge_id.to_string());
        self.persist(linked_id, &contract).await?;
        Ok(contract)
    }

    pub async fn attach_external_media(
        &self,
        linked_id: &str,
        external_media_id: &str,
    ) -> Result<SnoopContract> {
        let mut contract = self.get(linked_id).await?.ok_or(SnoopError::NotFound)?;
        contract.external_media_id = Some(external_media_id.to_string());
        self.persist(linked_id, &contract).await?;
        Ok(contract)
    }

    /// Idempotent: releasing an already-released or already-destroyed
    /// contract is a no-op.
    pub async fn release(&self, linked_id: &str, now_ms: i64) -> Result<()> {
        let Some(contract) = self.get(linked_id).await? else {
            return Ok(());
        };
        if matches!(contract.state, SnoopState::Releasable | SnoopState::Destroyed) {
            return Ok(());
        }
        self.transition(linked_id, SnoopState::Releasable, now_ms)
            .await?;
        Ok(())
    }

    /// Idempotent: destroying an already-destroyed contract is a no-op and
    /// returns success.
    pub async fn destroy(&self, linked_id: &str) -> Result<()> {
        let Some(contract) = self.get(linked_id).await? else {
            return Ok(());
        };
        if contract.state == SnoopState::Destroyed {
            return Ok(());
        }
        self.cache.del(&keys::snoop_contract(linked_id)).await?;
        Ok(())
    }

    async fn persist(&self, linked_id: &str, contract: &SnoopContract) -> Result<()> {
        let json = serde_json::to_string(contract).expect("SnoopContract always serializes");
        self.cache
            .set_ex(&keys::snoop_contract(linked_id), &json, ttl::SNOOP_CONTRACT)
            .await?;
        Ok(())
    }
}
