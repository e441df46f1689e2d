//! Shared TTL-keyed cache used for cross-task call state: phase, snoop
//! contracts, RUT capture idempotence keys, all need to be visible to
//! whichever task is currently handling a given call.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("poisoned lock")]
    Poisoned,
}

pub type Result<T> = std::result::Result<T, CacheError>;

/// Abstraction over the shared cache so the engine can be tested without a
/// real Redis instance.
#[async_trait]
pub trait SharedCache: Send + Sync {
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn del(&self, key: &str) -> Result<()>;
    /// Atomic "set if absent" used by the webhook idempotence check (C9).
    async fn set_nx_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool>;
}

/// Redis-backed implementation for production use.
pub struct RedisCache {
    client: redis::Client,
}

impl RedisCache {
    pub fn new(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl SharedCache for RedisCache {
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl_secs)
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        redis::cmd("DEL").arg(key).query_async::<()>(&mut conn).await?;
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let set: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs)
            .query_async(&mut conn)
            .await?;
        Ok(set.is_some())
    }
}

struct Entry {
    value: String,
    expires_at: Instant,
}

/// In-memory cache for unit/integration tests, with manual expiry sweeps on
/// every access (no background task needed — tests are short-lived).
#[derive(Default)]
pub struct InMemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn sweep_and_get<'a>(
        entries: &'a mut HashMap<String, Entry>,
        key: &str,
    ) -> Option<&'a Entry> {
        if let Some(entry) = entries.get(key) {
            if entry.expires_at <= Instant::now() {
                entries.remove(key);
                return None;
            }
        }
        entries.get(key)
    }
}

#[async_trait]
impl SharedCache for InMemoryCache {
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        let mut entries = self.entries.lock().map_err(|_| CacheError::Poisoned)?;
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Instant::now() + Duration::from_secs(ttl_secs),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.entries.lock().map_err(|_| CacheError::Poisoned)?;
        Ok(Self::sweep_and_get(&mut entries, key).map(|e| e.value.clone()))
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().map_err(|_| CacheError::Poisoned)?;
        entries.remove(key);
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool> {
        let mut entries = self.entries.lock().map_err(|_| CacheError::Poisoned)?;
        if Self::sweep_and_get(&mut entries, key).is_some() {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Instant::now() + Duration::from_secs(ttl_secs),
            },
        );
        Ok(true)
    }
}

/// Key builders for the well-known cache keys. Centralized here so every
/// component spells them identically.
pub mod keys {
    pub fn phase(linked_id: &str) -> String {
        format!("phase:{linked_id}")
    }

    pub fn snoop_contract(linked_id: &str) -> String {
        format!("snoop:contract:{linked_id}")
    }

    pub fn snoop_active(linked_id: &str) -> String {
        format!("snoop:active:{linked_id}")
    }

    pub fn rut_webhook_sent(linked_id: &str) -> String {
        format!("rut:webhook:sent:{linked_id}")
    }

    pub fn rut_webhook_hash(linked_id: &str) -> String {
        format!("rut:webhook:hash:{linked_id}")
    }

    pub fn rut_validated(linked_id: &str) -> String {
        format!("rut:validated:{linked_id}")
    }

    pub fn rut_consolidated_text(domain: &str, linked_id: &str) -> String {
        format!("voicebot:{domain}:{linked_id}:rut:consolidatedText")
    }

    pub fn rut_capture_frozen(domain: &str, linked_id: &str) -> String {
        format!("voicebot:{domain}:{linked_id}:rut:captureFrozen")
    }

    pub fn rut_last_speech_ts(domain: &str, linked_id: &str) -> String {
        format!("voicebot:{domain}:{linked_id}:rut:lastSpeechTs")
    }

    pub fn rut_delta_state(domain: &str, linked_id: &str) -> String {
        format!("voicebot:{domain}:{linked_id}:rut:deltaState")
    }

    pub fn session_identifier(linked_id: &str) -> String {
        format!("session:identifier:{linked_id}")
    }
}

/// TTLs (seconds) for the keys above.
pub mod ttl {
    pub const PHASE: u64 = 3600;
    pub const SNOOP_CONTRACT: u64 = 3600;
    pub const SNOOP_ACTIVE: u64 = 60;
    pub const RUT_WEBHOOK_SENT: u64 = 60;
    pub const RUT_WEBHOOK_HASH: u64 = 60;
    pub const RUT_VALIDATED: u64 = 3600;
    pub const RUT_CONSOLIDATED_TEXT: u64 = 3600;
    pub const RUT_CAPTURE_FROZEN: u64 = 60;
    pub const RUT_LAST_SPEECH_TS: u64 = 30;
    pub const RUT_DELTA_STATE: u64 = 30;
    pub const SESSION_IDENTIFIER: u64 = 3600;
}
