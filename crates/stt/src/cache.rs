//! Process-wide TTS cache: a bounded, read-mostly keyed map evicting the
//! least-recently-used entry on overflow.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct TtsCacheKey {
    pub text: String,
    pub voice: String,
}

struct Entry {
    bytes: Vec<u8>,
    last_used: Instant,
}

pub struct TtsCache {
    entries: Mutex<HashMap<TtsCacheKey, Entry>>,
    capacity: usize,
}

impl TtsCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    pub fn get(&self, key: &TtsCacheKey) -> Option<Vec<u8>> {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries.get_mut(key)?;
        entry.last_used = Instant::now();
        Some(entry.bytes.clone())
    }

    pub fn insert(&self, key: TtsCacheKey, bytes: Vec<u8>) {
        let mut entries = self.entries.lock().unwrap();
        if entries.len() >= self.capacity && !entries.contains_key(&key) {
            if let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(k, _)| k.clone())
            {
                entries.remove(&oldest);
            }
        }
        entries.insert(
            key,
            Entry {
                bytes,
                last_used: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(text: &str) -> TtsCacheKey {
        TtsCacheKey {
            text: text.to_string(),
            voice: "alloy".to_string(),
        }
    }

    #[test]
    fn insert_then_get_roundtrips() {
        let cache = TtsCache::new(2);
        cache.insert(key("hola"), vec![1, 2, 3]);
        assert_eq!(cache.get(&key("hola")), Some(vec![1, 2, 3]));
    }

    #[test]
    fn miss_returns_none() {
        let cache = TtsCache::new(2);
        assert_eq!(cache.get(&key("missing")), None);
    }

    #[test]
    fn evicts_least_recently_used_on_overflow() {
        let cache = TtsCache::new(2);
        cache.insert(key("a"), vec![1]);
        cache.insert(key("b"), vec![2]);
        // touch "a" so "b" becomes the least-recently-used entry.
        cache.get(&key("a"));
        cache.insert(key("c"), vec![3]);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&key("a")), Some(vec![1]));
        assert_eq!(cache.get(&key("c")), Some(vec![3]));
        assert_eq!(cache.get(&key("b")), None);
    }
}
