//! TTL-bounded key-value store backing the channel session state.
//!
//! Values are stored as serialized JSON so the session layer can keep
//! lists of typed records without the cache knowing about them. Expired
//! entries are dropped lazily on read.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::warn;

struct Entry {
    value: Value,
    expires_at: Instant,
}

#[derive(Clone, Default)]
pub struct TtlCache {
    inner: Arc<Mutex<HashMap<String, Entry>>>,
}

impl TtlCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the stored value, or `None` when missing or expired.
    /// A value that fails to deserialize is treated as missing.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let mut map = self.inner.lock().unwrap();
        if map.get(key).is_some_and(|e| e.expires_at <= Instant::now()) {
            map.remove(key);
            return None;
        }
        let entry = map.get(key)?;
        match serde_json::from_value(entry.value.clone()) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!("cache entry {} has unexpected shape: {}", key, e);
                None
            }
        }
    }

    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.get(key).unwrap_or(default)
    }

    /// Stores `value`, refreshing the key's TTL.
    pub fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        let serialized = match serde_json::to_value(value) {
            Ok(v) => v,
            Err(e) => {
                warn!("failed to serialize cache entry {}: {}", key, e);
                return;
            }
        };
        let mut map = self.inner.lock().unwrap();
        map.insert(
            key.to_string(),
            Entry {
                value: serialized,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    pub fn delete(&self, key: &str) {
        self.inner.lock().unwrap().remove(key);
    }

    /// Atomic read-modify-write on a single key. The transform runs under
    /// the store lock, so two concurrent updates can never lose an append
    /// the way a fetch/mutate/overwrite sequence would.
    ///
    /// Missing, expired, or malformed entries start from `T::default()`.
    /// The key's TTL is refreshed.
    pub fn update<T, R>(&self, key: &str, ttl: Duration, f: impl FnOnce(&mut T) -> R) -> R
    where
        T: Serialize + DeserializeOwned + Default,
    {
        let mut map = self.inner.lock().unwrap();
        let mut current: T = match map.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                serde_json::from_value(entry.value.clone()).unwrap_or_else(|e| {
                    warn!("cache entry {} has unexpected shape: {}", key, e);
                    T::default()
                })
            }
            _ => T::default(),
        };
        let result = f(&mut current);
        match serde_json::to_value(&current) {
            Ok(v) => {
                map.insert(
                    key.to_string(),
                    Entry {
                        value: v,
                        expires_at: Instant::now() + ttl,
                    },
                );
            }
            Err(e) => warn!("failed to serialize cache entry {}: {}", key, e),
        }
        result
    }
}
