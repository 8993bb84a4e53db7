//! Key-value persistence behind aliases, stars, history and the
//! conversation cache.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

/// How long a stored value stays readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTtl {
    /// No expiry; the value lives until removed or overwritten.
    Keep,
    /// Drop the value after this long.
    For(Duration),
}

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;
    fn set(&self, key: &str, value: Value, ttl: CacheTtl);
    fn remove(&self, key: &str);
}

/// Fetch and decode a stored value. Missing keys and stale payloads
/// both read as `None`.
pub fn get_typed<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Option<T> {
    let value = store.get(key)?;
    match serde_json::from_value(value) {
        Ok(decoded) => Some(decoded),
        Err(e) => {
            debug!(key, error = %e, "discarding undecodable stored value");
            None
        }
    }
}

pub fn set_typed<T: Serialize>(store: &dyn KeyValueStore, key: &str, value: &T, ttl: CacheTtl) {
    match serde_json::to_value(value) {
        Ok(encoded) => store.set(key, encoded, ttl),
        Err(e) => debug!(key, error = %e, "skipping unserializable value"),
    }
}

struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

/// In-memory store; the default backing for tests and the CLI.
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<Value> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(key) {
            Some(entry) if entry.expires_at.is_some_and(|at| Instant::now() >= at) => {
                entries.remove(key);
                None
            }
            Some(entry) => Some(entry.value.clone()),
            None => None,
        }
    }

    fn set(&self, key: &str, value: Value, ttl: CacheTtl) {
        let expires_at = match ttl {
            CacheTtl::Keep => None,
            CacheTtl::For(duration) => Some(Instant::now() + duration),
        };
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), Entry { value, expires_at });
    }

    fn remove(&self, key: &str) {
        self.entries.lock().unwrap().remove(key);
    }
}
