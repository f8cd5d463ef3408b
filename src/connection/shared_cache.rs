//! Shared key/value cache injected into connections
//!
//! Connections of the same process share one cache instance, passed in at
//! construction. It memoizes facts that are expensive to re-establish per
//! link, such as which databases have already been verified.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Minimal get/set/delete contract of a cache pool
pub trait SharedCache: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    /// Store `value`, expiring after `ttl` when one is given
    fn set(&self, key: &str, value: String, ttl: Option<Duration>);

    /// Returns whether the key was present
    fn delete(&self, key: &str) -> bool;
}

/// In-process cache backed by a map
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (String, Option<Instant>)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl SharedCache for MemoryCache {
    fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock();
        let expired = matches!(entries.get(key), Some((_, Some(expires))) if *expires <= Instant::now());
        if expired {
            entries.remove(key);
            return None;
        }
        entries.get(key).map(|(value, _)| value.clone())
    }

    fn set(&self, key: &str, value: String, ttl: Option<Duration>) {
        let expires = ttl.map(|t| Instant::now() + t);
        self.entries.lock().insert(key.to_string(), (value, expires));
    }

    fn delete(&self, key: &str) -> bool {
        self.entries.lock().remove(key).is_some()
    }
}
