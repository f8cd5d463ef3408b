//! Bounded FIFO cache of prepared statement handles

use std::collections::{HashMap, VecDeque};
use std::sync::OnceLock;

use regex::Regex;

/// Cache key for a statement: its text with whitespace runs collapsed
pub fn normalize_key(text: &str) -> String {
    static WHITESPACE: OnceLock<Regex> = OnceLock::new();
    let re = WHITESPACE.get_or_init(|| Regex::new(r"\s+").expect("static regex"));
    re.replace_all(text.trim(), " ").into_owned()
}

/// Prepared statements keyed by normalized text, evicted oldest-first.
///
/// Handles leaving the cache are handed back to the caller so the driver
/// can free them.
#[derive(Debug)]
pub struct StatementCache<H> {
    capacity: usize,
    order: VecDeque<String>,
    entries: HashMap<String, H>,
}

impl<H> StatementCache<H> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            entries: HashMap::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&H> {
        self.entries.get(key)
    }

    /// Insert a handle, returning whatever had to make room for it
    pub fn insert(&mut self, key: String, handle: H) -> Vec<H> {
        let mut evicted = Vec::new();
        if self.capacity == 0 {
            evicted.push(handle);
            return evicted;
        }

        if let Some(old) = self.remove(&key) {
            evicted.push(old);
        }
        while self.entries.len() >= self.capacity {
            match self.order.pop_front() {
                Some(oldest) => evicted.extend(self.entries.remove(&oldest)),
                None => break,
            }
        }

        self.order.push_back(key.clone());
        self.entries.insert(key, handle);
        evicted
    }

    pub fn remove(&mut self, key: &str) -> Option<H> {
        let handle = self.entries.remove(key)?;
        self.order.retain(|k| k != key);
        Some(handle)
    }

    /// Empty the cache, returning every handle
    pub fn drain(&mut self) -> Vec<H> {
        self.order.clear();
        self.entries.drain().map(|(_, h)| h).collect()
    }
}
