//! TTL response cache keyed by the canonicalized request.
//!
//! Consulted before the rate bucket is charged: cache hits never consume
//! tokens. Entries expire after the configured TTL and can be dropped
//! wholesale by the admin purge endpoint.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Entry {
    stored_at: Instant,
    bytes: Vec<u8>,
}

pub struct ResponseCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, Entry>>,
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let mut entries = self.entries.lock().expect("cache poisoned");
        match entries.get(key) {
            Some(entry) if entry.stored_at.elapsed() < self.ttl => {
                metrics::counter!("connector_cache_hits_total").increment(1);
                Some(entry.bytes.clone())
            }
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, key: String, bytes: Vec<u8>) {
        let mut entries = self.entries.lock().expect("cache poisoned");
        entries.insert(
            key,
            Entry {
                stored_at: Instant::now(),
                bytes,
            },
        );
    }

    /// Drop everything. Explicit invalidation for operators.
    pub fn purge(&self) -> usize {
        let mut entries = self.entries.lock().expect("cache poisoned");
        let n = entries.len();
        entries.clear();
        n
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("cache poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
