//! Fingerprint-addressed response cache shared by all requests.
//!
//! Entries are immutable `Arc`s; `put` swaps the whole entry inside the map
//! shard, so a concurrent `get` sees either the old or the new response.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::fingerprint::Fingerprint;
use crate::providers::TokenUsage;

/// Cached provider answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedPayload {
    pub text: String,
    pub usage: TokenUsage,
    pub provider: String,
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub fingerprint: Fingerprint,
    pub payload: CachedPayload,
    pub created_at: DateTime<Utc>,
    pub ttl: Duration,
    stored_at: Instant,
}

impl CachedResponse {
    pub fn is_expired(&self) -> bool {
        self.stored_at.elapsed() >= self.ttl
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
    pub evictions: u64,
}

#[derive(Default)]
pub struct ResponseCache {
    entries: DashMap<Fingerprint, Arc<CachedResponse>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the live entry, purging it first if its TTL has passed
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<Arc<CachedResponse>> {
        let entry = self.entries.get(fingerprint).map(|entry| Arc::clone(entry.value()));

        match entry {
            Some(entry) if !entry.is_expired() => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry)
            }
            Some(expired) => {
                // only remove the entry we looked at; a fresh put may have replaced it
                if self
                    .entries
                    .remove_if(fingerprint, |_, current| Arc::ptr_eq(current, &expired))
                    .is_some()
                {
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                    debug!(fingerprint = %fingerprint.short(), "Evicted expired cache entry");
                }
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Stores `payload`, replacing any previous entry (last write wins)
    pub fn put(&self, fingerprint: Fingerprint, payload: CachedPayload, ttl: Duration) {
        let entry = Arc::new(CachedResponse {
            fingerprint: fingerprint.clone(),
            payload,
            created_at: Utc::now(),
            ttl,
            stored_at: Instant::now(),
        });
        self.entries.insert(fingerprint, entry);
    }

    pub fn invalidate(&self, fingerprint: &Fingerprint) -> bool {
        let removed = self.entries.remove(fingerprint).is_some();
        if removed {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    /// Drops every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired());
        let purged = before.saturating_sub(self.entries.len());
        self.evictions.fetch_add(purged as u64, Ordering::Relaxed);
        purged
    }

    pub fn clear(&self) {
        let cleared = self.entries.len();
        self.entries.clear();
        self.evictions.fetch_add(cleared as u64, Ordering::Relaxed);
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            size: self.entries.len(),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}
