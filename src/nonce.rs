//! Replay-protection nonce lifecycle
//!
//! Every enhanced signature request gets a fresh single-use nonce persisted
//! under a prefixed key. Expired and corrupt entries are garbage-collected
//! on a timer; cleanup removes solely by expiry or corruption, so an active
//! (non-expired) nonce can never be evicted out from under an in-flight
//! signature request.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::storage::SafeStorage;

pub const NONCE_PREFIX: &str = "arbiuswallet_nonce_";

/// Replay window for a signed message, in seconds
pub const NONCE_TTL_SECS: i64 = 5 * 60;

const CLEANUP_INTERVAL: StdDuration = StdDuration::from_secs(60 * 60);

/// Persisted nonce payload, keyed by `arbiuswallet_nonce_<id>`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NonceRecord {
    pub address: String,
    pub issued_at: String,
    pub expires_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NonceStats {
    pub total: usize,
    pub expired: usize,
}

/// Cancellation handle for the periodic cleanup task
pub struct CleanupHandle {
    token: CancellationToken,
}

impl CleanupHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }
}

impl Drop for CleanupHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Issues, inspects, and garbage-collects replay-protection nonces
#[derive(Clone)]
pub struct NonceStore {
    storage: SafeStorage,
    clock: Arc<dyn Clock>,
}

impl NonceStore {
    pub fn new(storage: SafeStorage, clock: Arc<dyn Clock>) -> Self {
        Self { storage, clock }
    }

    /// Issue a fresh nonce for `address` and persist it
    ///
    /// A storage failure only warns: the signature flow proceeds, the nonce
    /// is just unverifiable afterwards.
    pub fn issue(&self, address: &str) -> (String, NonceRecord) {
        let id = Uuid::new_v4().to_string();
        let issued = self.clock.now();
        let record = NonceRecord {
            address: address.to_string(),
            issued_at: issued.to_rfc3339(),
            expires_at: (issued + chrono::Duration::seconds(NONCE_TTL_SECS)).to_rfc3339(),
        };

        match serde_json::to_string(&record) {
            Ok(json) => {
                if !self.storage.set(&nonce_key(&id), &json) {
                    warn!("failed to persist nonce {}", id);
                }
            }
            Err(e) => warn!("failed to serialize nonce {}: {}", id, e),
        }

        (id, record)
    }

    /// Load a stored nonce by id
    pub fn load(&self, id: &str) -> Option<NonceRecord> {
        let raw = self.storage.get(&nonce_key(id))?;
        serde_json::from_str(&raw).ok()
    }

    /// Whether a record's expiry has passed (unparsable expiry counts as
    /// expired)
    pub fn is_expired(&self, record: &NonceRecord) -> bool {
        match DateTime::parse_from_rfc3339(&record.expires_at) {
            Ok(expires_at) => expires_at.with_timezone(&Utc) < self.clock.now(),
            Err(_) => true,
        }
    }

    /// Remove expired and corrupt nonce entries; returns how many went away
    ///
    /// Only keys under the nonce prefix are touched. A failing store yields
    /// 0 rather than an error.
    pub fn cleanup_expired_nonces(&self) -> usize {
        let mut cleaned = 0;

        for key in self.nonce_keys() {
            let Some(raw) = self.storage.get(&key) else {
                continue;
            };

            let stale = match serde_json::from_str::<NonceRecord>(&raw) {
                Ok(record) => self.is_expired(&record),
                // Invalid JSON, remove it
                Err(_) => true,
            };

            if stale && self.storage.remove(&key) {
                cleaned += 1;
            }
        }

        if cleaned > 0 {
            info!("cleaned up {} expired nonce(s)", cleaned);
        }

        cleaned
    }

    /// Read-only count of stored and expired/corrupt nonces
    pub fn get_nonce_stats(&self) -> NonceStats {
        let mut total = 0;
        let mut expired = 0;

        for key in self.nonce_keys() {
            total += 1;
            let Some(raw) = self.storage.get(&key) else {
                continue;
            };

            let stale = match serde_json::from_str::<NonceRecord>(&raw) {
                Ok(record) => self.is_expired(&record),
                Err(_) => true,
            };
            if stale {
                expired += 1;
            }
        }

        NonceStats { total, expired }
    }

    /// Run one cleanup pass now, then keep running on a fixed interval
    pub fn start_periodic_cleanup(&self) -> CleanupHandle {
        let token = CancellationToken::new();
        let store = self.clone();
        let task_token = token.clone();

        tokio::spawn(async move {
            store.cleanup_expired_nonces();

            let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
            // The immediate pass above already ran
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = task_token.cancelled() => {
                        debug!("periodic nonce cleanup stopped");
                        break;
                    }
                    _ = interval.tick() => {
                        store.cleanup_expired_nonces();
                    }
                }
            }
        });

        CleanupHandle { token }
    }

    fn nonce_keys(&self) -> Vec<String> {
        self.storage
            .keys()
            .into_iter()
            .filter(|k| k.starts_with(NONCE_PREFIX))
            .collect()
    }
}

fn nonce_key(id: &str) -> String {
    format!("{}{}", NONCE_PREFIX, id)
}

/// Start periodic cleanup, one immediate pass plus a recurring interval
pub fn start_periodic_nonce_cleanup(store: &NonceStore) -> Option<CleanupHandle> {
    Some(store.start_periodic_cleanup())
}

/// Stop periodic cleanup; a `None` handle is a no-op
pub fn stop_periodic_nonce_cleanup(handle: Option<CleanupHandle>) {
    if let Some(handle) = handle {
        handle.cancel();
    }
}
