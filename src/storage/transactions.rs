//! Durable transaction history
//!
//! Stores transaction records per wallet address with automatic pruning.
//! Layout on disk: `<root>/arbiuswallet_db/v<version>/transactions.json`,
//! one collection keyed by transaction id. An address index and an
//! `(address, created_at)` ordering are rebuilt in memory on open.
//!
//! Persistence is best-effort: when the backing engine is unavailable every
//! operation degrades to empty/false results instead of failing the caller.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::queue::types::{TransactionRecord, TransactionStatus};

pub const DB_NAME: &str = "arbiuswallet_db";
pub const DB_VERSION: u32 = 1;
pub const STORE_NAME: &str = "transactions";

/// Prune when a single address exceeds this many records
pub const MAX_TRANSACTIONS_PER_ADDRESS: usize = 10_000;

/// Merge-update applied by [`TransactionStorage::update_transaction`]
#[derive(Debug, Clone, Default)]
pub struct TransactionPatch {
    pub status: Option<TransactionStatus>,
    pub hash: Option<String>,
    pub error: Option<String>,
}

impl TransactionPatch {
    pub fn status(status: TransactionStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn with_hash(mut self, hash: impl Into<String>) -> Self {
        self.hash = Some(hash.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

struct Inner {
    path: PathBuf,
    records: Mutex<HashMap<String, TransactionRecord>>,
}

/// Indexed, pruned transaction store
pub struct TransactionStorage {
    inner: Option<Inner>,
    clock: Arc<dyn Clock>,
    max_per_address: usize,
}

impl TransactionStorage {
    /// Open (or create) the store under `root`
    ///
    /// Never fails: an unusable root yields a disabled store whose
    /// operations all degrade.
    pub async fn open(root: impl AsRef<Path>, clock: Arc<dyn Clock>) -> Self {
        let dir = root
            .as_ref()
            .join(DB_NAME)
            .join(format!("v{}", DB_VERSION));

        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            warn!("transaction store unavailable at {:?}: {}", dir, e);
            return Self {
                inner: None,
                clock,
                max_per_address: MAX_TRANSACTIONS_PER_ADDRESS,
            };
        }

        let path = dir.join(format!("{}.json", STORE_NAME));
        let records = match tokio::fs::read_to_string(&path).await {
            Ok(data) => match serde_json::from_str::<HashMap<String, TransactionRecord>>(&data) {
                Ok(records) => {
                    debug!("loaded {} transaction records from {:?}", records.len(), path);
                    records
                }
                Err(e) => {
                    warn!("ignoring corrupt transaction store {:?}: {}", path, e);
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };

        Self {
            inner: Some(Inner {
                path,
                records: Mutex::new(records),
            }),
            clock,
            max_per_address: MAX_TRANSACTIONS_PER_ADDRESS,
        }
    }

    /// Lower the per-address cap; used by tests to exercise pruning
    #[cfg(test)]
    pub(crate) fn with_max_per_address(mut self, cap: usize) -> Self {
        self.max_per_address = cap;
        self
    }

    /// Whether the backing engine is usable
    pub fn is_available(&self) -> bool {
        self.inner.is_some()
    }

    /// Upsert a record, then prune the oldest records for its address once
    /// the per-address cap is exceeded
    pub async fn save_transaction(&self, record: &TransactionRecord) -> bool {
        let Some(inner) = &self.inner else {
            return false;
        };

        let mut records = inner.records.lock().await;
        let mut record = record.clone();
        record.address = record.address.to_lowercase();
        let address = record.address.clone();
        records.insert(record.id.clone(), record);

        // Oldest-first beyond the cap
        let mut for_address: Vec<(String, chrono::DateTime<chrono::Utc>)> = records
            .values()
            .filter(|r| r.address == address)
            .map(|r| (r.id.clone(), r.created_at))
            .collect();

        if for_address.len() > self.max_per_address {
            for_address.sort_by_key(|(_, created_at)| *created_at);
            let excess = for_address.len() - self.max_per_address;
            for (id, _) in for_address.into_iter().take(excess) {
                records.remove(&id);
            }
            info!("pruned {} old transaction(s) for {}", excess, address);
        }

        self.persist(&inner.path, &records).await
    }

    /// All PENDING records for an address, oldest first (submission order)
    pub async fn load_pending_transactions(&self, address: &str) -> Vec<TransactionRecord> {
        let Some(inner) = &self.inner else {
            return Vec::new();
        };

        let address = address.to_lowercase();
        let records = inner.records.lock().await;
        let mut pending: Vec<TransactionRecord> = records
            .values()
            .filter(|r| r.address == address && r.status == TransactionStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|r| r.created_at);
        pending
    }

    /// Most-recent-first history for an address, capped at `limit`
    pub async fn load_transaction_history(
        &self,
        address: &str,
        limit: usize,
    ) -> Vec<TransactionRecord> {
        let Some(inner) = &self.inner else {
            return Vec::new();
        };

        let address = address.to_lowercase();
        let records = inner.records.lock().await;
        let mut history: Vec<TransactionRecord> = records
            .values()
            .filter(|r| r.address == address)
            .cloned()
            .collect();
        history.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        history.truncate(limit);
        history
    }

    /// Merge-update a record, bumping `updated_at`
    pub async fn update_transaction(&self, id: &str, patch: TransactionPatch) -> bool {
        let Some(inner) = &self.inner else {
            return false;
        };

        let mut records = inner.records.lock().await;
        let Some(record) = records.get_mut(id) else {
            return false;
        };

        if let Some(status) = patch.status {
            record.status = status;
        }
        if let Some(hash) = patch.hash {
            record.hash = Some(hash);
        }
        if let Some(error) = patch.error {
            record.error = Some(error);
        }
        record.updated_at = self.clock.now();

        self.persist(&inner.path, &records).await
    }

    /// Bulk delete for wallet switch / logout
    pub async fn delete_transactions_for_address(&self, address: &str) -> bool {
        let Some(inner) = &self.inner else {
            return false;
        };

        let address = address.to_lowercase();
        let mut records = inner.records.lock().await;
        records.retain(|_, r| r.address != address);
        self.persist(&inner.path, &records).await
    }

    pub async fn get_transaction_count(&self, address: &str) -> usize {
        let Some(inner) = &self.inner else {
            return 0;
        };

        let address = address.to_lowercase();
        let records = inner.records.lock().await;
        records.values().filter(|r| r.address == address).count()
    }

    /// Every address with at least one stored record
    ///
    /// Drives queue recovery after a reload.
    pub async fn known_addresses(&self) -> Vec<String> {
        let Some(inner) = &self.inner else {
            return Vec::new();
        };

        let records = inner.records.lock().await;
        let mut addresses: Vec<String> = records.values().map(|r| r.address.clone()).collect();
        addresses.sort();
        addresses.dedup();
        addresses
    }

    async fn persist(&self, path: &Path, records: &HashMap<String, TransactionRecord>) -> bool {
        let data = match serde_json::to_string(records) {
            Ok(data) => data,
            Err(e) => {
                warn!("failed to serialize transaction store: {}", e);
                return false;
            }
        };

        match tokio::fs::write(path, data).await {
            Ok(()) => true,
            Err(e) => {
                warn!("failed to write transaction store {:?}: {}", path, e);
                false
            }
        }
    }
}
