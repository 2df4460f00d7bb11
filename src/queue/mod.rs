//! Per-address serialized transaction queue
//!
//! Submissions are persisted as PENDING before dispatch, then processed one
//! at a time per source address: the chain-level nonce is a function of the
//! confirmed transaction count for an address, so two in-flight
//! transactions from the same address would collide. Each status transition
//! is persisted before the in-memory state is considered authoritative, so
//! a reload resumes from the last persisted PENDING state instead of
//! silently losing a transaction.

pub mod types;

use dashmap::DashMap;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::RpcOptions;
use crate::error::{Error, Result};
use crate::provider::{ProviderSlot, RpcRequest};
use crate::storage::{TransactionPatch, TransactionStorage};
use self::types::{TransactionRecord, TransactionStatus};

const RECEIPT_POLL_INTERVAL: StdDuration = StdDuration::from_secs(1);

struct QueueItem {
    record: TransactionRecord,
    notify: Option<oneshot::Sender<Result<String>>>,
}

struct Shared {
    storage: Arc<TransactionStorage>,
    slot: Arc<ProviderSlot>,
    clock: Arc<dyn Clock>,
    workers: DashMap<String, mpsc::UnboundedSender<QueueItem>>,
    retry_attempts: u32,
    confirmation_timeout: StdDuration,
}

/// Durable, per-address FIFO transaction dispatcher
#[derive(Clone)]
pub struct TransactionQueue {
    shared: Arc<Shared>,
}

impl TransactionQueue {
    pub fn new(
        storage: Arc<TransactionStorage>,
        slot: Arc<ProviderSlot>,
        clock: Arc<dyn Clock>,
        rpc: &RpcOptions,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                storage,
                slot,
                clock,
                workers: DashMap::new(),
                retry_attempts: rpc.retry_attempts_or_default(),
                confirmation_timeout: StdDuration::from_millis(rpc.timeout_ms_or_default()),
            }),
        }
    }

    /// Reload persisted PENDING transactions and resume monitoring them
    ///
    /// Called once on startup; recovery order per address is submission
    /// order.
    pub async fn setup(&self) {
        let addresses = self.shared.storage.known_addresses().await;
        let pending_per_address = futures::future::join_all(
            addresses
                .iter()
                .map(|address| self.shared.storage.load_pending_transactions(address)),
        )
        .await;

        for (address, pending) in addresses.into_iter().zip(pending_per_address) {
            if pending.is_empty() {
                continue;
            }
            info!(
                "resuming {} pending transaction(s) for {}",
                pending.len(),
                address
            );
            for record in pending {
                enqueue(
                    &self.shared,
                    QueueItem {
                        record,
                        notify: None,
                    },
                );
            }
        }
    }

    /// Enqueue a transaction; the receiver resolves to its hash once
    /// confirmed
    pub async fn submit(
        &self,
        method: impl Into<String>,
        params: Value,
        chain_id: u64,
        address: &str,
    ) -> Result<oneshot::Receiver<Result<String>>> {
        let record = TransactionRecord::new(&self.shared.clock, method, params, chain_id, address);

        // Persist before dispatch so a crash between here and confirmation
        // leaves a resumable PENDING record
        if !self.shared.storage.save_transaction(&record).await {
            warn!("transaction {} not persisted; continuing in-memory", record.id);
        }

        let (tx, rx) = oneshot::channel();
        enqueue(
            &self.shared,
            QueueItem {
                record,
                notify: Some(tx),
            },
        );
        Ok(rx)
    }

    /// Submit and block until the transaction reaches a terminal state
    pub async fn submit_and_wait(
        &self,
        method: impl Into<String>,
        params: Value,
        chain_id: u64,
        address: &str,
    ) -> Result<String> {
        let rx = self.submit(method, params, chain_id, address).await?;
        rx.await
            .map_err(|_| Error::Internal("transaction worker dropped".into()))?
    }
}

/// Route an item to its address worker, spawning the worker on first use
fn enqueue(shared: &Arc<Shared>, item: QueueItem) {
    let address = item.record.address.clone();

    let item = if let Some(sender) = shared.workers.get(&address) {
        match sender.send(item) {
            Ok(()) => return,
            // Worker died; take the item back and respawn
            Err(returned) => returned.0,
        }
    } else {
        item
    };

    let (tx, rx) = mpsc::unbounded_channel();
    let _ = tx.send(item);
    shared.workers.insert(address.clone(), tx);

    let shared = shared.clone();
    tokio::spawn(async move {
        worker_loop(shared, address, rx).await;
    });
}

async fn worker_loop(
    shared: Arc<Shared>,
    address: String,
    mut rx: mpsc::UnboundedReceiver<QueueItem>,
) {
    debug!("transaction worker started for {}", address);
    while let Some(item) = rx.recv().await {
        process(&shared, item).await;
    }
    debug!("transaction worker stopped for {}", address);
}

/// Drive one transaction from PENDING to a terminal state
async fn process(shared: &Arc<Shared>, item: QueueItem) {
    let QueueItem { mut record, notify } = item;

    // Only one transaction per address is CONFIRMING at a time; the worker
    // is sequential so this transition also serializes dispatch
    transition(shared, &mut record, TransactionStatus::Confirming, None).await;

    let Some(binding) = shared.slot.current() else {
        fail(shared, &mut record, "Ethereum provider not found").await;
        deliver(notify, Err(Error::ProviderUnavailable));
        return;
    };

    let request = match RpcRequest::from_parts(&record.method, record.params.clone()) {
        Ok(request) => request,
        Err(e) => {
            let message = e.to_string();
            fail(shared, &mut record, &message).await;
            deliver(notify, Err(Error::TransactionFailed(message)));
            return;
        }
    };

    // Dispatch, retrying transient RPC failures
    let mut attempt = 0;
    let hash = loop {
        attempt += 1;
        match binding.request(request.clone()).await {
            Ok(value) => match value.as_str() {
                Some(hash) => break hash.to_string(),
                None => {
                    let message = format!("unexpected dispatch result: {}", value);
                    fail(shared, &mut record, &message).await;
                    deliver(notify, Err(Error::TransactionFailed(message)));
                    return;
                }
            },
            Err(e) if e.is_retryable() && attempt < shared.retry_attempts => {
                warn!(
                    "dispatch attempt {} for {} failed: {}; retrying",
                    attempt, record.id, e
                );
                tokio::time::sleep(RECEIPT_POLL_INTERVAL).await;
            }
            Err(e) => {
                let message = e.to_string();
                fail(shared, &mut record, &message).await;
                deliver(notify, Err(Error::TransactionFailed(message)));
                return;
            }
        }
    };

    record.hash = Some(hash.clone());
    let _ = shared
        .storage
        .update_transaction(&record.id, TransactionPatch::default().with_hash(hash.clone()))
        .await;

    // Confirmation is polled on a timer, bounded by the RPC timeout budget
    let deadline = tokio::time::Instant::now() + shared.confirmation_timeout;
    loop {
        let receipt = binding
            .request(RpcRequest::Passthrough {
                method: "eth_getTransactionReceipt".into(),
                params: json!([hash]),
            })
            .await;

        match receipt {
            Ok(Value::Null) | Err(_) => {}
            Ok(receipt) => {
                if receipt.get("status").and_then(Value::as_str) == Some("0x0") {
                    fail(shared, &mut record, "transaction reverted").await;
                    deliver(
                        notify,
                        Err(Error::TransactionFailed("transaction reverted".into())),
                    );
                } else {
                    transition(
                        shared,
                        &mut record,
                        TransactionStatus::Success,
                        Some(hash.clone()),
                    )
                    .await;
                    info!("transaction {} confirmed: {}", record.id, hash);
                    deliver(notify, Ok(hash));
                }
                return;
            }
        }

        if tokio::time::Instant::now() >= deadline {
            let message = format!(
                "confirmation timed out after {}ms",
                shared.confirmation_timeout.as_millis()
            );
            fail(shared, &mut record, &message).await;
            deliver(notify, Err(Error::TransactionFailed(message)));
            return;
        }

        tokio::time::sleep(RECEIPT_POLL_INTERVAL).await;
    }
}

/// Persist a status transition, then adopt it in memory
///
/// Non-monotone transitions are logged and ignored.
async fn transition(
    shared: &Arc<Shared>,
    record: &mut TransactionRecord,
    next: TransactionStatus,
    hash: Option<String>,
) -> bool {
    if !record.status.can_transition_to(next) {
        warn!(
            "ignoring transition {:?} -> {:?} for {}",
            record.status, next, record.id
        );
        return false;
    }

    let mut patch = TransactionPatch::status(next);
    patch.hash = hash;
    // Persistence is best-effort; the in-memory state still advances so the
    // caller gets an answer even when the store is down
    let _ = shared.storage.update_transaction(&record.id, patch).await;

    record.status = next;
    true
}

async fn fail(shared: &Arc<Shared>, record: &mut TransactionRecord, message: &str) {
    warn!("transaction {} failed: {}", record.id, message);
    if record.status.can_transition_to(TransactionStatus::Failed) {
        let patch = TransactionPatch::status(TransactionStatus::Failed).with_error(message);
        let _ = shared.storage.update_transaction(&record.id, patch).await;
        record.status = TransactionStatus::Failed;
        record.error = Some(message.to_string());
    }
}

fn deliver(notify: Option<oneshot::Sender<Result<String>>>, outcome: Result<String>) {
    if let Some(notify) = notify {
        // A dropped receiver means nobody is waiting; recovery items have
        // no waiter at all
        let _ = notify.send(outcome);
    }
}
