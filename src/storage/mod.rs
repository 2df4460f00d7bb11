//! Storage adapters
//!
//! Two backends with very different contracts:
//! - `kv`: synchronous key-value store behind a non-throwing wrapper
//! - `transactions`: async, indexed transaction history with pruning

pub mod kv;
pub mod transactions;

pub use kv::{FileKvStore, KeyValueStore, MemoryKvStore, SafeStorage};
pub use transactions::{TransactionPatch, TransactionStorage, MAX_TRANSACTIONS_PER_ADDRESS};
