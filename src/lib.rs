//! Arbius AA Wallet
//!
//! Account-abstraction wallet proxy: transparently intercepts a host
//! wallet provider's JSON-RPC surface, derives a secondary deterministic
//! wallet from a user signature, enforces anti-phishing/anti-replay
//! invariants on that signature, and maintains a durable, crash-recoverable
//! transaction queue across reloads.

pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod nonce;
pub mod provider;
pub mod proxy;
pub mod queue;
pub mod storage;
pub mod wallet;

// Re-export commonly used types
pub use config::{validate_config, AAWalletConfig};
pub use context::WalletContext;
pub use error::{Error, Result};
pub use nonce::{start_periodic_nonce_cleanup, stop_periodic_nonce_cleanup, NonceStore};
pub use provider::{EthereumProvider, RpcRequest};
pub use queue::types::{TransactionRecord, TransactionStatus};
pub use storage::{SafeStorage, TransactionStorage};
