//! Process-wide wallet lifecycle
//!
//! One owned context object composes config, storage, nonces, the queue,
//! and the provider slot, with the lifecycle
//! `uninitialized -> initialized -> [proxy-active | proxy-inactive]`.
//! There is no teardown path short of dropping the context; the periodic
//! cleanup task is cancelled on drop.

use serde_json::Value;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::AAWalletConfig;
use crate::error::{Error, Result};
use crate::nonce::{CleanupHandle, NonceStore};
use crate::provider::{EthereumProvider, ProviderSlot};
use crate::proxy::{fallback_chain_id, origin_host, AaProvider};
use crate::queue::TransactionQueue;
use crate::storage::{KeyValueStore, SafeStorage, TransactionStorage};
use crate::wallet::DerivedWalletManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Uninitialized,
    Initialized,
    ProxyActive,
    ProxyInactive,
}

/// The AA wallet subsystem, composed and owned in one place
pub struct WalletContext {
    state: RwLock<Lifecycle>,
    config: RwLock<Option<AAWalletConfig>>,
    storage: SafeStorage,
    nonces: NonceStore,
    tx_storage: Arc<TransactionStorage>,
    queue: RwLock<Option<TransactionQueue>>,
    slot: Arc<ProviderSlot>,
    derived_wallets: DerivedWalletManager,
    clock: Arc<dyn Clock>,
    origin: String,
    cleanup: Mutex<Option<CleanupHandle>>,
    proxy_failed: AtomicBool,
}

impl WalletContext {
    /// Compose the subsystem over the host's key-value store and a data
    /// directory for the transaction database
    pub async fn new(
        kv: Arc<dyn KeyValueStore>,
        data_root: impl AsRef<Path>,
        origin: impl Into<String>,
    ) -> Self {
        Self::with_clock(kv, data_root, origin, Arc::new(SystemClock)).await
    }

    pub async fn with_clock(
        kv: Arc<dyn KeyValueStore>,
        data_root: impl AsRef<Path>,
        origin: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let origin = origin.into();
        let storage = SafeStorage::new(kv);
        let nonces = NonceStore::new(storage.clone(), clock.clone());
        let tx_storage = Arc::new(TransactionStorage::open(data_root, clock.clone()).await);
        let derived_wallets =
            DerivedWalletManager::new(storage.clone(), clock.clone(), origin_host(&origin));

        Self {
            state: RwLock::new(Lifecycle::Uninitialized),
            config: RwLock::new(None),
            storage,
            nonces,
            tx_storage,
            queue: RwLock::new(None),
            slot: Arc::new(ProviderSlot::new()),
            derived_wallets,
            clock,
            origin,
            cleanup: Mutex::new(None),
            proxy_failed: AtomicBool::new(false),
        }
    }

    /// Initialize the wallet: validate config, recover the transaction
    /// queue, start periodic nonce cleanup
    ///
    /// Returns `false` and leaves the context untouched when the config is
    /// invalid. The proxy is installed separately by
    /// [`setup_ethereum_proxy`](Self::setup_ethereum_proxy) so a later
    /// proxy failure cannot invalidate initialization.
    pub async fn init(&self, config: AAWalletConfig) -> bool {
        if let Err(e) = config.validate() {
            error!("AA wallet initialization failed: {}", e);
            return false;
        }

        let queue = TransactionQueue::new(
            self.tx_storage.clone(),
            self.slot.clone(),
            self.clock.clone(),
            &config.rpc,
        );

        *self.config.write().unwrap() = Some(config);
        *self.state.write().unwrap() = Lifecycle::Initialized;

        // Resume any transactions left PENDING by a previous session
        queue.setup().await;
        *self.queue.write().unwrap() = Some(queue);

        let handle = self.nonces.start_periodic_cleanup();
        *self.cleanup.lock().unwrap() = Some(handle);

        info!("AA wallet initialized");
        true
    }

    pub fn is_initialized(&self) -> bool {
        *self.state.read().unwrap() != Lifecycle::Uninitialized
    }

    pub fn config(&self) -> Option<AAWalletConfig> {
        self.config.read().unwrap().clone()
    }

    /// Whether the proxy wrapper is currently installed over the host
    /// provider; only meaningful once initialized
    pub fn is_ethereum_proxy_active(&self) -> bool {
        *self.state.read().unwrap() == Lifecycle::ProxyActive
    }

    /// Whether the most recent proxy setup attempt failed, for UI fallback
    /// messaging
    pub fn is_proxy_failed(&self) -> bool {
        self.proxy_failed.load(Ordering::SeqCst)
    }

    /// Hand the host's provider to the well-known binding
    pub fn install_host_provider(&self, provider: Arc<dyn EthereumProvider>) {
        self.slot.install_host(provider);
    }

    /// Install the AA decorator over the host provider
    ///
    /// Failure never breaks the hosting application: it keeps operating
    /// against the unmodified provider.
    pub fn setup_ethereum_proxy(&self) -> bool {
        let initialized = self.is_initialized();
        if !initialized {
            // Degraded mode: proceed if a provider is queryable
            warn!("AA wallet is not initialized; attempting proxy setup in degraded mode");
        }

        let Some(binding) = self.slot.current() else {
            warn!("no Ethereum provider found; proxy not set up");
            self.note_proxy_outcome(initialized, false);
            return false;
        };

        // Never re-wrap an already wrapped provider
        if binding.is_aa() {
            debug!("provider already wrapped; leaving it in place");
            self.note_proxy_outcome(initialized, true);
            return true;
        }

        let default_chain_id = self
            .config()
            .map(|c| c.default_chain_id)
            .unwrap_or_else(fallback_chain_id);

        let wrapped = Arc::new(AaProvider::new(
            binding.as_provider(),
            self.nonces.clone(),
            self.origin.clone(),
            default_chain_id,
        ));
        self.slot.wrap_in_place(wrapped);
        self.note_proxy_outcome(initialized, true);
        info!("Ethereum proxy set up successfully");
        true
    }

    fn note_proxy_outcome(&self, initialized: bool, success: bool) {
        self.proxy_failed.store(!success, Ordering::SeqCst);
        if initialized {
            *self.state.write().unwrap() = if success {
                Lifecycle::ProxyActive
            } else {
                Lifecycle::ProxyInactive
            };
        }
    }

    /// Submit a transaction and wait for its hash
    pub async fn submit_transaction(
        &self,
        method: impl Into<String>,
        params: Value,
        chain_id: u64,
        address: &str,
    ) -> Result<String> {
        let queue = self
            .queue
            .read()
            .unwrap()
            .clone()
            .ok_or_else(|| Error::Internal("AA wallet is not initialized".into()))?;
        queue.submit_and_wait(method, params, chain_id, address).await
    }

    pub fn nonces(&self) -> &NonceStore {
        &self.nonces
    }

    pub fn transactions(&self) -> &TransactionStorage {
        &self.tx_storage
    }

    pub fn derived_wallets(&self) -> &DerivedWalletManager {
        &self.derived_wallets
    }

    pub fn storage(&self) -> &SafeStorage {
        &self.storage
    }

    /// The currently active provider binding, if any
    pub fn provider(&self) -> Option<crate::provider::ProviderBinding> {
        self.slot.current()
    }
}
