//! Provider decorator with signature-request interception
//!
//! `AaProvider` forwards every request to the host provider except
//! `personal_sign`, which it authorizes against a domain whitelist and
//! upgrades to an EIP-4361 block bound to a fresh replay-protection nonce.
//! The signature returned by the host wallet is handed back untouched.

pub mod message;

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::nonce::NonceStore;
use crate::provider::{parse_chain_id, EthereumProvider, RpcRequest};
use self::message::{SiweMessage, SIWE_STATEMENT, SIWE_VERSION};

/// Domains allowed to request deterministic-wallet signatures
pub const ALLOWED_DOMAINS: [&str; 3] = ["arbius.ai", "arbius.xyz", "localhost"];

/// First-generation challenge messages are forwarded untouched
pub const LEGACY_MESSAGE_PREFIX: &str = "Create deterministic wallet for address";

/// Fallback chain when neither the provider nor the config can say
const MAINNET_CHAIN_ID: u64 = 1;

/// The AA decorator installed over the host provider
pub struct AaProvider {
    inner: Arc<dyn EthereumProvider>,
    nonces: NonceStore,
    /// Origin of the hosting page, e.g. `https://arbius.ai`
    origin: String,
    default_chain_id: u64,
}

impl AaProvider {
    pub fn new(
        inner: Arc<dyn EthereumProvider>,
        nonces: NonceStore,
        origin: impl Into<String>,
        default_chain_id: u64,
    ) -> Self {
        Self {
            inner,
            nonces,
            origin: origin.into(),
            default_chain_id,
        }
    }

    async fn handle_personal_sign(&self, message: String, address: String) -> Result<Value> {
        let domain = origin_host(&self.origin);

        if !ALLOWED_DOMAINS.contains(&domain.as_str()) {
            return Err(Error::UnauthorizedDomain(domain));
        }

        // Backward compatibility: no enhancement, no nonce
        if message.starts_with(LEGACY_MESSAGE_PREFIX) {
            debug!("forwarding legacy deterministic-wallet message unmodified");
            return self
                .inner
                .request(RpcRequest::PersonalSign { message, address })
                .await;
        }

        if message::is_eip4361(&message) {
            // A stored nonce embedded in the message must still be live.
            // Expiry is checked here, before forwarding, never after.
            if let Some(nonce_id) = message::extract_nonce(&message) {
                if let Some(record) = self.nonces.load(&nonce_id) {
                    if self.nonces.is_expired(&record) {
                        return Err(Error::NonceExpired);
                    }
                }
            }
            return self
                .inner
                .request(RpcRequest::PersonalSign { message, address })
                .await;
        }

        let chain_id = self.current_chain_id().await;
        let (nonce_id, record) = self.nonces.issue(&address);

        let enhanced = SiweMessage {
            domain,
            address: address.clone(),
            statement: SIWE_STATEMENT.into(),
            uri: self.origin.clone(),
            version: SIWE_VERSION.into(),
            chain_id,
            nonce: nonce_id,
            issued_at: record.issued_at,
            expiration_time: Some(record.expires_at),
        }
        .render();

        self.inner
            .request(RpcRequest::PersonalSign {
                message: enhanced,
                address,
            })
            .await
    }

    /// Chain id as reported by the wallet's current network
    ///
    /// Never hardcoded: the wallet may have switched networks since init.
    /// Falls back to the configured default when the provider cannot answer.
    async fn current_chain_id(&self) -> u64 {
        let request = RpcRequest::Passthrough {
            method: "eth_chainId".into(),
            params: json!([]),
        };
        match self.inner.request(request).await {
            Ok(value) => parse_chain_id(&value).unwrap_or(self.default_chain_id),
            Err(e) => {
                warn!("failed to get chain id: {}", e);
                self.default_chain_id
            }
        }
    }
}

#[async_trait]
impl EthereumProvider for AaProvider {
    async fn request(&self, request: RpcRequest) -> Result<Value> {
        match request {
            RpcRequest::PersonalSign { message, address } => {
                self.handle_personal_sign(message, address).await
            }
            passthrough @ RpcRequest::Passthrough { .. } => self.inner.request(passthrough).await,
        }
    }
}

/// Default chain id when no configuration is available (degraded mode)
pub const fn fallback_chain_id() -> u64 {
    MAINNET_CHAIN_ID
}

/// Host part of the page origin; an unparsable origin is returned verbatim
/// so the whitelist check rejects it
pub(crate) fn origin_host(origin: &str) -> String {
    url::Url::parse(origin)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| origin.to_string())
}
