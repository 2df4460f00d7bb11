//! Deterministic derived wallet
//!
//! A secondary wallet whose key material is derived from the owner's
//! signature over a fixed challenge message. The signature never leaves the
//! host wallet; we only hash it. Exactly one derived wallet is cached at a
//! time, and the cache entry is dropped whenever the connected owner
//! address changes. Transaction signing with the derived key stays with the
//! host application.

use async_trait::async_trait;
use secp256k1::{PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::storage::SafeStorage;

pub const DERIVED_WALLET_CACHE_KEY: &str = "arbiuswallet_derivedWalletCache";

const SIGNATURE_VERSION: u32 = 1;

/// Signs a plaintext challenge with the owner's primary wallet
#[async_trait]
pub trait MessageSigner: Send + Sync {
    /// Returns the hex-encoded signature (`0x...`)
    async fn sign_message(&self, message: &str) -> Result<String>;
}

/// Persisted cache entry, keyed by [`DERIVED_WALLET_CACHE_KEY`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WalletCache {
    owner_address: String,
    derived_private_key: String,
    derived_address: String,
    signature_version: u32,
    created_at: String,
}

/// A derived wallet: address plus opaque key material
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedWallet {
    pub owner_address: String,
    pub address: String,
    key_material: [u8; 32],
}

impl DerivedWallet {
    /// The 32 bytes of derived key material
    pub fn key_material(&self) -> &[u8; 32] {
        &self.key_material
    }
}

/// Challenge message the owner signs to derive the secondary wallet
pub fn deterministic_wallet_message(owner_address: &str, domain: &str, title: &str) -> String {
    format!(
        "{title} wants you to create a deterministic wallet\n\
         Domain: {domain}\n\
         Wallet address: {owner}\n\
         Purpose: Create deterministic wallet for AI agent interactions\n\
         \n\
         Warning: Make sure the URL matches the official {title} website",
        title = title,
        domain = domain,
        owner = owner_address,
    )
}

/// Derives and caches the deterministic wallet
#[derive(Clone)]
pub struct DerivedWalletManager {
    storage: SafeStorage,
    clock: Arc<dyn Clock>,
    domain: String,
}

impl DerivedWalletManager {
    pub fn new(storage: SafeStorage, clock: Arc<dyn Clock>, domain: impl Into<String>) -> Self {
        Self {
            storage,
            clock,
            domain: domain.into(),
        }
    }

    /// Return the cached wallet for `owner_address`, deriving a fresh one
    /// through `signer` when the cache misses
    pub async fn init_deterministic_wallet(
        &self,
        owner_address: &str,
        signer: &dyn MessageSigner,
        title: &str,
    ) -> Result<DerivedWallet> {
        if owner_address.is_empty() {
            return Err(Error::KeyDerivation("owner address is required".into()));
        }
        let owner = owner_address.to_lowercase();

        if let Some(cached) = self.load_cache() {
            if cached.owner_address.eq_ignore_ascii_case(&owner) {
                if let Ok(wallet) = wallet_from_cache(&cached) {
                    debug!("derived wallet cache hit for {}", owner);
                    return Ok(wallet);
                }
                // Unusable key material counts as corruption
                self.storage.remove(DERIVED_WALLET_CACHE_KEY);
            }
        }

        let message = deterministic_wallet_message(&owner, &self.domain, title);
        let signature = signer.sign_message(&message).await?;
        let signature_bytes = decode_hex(&signature)
            .ok_or_else(|| Error::KeyDerivation("signature is not valid hex".into()))?;

        let key_material = keccak256(&signature_bytes);
        let address = derive_address(&key_material)?;

        let cache = WalletCache {
            owner_address: owner.clone(),
            derived_private_key: format!("0x{}", hex::encode(key_material)),
            derived_address: address.clone(),
            signature_version: SIGNATURE_VERSION,
            created_at: self.clock.now().to_rfc3339(),
        };
        match serde_json::to_string(&cache) {
            Ok(json) => {
                if !self.storage.set(DERIVED_WALLET_CACHE_KEY, &json) {
                    warn!("failed to cache derived wallet; it will be re-derived on reload");
                }
            }
            Err(e) => warn!("failed to serialize derived wallet cache: {}", e),
        }

        Ok(DerivedWallet {
            owner_address: owner,
            address,
            key_material,
        })
    }

    /// Cached derived address for an owner, if the cache belongs to them
    pub fn cached_wallet_address(&self, owner_address: &str) -> Option<String> {
        let cached = self.load_cache()?;
        cached
            .owner_address
            .eq_ignore_ascii_case(owner_address)
            .then_some(cached.derived_address)
    }

    /// Cached wallet looked up by its derived address
    pub fn cached_wallet(&self, derived_address: &str) -> Option<DerivedWallet> {
        let cached = self.load_cache()?;
        if !cached.derived_address.eq_ignore_ascii_case(derived_address) {
            return None;
        }
        wallet_from_cache(&cached).ok()
    }

    /// Drop the cache when the connected owner changed (wallet switch)
    ///
    /// Returns whether an entry was removed.
    pub fn invalidate_on_owner_change(&self, current_owner: &str) -> bool {
        let Some(cached) = self.load_cache() else {
            return false;
        };
        if cached.owner_address.eq_ignore_ascii_case(current_owner) {
            return false;
        }
        debug!(
            "owner changed from {} to {}; dropping derived wallet cache",
            cached.owner_address, current_owner
        );
        self.storage.remove(DERIVED_WALLET_CACHE_KEY)
    }

    /// Remove the cache unconditionally (logout)
    pub fn clear_cache(&self) -> bool {
        self.storage.remove(DERIVED_WALLET_CACHE_KEY)
    }

    fn load_cache(&self) -> Option<WalletCache> {
        let raw = self.storage.get(DERIVED_WALLET_CACHE_KEY)?;
        match serde_json::from_str(&raw) {
            Ok(cache) => Some(cache),
            Err(e) => {
                warn!("clearing corrupt derived wallet cache: {}", e);
                self.storage.remove(DERIVED_WALLET_CACHE_KEY);
                None
            }
        }
    }
}

fn wallet_from_cache(cache: &WalletCache) -> Result<DerivedWallet> {
    let bytes = decode_hex(&cache.derived_private_key)
        .filter(|b| b.len() == 32)
        .ok_or_else(|| Error::KeyDerivation("cached key material is malformed".into()))?;
    let mut key_material = [0u8; 32];
    key_material.copy_from_slice(&bytes);
    Ok(DerivedWallet {
        owner_address: cache.owner_address.clone(),
        address: cache.derived_address.clone(),
        key_material,
    })
}

fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Ethereum address of the key: keccak of the uncompressed public key,
/// last 20 bytes
fn derive_address(key_material: &[u8; 32]) -> Result<String> {
    let secret =
        SecretKey::from_slice(key_material).map_err(|e| Error::KeyDerivation(e.to_string()))?;
    let secp = Secp256k1::new();
    let public = PublicKey::from_secret_key(&secp, &secret);
    let uncompressed = public.serialize_uncompressed();
    let hash = keccak256(&uncompressed[1..]);
    Ok(format!("0x{}", hex::encode(&hash[12..])))
}

fn decode_hex(s: &str) -> Option<Vec<u8>> {
    hex::decode(s.strip_prefix("0x").unwrap_or(s)).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryKvStore, SafeStorage};
    use crate::clock::SystemClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Signer double returning a fixed signature and counting invocations
    struct FixedSigner {
        signature: String,
        calls: AtomicUsize,
    }

    impl FixedSigner {
        fn new(fill: u8) -> Self {
            Self {
                signature: format!("0x{}", hex::encode(vec![fill; 65])),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MessageSigner for FixedSigner {
        async fn sign_message(&self, _message: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.signature.clone())
        }
    }

    fn manager() -> (DerivedWalletManager, SafeStorage) {
        let storage = SafeStorage::new(Arc::new(MemoryKvStore::new()));
        let manager =
            DerivedWalletManager::new(storage.clone(), Arc::new(SystemClock), "arbius.ai");
        (manager, storage)
    }

    #[tokio::test]
    async fn test_derivation_is_deterministic() {
        let (m1, _) = manager();
        let (m2, _) = manager();
        let signer = FixedSigner::new(0xab);

        let w1 = m1
            .init_deterministic_wallet("0xOwner", &signer, "Arbius")
            .await
            .unwrap();
        let w2 = m2
            .init_deterministic_wallet("0xowner", &signer, "Arbius")
            .await
            .unwrap();

        assert_eq!(w1.address, w2.address);
        assert_eq!(w1.key_material(), w2.key_material());
        // Plausible Ethereum address shape
        assert!(w1.address.starts_with("0x"));
        assert_eq!(w1.address.len(), 42);
    }

    #[tokio::test]
    async fn test_different_signatures_give_different_wallets() {
        let (m, _) = manager();
        let w1 = m
            .init_deterministic_wallet("0xaaa", &FixedSigner::new(0x01), "Arbius")
            .await
            .unwrap();
        m.clear_cache();
        let w2 = m
            .init_deterministic_wallet("0xaaa", &FixedSigner::new(0x02), "Arbius")
            .await
            .unwrap();
        assert_ne!(w1.address, w2.address);
    }

    #[tokio::test]
    async fn test_cache_hit_skips_signer() {
        let (m, _) = manager();
        let signer = FixedSigner::new(0xab);

        let first = m
            .init_deterministic_wallet("0xowner", &signer, "Arbius")
            .await
            .unwrap();
        let second = m
            .init_deterministic_wallet("0xOWNER", &signer, "Arbius")
            .await
            .unwrap();

        assert_eq!(signer.calls(), 1);
        assert_eq!(first, second);
        assert_eq!(
            m.cached_wallet_address("0xowner"),
            Some(first.address.clone())
        );
        assert_eq!(m.cached_wallet(&first.address), Some(first));
    }

    #[tokio::test]
    async fn test_owner_change_invalidates_cache() {
        let (m, storage) = manager();
        let signer = FixedSigner::new(0xab);

        m.init_deterministic_wallet("0xaaa", &signer, "Arbius")
            .await
            .unwrap();

        // Same owner: nothing happens
        assert!(!m.invalidate_on_owner_change("0xAAA"));
        assert!(storage.get(DERIVED_WALLET_CACHE_KEY).is_some());

        // Wallet switch: the single cache entry goes away
        assert!(m.invalidate_on_owner_change("0xbbb"));
        assert!(storage.get(DERIVED_WALLET_CACHE_KEY).is_none());
        assert_eq!(m.cached_wallet_address("0xaaa"), None);
    }

    #[tokio::test]
    async fn test_corrupt_cache_is_replaced() {
        let (m, storage) = manager();
        storage.set(DERIVED_WALLET_CACHE_KEY, "{not json");

        let signer = FixedSigner::new(0xab);
        let wallet = m
            .init_deterministic_wallet("0xowner", &signer, "Arbius")
            .await
            .unwrap();

        assert_eq!(signer.calls(), 1);
        assert_eq!(m.cached_wallet_address("0xowner"), Some(wallet.address));
    }

    #[tokio::test]
    async fn test_empty_owner_rejected() {
        let (m, _) = manager();
        let err = m
            .init_deterministic_wallet("", &FixedSigner::new(0xab), "Arbius")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::KeyDerivation(_)));
    }

    #[tokio::test]
    async fn test_invalid_signature_hex_rejected() {
        struct BadSigner;
        #[async_trait]
        impl MessageSigner for BadSigner {
            async fn sign_message(&self, _message: &str) -> Result<String> {
                Ok("0xzz".into())
            }
        }

        let (m, _) = manager();
        assert!(matches!(
            m.init_deterministic_wallet("0xowner", &BadSigner, "Arbius")
                .await,
            Err(Error::KeyDerivation(_))
        ));
    }

    #[test]
    fn test_challenge_message_wording() {
        let message = deterministic_wallet_message("0xowner", "arbius.ai", "Arbius");
        assert!(message.starts_with("Arbius wants you to create a deterministic wallet"));
        assert!(message.contains("Domain: arbius.ai"));
        assert!(message.contains("Wallet address: 0xowner"));
        assert!(message.contains("Warning:"));
    }

    #[tokio::test]
    async fn test_cache_persists_camel_case_layout() {
        let (m, storage) = manager();
        m.init_deterministic_wallet("0xowner", &FixedSigner::new(0xab), "Arbius")
            .await
            .unwrap();

        let raw = storage.get(DERIVED_WALLET_CACHE_KEY).unwrap();
        assert!(raw.contains(r#""ownerAddress""#));
        assert!(raw.contains(r#""derivedPrivateKey""#));
        assert!(raw.contains(r#""signatureVersion":1"#));
    }
}
