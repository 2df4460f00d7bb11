//! Host provider seam
//!
//! The hosting application exposes an EIP-1193-style provider at one
//! well-known binding. Requests travel as a tagged union so interception
//! logic matches on kinds instead of sniffing method strings and parameter
//! arrays.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::{Arc, RwLock};
use tracing::debug;

use crate::error::{Error, Result};
use crate::proxy::AaProvider;

/// A JSON-RPC request, decoded into the kinds the proxy cares about
#[derive(Debug, Clone, PartialEq)]
pub enum RpcRequest {
    /// `personal_sign` with params `[message, address]`
    PersonalSign { message: String, address: String },
    /// Anything else, forwarded untouched
    Passthrough { method: String, params: Value },
}

impl RpcRequest {
    /// Decode a raw method/params pair
    pub fn from_parts(method: &str, params: Value) -> Result<Self> {
        match method {
            "personal_sign" => {
                let arr = params
                    .as_array()
                    .ok_or_else(|| Error::Rpc("personal_sign params must be an array".into()))?;
                let message = arr
                    .first()
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::Rpc("personal_sign message must be a string".into()))?;
                let address = arr
                    .get(1)
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::Rpc("personal_sign address must be a string".into()))?;
                Ok(RpcRequest::PersonalSign {
                    message: message.to_string(),
                    address: address.to_string(),
                })
            }
            _ => Ok(RpcRequest::Passthrough {
                method: method.to_string(),
                params,
            }),
        }
    }

    pub fn method(&self) -> &str {
        match self {
            RpcRequest::PersonalSign { .. } => "personal_sign",
            RpcRequest::Passthrough { method, .. } => method,
        }
    }

    pub fn params(&self) -> Value {
        match self {
            RpcRequest::PersonalSign { message, address } => json!([message, address]),
            RpcRequest::Passthrough { params, .. } => params.clone(),
        }
    }
}

/// EIP-1193-style provider capability
#[async_trait]
pub trait EthereumProvider: Send + Sync {
    async fn request(&self, request: RpcRequest) -> Result<Value>;
}

/// The provider currently installed at the well-known binding
///
/// `Wrapped` is the typed double-wrap tag: once the AA decorator is in
/// place, another setup call must see it and back off.
#[derive(Clone)]
pub enum ProviderBinding {
    Host(Arc<dyn EthereumProvider>),
    Wrapped(Arc<AaProvider>),
}

impl ProviderBinding {
    /// Whether the AA decorator is installed
    pub fn is_aa(&self) -> bool {
        matches!(self, ProviderBinding::Wrapped(_))
    }

    /// The provider to dispatch requests against
    pub fn as_provider(&self) -> Arc<dyn EthereumProvider> {
        match self {
            ProviderBinding::Host(p) => p.clone(),
            ProviderBinding::Wrapped(p) => p.clone() as Arc<dyn EthereumProvider>,
        }
    }

    pub async fn request(&self, request: RpcRequest) -> Result<Value> {
        self.as_provider().request(request).await
    }
}

/// The single well-known provider binding
///
/// Wrapped in place at most once; the host installs its provider here and
/// the proxy swaps in the decorator.
#[derive(Default)]
pub struct ProviderSlot {
    binding: RwLock<Option<ProviderBinding>>,
}

impl ProviderSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the host provider
    pub fn install_host(&self, provider: Arc<dyn EthereumProvider>) {
        let mut binding = self.binding.write().unwrap();
        *binding = Some(ProviderBinding::Host(provider));
        debug!("host provider installed");
    }

    /// The currently installed binding, if any
    pub fn current(&self) -> Option<ProviderBinding> {
        self.binding.read().unwrap().clone()
    }

    /// Replace the binding with the wrapped decorator
    pub fn wrap_in_place(&self, wrapped: Arc<AaProvider>) {
        let mut binding = self.binding.write().unwrap();
        *binding = Some(ProviderBinding::Wrapped(wrapped));
    }
}

/// Parse a hex-quantity chain id (`"0xa4b1"`) from an `eth_chainId` result
pub fn parse_chain_id(value: &Value) -> Option<u64> {
    let s = value.as_str()?;
    let s = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(s, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_personal_sign_decodes() {
        let req = RpcRequest::from_parts("personal_sign", json!(["hello", "0xabc"])).unwrap();
        assert_eq!(
            req,
            RpcRequest::PersonalSign {
                message: "hello".into(),
                address: "0xabc".into(),
            }
        );
        assert_eq!(req.method(), "personal_sign");
        assert_eq!(req.params(), json!(["hello", "0xabc"]));
    }

    #[test]
    fn test_malformed_personal_sign_rejected() {
        assert!(RpcRequest::from_parts("personal_sign", json!({})).is_err());
        assert!(RpcRequest::from_parts("personal_sign", json!([42])).is_err());
        assert!(RpcRequest::from_parts("personal_sign", json!(["msg"])).is_err());
    }

    #[test]
    fn test_other_methods_are_passthrough() {
        let req = RpcRequest::from_parts("eth_chainId", json!([])).unwrap();
        assert_eq!(
            req,
            RpcRequest::Passthrough {
                method: "eth_chainId".into(),
                params: json!([]),
            }
        );
    }

    #[test]
    fn test_parse_chain_id() {
        assert_eq!(parse_chain_id(&json!("0xa4b1")), Some(42_161));
        assert_eq!(parse_chain_id(&json!("0x1")), Some(1));
        assert_eq!(parse_chain_id(&json!("a4b1")), Some(42_161));
        assert_eq!(parse_chain_id(&json!(42)), None);
        assert_eq!(parse_chain_id(&json!("0xzz")), None);
    }

    #[test]
    fn test_slot_starts_empty() {
        let slot = ProviderSlot::new();
        assert!(slot.current().is_none());
    }
}
