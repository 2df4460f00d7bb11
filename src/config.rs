//! Configuration loading and validation

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::error::{Error, Result};

/// Main configuration for the AA wallet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AAWalletConfig {
    /// Chain used when the live provider cannot report one
    pub default_chain_id: u64,

    /// Chains the wallet is allowed to operate on
    pub supported_chain_ids: Vec<u64>,

    #[serde(default)]
    pub ui: UiConfig,

    /// ERC-20 tokens surfaced in the hosting application
    #[serde(default)]
    pub watch_erc20s: Vec<WatchedToken>,

    #[serde(default)]
    pub rpc: RpcOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiConfig {
    #[serde(default)]
    pub auto_connect_on_init: bool,
    #[serde(default)]
    pub theme: Theme,
    #[serde(default)]
    pub toast_position: ToastPosition,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            auto_connect_on_init: false,
            theme: Theme::System,
            toast_position: ToastPosition::BottomRight,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Theme {
    Light,
    Dark,
    #[default]
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ToastPosition {
    TopRight,
    TopLeft,
    #[default]
    BottomRight,
    BottomLeft,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchedToken {
    pub address: String,
    pub symbol: String,
    #[serde(default)]
    pub name: Option<String>,
    pub decimals: u8,
    pub chain_id: u64,
    #[serde(default)]
    pub logo: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RpcOptions {
    /// Dispatch retries for transient RPC failures
    #[serde(default)]
    pub retry_attempts: Option<u32>,

    /// Confirmation-polling budget in milliseconds
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// Per-chain RPC endpoints; when given, every supported chain needs one
    #[serde(default)]
    pub urls: Option<HashMap<u64, Vec<String>>>,
}

impl RpcOptions {
    pub fn retry_attempts_or_default(&self) -> u32 {
        self.retry_attempts.unwrap_or(DEFAULT_RETRY_ATTEMPTS)
    }

    pub fn timeout_ms_or_default(&self) -> u64 {
        self.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS)
    }
}

pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Arbitrum One, the chain the wallet ships configured for
pub const ARBITRUM_ONE: u64 = 42_161;

impl Default for AAWalletConfig {
    fn default() -> Self {
        Self {
            default_chain_id: ARBITRUM_ONE,
            supported_chain_ids: vec![ARBITRUM_ONE],
            ui: UiConfig::default(),
            watch_erc20s: vec![],
            rpc: RpcOptions::default(),
        }
    }
}

impl AAWalletConfig {
    /// Load configuration from file and environment variables
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            // Start with defaults
            .set_default("default_chain_id", ARBITRUM_ONE as i64)
            .map_err(|e| Error::Config(e.to_string()))?
            .set_default("supported_chain_ids", vec![ARBITRUM_ONE as i64])
            .map_err(|e| Error::Config(e.to_string()))?
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (prefix ARBIUS_)
            .add_source(
                config::Environment::with_prefix("ARBIUS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| Error::Config(format!("Failed to build configuration: {}", e)))?;

        let config: AAWalletConfig = settings
            .try_deserialize()
            .map_err(|e| Error::Config(format!("Failed to deserialize configuration: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    ///
    /// Pure check with no side effects; fails on the first violation found.
    pub fn validate(&self) -> Result<()> {
        if self.supported_chain_ids.is_empty() {
            return Err(Error::Config(
                "supported_chain_ids must be a non-empty list".into(),
            ));
        }

        if !self.supported_chain_ids.contains(&self.default_chain_id) {
            return Err(Error::Config(format!(
                "default_chain_id ({}) must be included in supported_chain_ids",
                self.default_chain_id
            )));
        }

        for token in &self.watch_erc20s {
            if token.address.is_empty() {
                return Err(Error::Config("each watched token must have an address".into()));
            }
            if token.symbol.is_empty() {
                return Err(Error::Config("each watched token must have a symbol".into()));
            }
            if !self.supported_chain_ids.contains(&token.chain_id) {
                return Err(Error::Config(format!(
                    "token chain_id ({}) must be included in supported_chain_ids",
                    token.chain_id
                )));
            }
        }

        if let Some(attempts) = self.rpc.retry_attempts {
            if attempts == 0 {
                return Err(Error::Config(
                    "rpc.retry_attempts must be a positive integer".into(),
                ));
            }
        }

        if let Some(timeout) = self.rpc.timeout_ms {
            if timeout == 0 {
                return Err(Error::Config("rpc.timeout_ms must be a positive number".into()));
            }
        }

        if let Some(urls) = &self.rpc.urls {
            for chain_id in &self.supported_chain_ids {
                match urls.get(chain_id) {
                    Some(list) if !list.is_empty() => {}
                    _ => {
                        return Err(Error::Config(format!(
                            "no RPC URLs provided for chain_id {}",
                            chain_id
                        )));
                    }
                }
            }
        }

        Ok(())
    }
}

/// Validate a configuration without constructing a context
///
/// Thin wrapper kept as a free function so callers can pre-flight a config
/// before wiring any storage or provider state.
pub fn validate_config(config: &AAWalletConfig) -> Result<()> {
    config.validate()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> AAWalletConfig {
        AAWalletConfig {
            default_chain_id: 42_161,
            supported_chain_ids: vec![42_161, 1],
            ui: UiConfig::default(),
            watch_erc20s: vec![WatchedToken {
                address: "0xdeadbeef".into(),
                symbol: "AIUS".into(),
                name: Some("Arbius".into()),
                decimals: 18,
                chain_id: 42_161,
                logo: None,
            }],
            rpc: RpcOptions {
                retry_attempts: Some(3),
                timeout_ms: Some(30_000),
                urls: None,
            },
        }
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(validate_config(&valid_config()).is_ok());
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = AAWalletConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.default_chain_id, ARBITRUM_ONE);
    }

    #[test]
    fn test_empty_supported_chains_rejected() {
        let mut config = valid_config();
        config.supported_chain_ids.clear();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("non-empty"));
    }

    #[test]
    fn test_default_chain_must_be_supported() {
        let mut config = valid_config();
        config.default_chain_id = 5;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("default_chain_id (5)"));
    }

    #[test]
    fn test_token_missing_address_rejected() {
        let mut config = valid_config();
        config.watch_erc20s[0].address.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_token_missing_symbol_rejected() {
        let mut config = valid_config();
        config.watch_erc20s[0].symbol.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_token_chain_must_be_supported() {
        let mut config = valid_config();
        config.watch_erc20s[0].chain_id = 10;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("token chain_id (10)"));
    }

    #[test]
    fn test_zero_retry_attempts_rejected() {
        let mut config = valid_config();
        config.rpc.retry_attempts = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut config = valid_config();
        config.rpc.timeout_ms = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rpc_urls_must_cover_every_supported_chain() {
        let mut config = valid_config();
        let mut urls = HashMap::new();
        urls.insert(42_161u64, vec!["https://arb1.arbitrum.io/rpc".to_string()]);
        // Chain 1 is supported but has no URL entry
        config.rpc.urls = Some(urls);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("chain_id 1"));
    }

    #[test]
    fn test_first_violation_wins() {
        // Both the chain list and a token are broken; the chain list is
        // checked first
        let mut config = valid_config();
        config.supported_chain_ids.clear();
        config.watch_erc20s[0].address.clear();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("supported_chain_ids"));
    }

    #[test]
    fn test_theme_deserialize() {
        let theme: Theme = serde_json::from_str(r#""system""#).unwrap();
        assert_eq!(theme, Theme::System);
    }
}
