//! Configuration management for quaiwallet

use crate::error::WalletError;
use crate::zone::Shard;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub wallet: WalletConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    /// Base WebSocket URL without port, e.g. `ws://127.0.0.1`
    #[serde(default = "default_url")]
    pub url: String,
    /// Port overrides keyed by shard hex id ("0x", "0x0", "0x00", ...)
    #[serde(default)]
    pub ports: HashMap<String, u16>,
    #[serde(default = "default_max_ready_attempts")]
    pub max_ready_attempts: u32,
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_receipt_poll_interval_ms")]
    pub receipt_poll_interval_ms: u64,
    #[serde(default = "default_receipt_poll_attempts")]
    pub receipt_poll_attempts: u32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            ports: HashMap::new(),
            max_ready_attempts: default_max_ready_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            receipt_poll_interval_ms: default_receipt_poll_interval_ms(),
            receipt_poll_attempts: default_receipt_poll_attempts(),
        }
    }
}

impl NetworkConfig {
    pub fn url_for(&self, shard: Shard) -> String {
        let port = self
            .ports
            .get(&shard.as_hex())
            .copied()
            .unwrap_or_else(|| shard.default_ws_port());
        format!("{}:{}", self.url.trim_end_matches('/'), port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn receipt_poll_interval(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_interval_ms)
    }
}

/// Fee charged by the network: a base amount plus a per-input amount, in qits.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
pub struct FeePolicy {
    #[serde(default)]
    pub base: u64,
    #[serde(default)]
    pub per_input: u64,
}

impl FeePolicy {
    pub fn fee_for(&self, inputs: usize) -> u64 {
        self.base
            .saturating_add(self.per_input.saturating_mul(inputs as u64))
    }
}

impl Default for FeePolicy {
    fn default() -> Self {
        Self {
            base: 10,
            per_input: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    /// Upper bound on candidate indices tried when searching for a zone address
    #[serde(default = "default_max_address_attempts")]
    pub max_address_attempts: u32,
    /// Consecutive unused addresses that end a scan
    #[serde(default = "default_gap_limit")]
    pub gap_limit: u32,
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
    #[serde(default)]
    pub fee: FeePolicy,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            max_address_attempts: default_max_address_attempts(),
            gap_limit: default_gap_limit(),
            chain_id: default_chain_id(),
            fee: FeePolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

fn default_url() -> String {
    "ws://127.0.0.1".to_string()
}

fn default_max_ready_attempts() -> u32 {
    8
}

fn default_base_backoff_ms() -> u64 {
    100
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_receipt_poll_interval_ms() -> u64 {
    1_000
}

fn default_receipt_poll_attempts() -> u32 {
    60
}

fn default_max_address_attempts() -> u32 {
    10_000
}

fn default_gap_limit() -> u32 {
    20
}

fn default_chain_id() -> u64 {
    9000
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Config {
    pub fn validate(&self) -> Result<(), WalletError> {
        if self.network.url.is_empty() {
            return Err(WalletError::ConfigError("network.url must be set".into()));
        }
        if self.network.max_ready_attempts == 0 {
            return Err(WalletError::ConfigError(
                "network.max_ready_attempts must be greater than zero".into(),
            ));
        }
        if self.wallet.max_address_attempts == 0 {
            return Err(WalletError::ConfigError(
                "wallet.max_address_attempts must be greater than zero".into(),
            ));
        }
        if self.wallet.gap_limit == 0 {
            return Err(WalletError::ConfigError(
                "wallet.gap_limit must be greater than zero".into(),
            ));
        }
        for key in self.network.ports.keys() {
            if !key.starts_with("0x") {
                return Err(WalletError::ConfigError(format!(
                    "network.ports key {} must be a shard hex id",
                    key
                )));
            }
        }
        Ok(())
    }
}

pub fn parse_config(contents: &str) -> Result<Config, WalletError> {
    let config: Config =
        toml::from_str(contents).map_err(|e| WalletError::ConfigError(e.to_string()))?;
    config.validate()?;
    Ok(config)
}

/// Loads `path`, falling back to defaults when the file is absent.
pub fn load_config(path: &Path) -> Result<Config, WalletError> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let contents = fs::read_to_string(path)?;
    parse_config(&contents)
}
