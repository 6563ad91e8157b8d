//! Configuration for the gateway
//!
//! Loads settings from TOML files with environment variable substitution, and
//! defines the tuning constants shared by the queue, caller and executor.

use crate::error::{GatewayError, GatewayResult};
use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Attempts for a retried read call before giving up.
pub const DEFAULT_CALL_RETRIES: u32 = 5;
/// First delay of the read-call retry schedule.
pub const RETRY_INITIAL_DELAY: Duration = Duration::from_millis(1_000);
/// Upper bound on any retry delay.
pub const RETRY_MAX_DELAY: Duration = Duration::from_millis(60_000);
/// Backoff multiplier for read-call retries.
pub const RETRY_BACKOFF_FACTOR: f64 = 2.0;

/// Per-attempt timeout when polling for a transaction receipt.
pub const RECEIPT_ATTEMPT_TIMEOUT: Duration = Duration::from_millis(30_000);
/// Receipt poll backoff bounds and multiplier.
pub const RECEIPT_MIN_DELAY: Duration = Duration::from_millis(2_000);
pub const RECEIPT_MAX_DELAY: Duration = Duration::from_millis(60_000);
pub const RECEIPT_BACKOFF_FACTOR: f64 = 1.5;
/// Receipt poll attempts before the wait fails.
pub const RECEIPT_MAX_ATTEMPTS: u32 = 10;

/// Timeout for a single transaction submission.
pub const TX_SUBMIT_TIMEOUT: Duration = Duration::from_millis(30_000);
/// A nonce unused for this long is re-fetched from the chain.
pub const NONCE_STALE_AFTER: Duration = Duration::from_millis(120_000);
/// Gas limit applied when the caller supplies none.
pub const DEFAULT_GAS_LIMIT: u64 = 2_000_000;

/// Transaction queue shape: 3 starts per 100ms, strictly one in flight.
pub const TX_QUEUE_RATE: usize = 3;
pub const TX_QUEUE_INTERVAL: Duration = Duration::from_millis(100);
pub const TX_QUEUE_CONCURRENCY: usize = 1;

/// Read-call queue defaults: 10 starts per 100ms, 20 in flight.
pub const CALL_QUEUE_RATE: usize = 10;
pub const CALL_QUEUE_INTERVAL: Duration = Duration::from_millis(100);
pub const CALL_QUEUE_CONCURRENCY: usize = 20;

/// Ceiling applied to every oracle-reported price, in gwei.
pub const MAX_AUTO_GAS_PRICE_GWEI: f64 = 2_000.0;
/// Fallback prices when the oracle is unreachable or malformed, in gwei.
pub const DEFAULT_GAS_PRICE_SLOW_GWEI: f64 = 1.0;
pub const DEFAULT_GAS_PRICE_AVERAGE_GWEI: f64 = 5.0;
pub const DEFAULT_GAS_PRICE_FAST_GWEI: f64 = 10.0;

/// Gas oracle refresh period.
pub const GAS_PRICES_INTERVAL: Duration = Duration::from_millis(60_000);
/// Signer balance refresh period.
pub const BALANCE_REFRESH_INTERVAL: Duration = Duration::from_millis(10_000);
/// Block listener debounce window.
pub const BLOCK_DEBOUNCE: Duration = Duration::from_millis(1_000);
/// Polling interval for HTTP providers.
pub const HTTP_POLL_INTERVAL: Duration = Duration::from_millis(8_000);

/// Empty bulk chunks are retried this many times, then accepted as empty.
pub const BULK_EMPTY_RETRY_LIMIT: u32 = 3;

/// Gateway settings, embeddable with `Default` or loaded from TOML
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    /// JSON-RPC endpoint; `wss://` selects a websocket provider.
    pub rpc_url: String,
    /// HTTP endpoint of the gas price oracle.
    pub gas_oracle_url: String,
    /// Auto-gas tier: "Slow", "Average", "Fast", or a numeric gwei override.
    pub gas_setting: String,
    /// Read-call retry attempts.
    pub max_call_retries: u32,
    /// Read-call queue shape.
    pub call_queue_rate: usize,
    pub call_queue_interval_ms: u64,
    pub call_queue_concurrency: usize,
    /// Gas oracle refresh period.
    pub gas_prices_interval_ms: u64,
    /// Signer balance refresh period.
    pub balance_interval_ms: u64,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            rpc_url: "http://localhost:8545".to_string(),
            gas_oracle_url: String::new(),
            gas_setting: "Average".to_string(),
            max_call_retries: DEFAULT_CALL_RETRIES,
            call_queue_rate: CALL_QUEUE_RATE,
            call_queue_interval_ms: CALL_QUEUE_INTERVAL.as_millis() as u64,
            call_queue_concurrency: CALL_QUEUE_CONCURRENCY,
            gas_prices_interval_ms: GAS_PRICES_INTERVAL.as_millis() as u64,
            balance_interval_ms: BALANCE_REFRESH_INTERVAL.as_millis() as u64,
        }
    }
}

impl GatewaySettings {
    /// Load settings from the file named by `EVM_GATEWAY_CONFIG`,
    /// falling back to `config/default.toml`
    pub fn load() -> GatewayResult<Self> {
        let config_path = env::var("EVM_GATEWAY_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));
        Self::load_from(&config_path)
    }

    /// Load settings from a specific TOML file
    pub fn load_from(path: &PathBuf) -> GatewayResult<Self> {
        let config_str = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        // Substitute environment variables
        let config_str = substitute_env_vars(&config_str);

        let settings: GatewaySettings = toml::from_str(&config_str)
            .map_err(|e| GatewayError::Config(format!("Failed to parse configuration: {}", e)))?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    pub fn validate(&self) -> GatewayResult<()> {
        if self.rpc_url.is_empty() {
            return Err(GatewayError::Config("rpc_url must not be empty".to_string()));
        }
        if self.call_queue_rate == 0 || self.call_queue_interval_ms == 0 || self.call_queue_concurrency == 0
        {
            return Err(GatewayError::Config(
                "call queue rate, interval and concurrency must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn call_queue_interval(&self) -> Duration {
        Duration::from_millis(self.call_queue_interval_ms)
    }

    pub fn gas_prices_interval(&self) -> Duration {
        Duration::from_millis(self.gas_prices_interval_ms)
    }

    pub fn balance_interval(&self) -> Duration {
        Duration::from_millis(self.balance_interval_ms)
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();
    let re = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").unwrap();

    for cap in re.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}
