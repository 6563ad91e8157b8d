//! Gas price oracle client
//!
//! Fetches `{slow, average, fast}` gwei tiers from an HTTP oracle,
//! sanitizing whatever comes back. Oracle failures never surface: a missing
//! or malformed field falls back to its default, and every tier is clamped
//! to `[1, MAX_AUTO_GAS_PRICE_GWEI]`.

use crate::config::{
    DEFAULT_GAS_PRICE_AVERAGE_GWEI, DEFAULT_GAS_PRICE_FAST_GWEI, DEFAULT_GAS_PRICE_SLOW_GWEI,
    MAX_AUTO_GAS_PRICE_GWEI,
};
use ethers::types::U256;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Gas price tiers in gwei
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GasPrices {
    pub slow: f64,
    pub average: f64,
    pub fast: f64,
}

impl Default for GasPrices {
    fn default() -> Self {
        Self {
            slow: DEFAULT_GAS_PRICE_SLOW_GWEI,
            average: DEFAULT_GAS_PRICE_AVERAGE_GWEI,
            fast: DEFAULT_GAS_PRICE_FAST_GWEI,
        }
    }
}

/// Auto-gas tier selection
#[derive(Debug, Clone, PartialEq)]
pub enum AutoGasSetting {
    Slow,
    Average,
    Fast,
    /// Anything else; parsed as a numeric gwei override at selection time.
    Custom(String),
}

impl From<&str> for AutoGasSetting {
    fn from(s: &str) -> Self {
        match s {
            "Slow" => AutoGasSetting::Slow,
            "Average" => AutoGasSetting::Average,
            "Fast" => AutoGasSetting::Fast,
            other => AutoGasSetting::Custom(other.to_string()),
        }
    }
}

/// Fetch current gas prices from the oracle. Never fails: network and parse
/// errors return the defaults.
pub async fn fetch_auto_gas_prices(client: &reqwest::Client, url: &str) -> GasPrices {
    if url.is_empty() {
        return GasPrices::default();
    }

    let body = match client.get(url).send().await {
        Ok(response) => match response.json::<serde_json::Value>().await {
            Ok(body) => body,
            Err(e) => {
                warn!(url, error = %e, "Gas oracle returned unparseable body");
                return GasPrices::default();
            }
        },
        Err(e) => {
            warn!(url, error = %e, "Gas oracle request failed");
            return GasPrices::default();
        }
    };

    sanitize_gas_prices(&body)
}

/// Field-wise repair of an oracle response: non-numeric tiers fall back to
/// their defaults, then every tier is clamped.
pub fn sanitize_gas_prices(body: &serde_json::Value) -> GasPrices {
    let defaults = GasPrices::default();
    GasPrices {
        slow: sanitize_tier(body.get("slow"), defaults.slow),
        average: sanitize_tier(body.get("average"), defaults.average),
        fast: sanitize_tier(body.get("fast"), defaults.fast),
    }
}

fn sanitize_tier(value: Option<&serde_json::Value>, default: f64) -> f64 {
    let gwei = value.and_then(|v| v.as_f64()).unwrap_or(default);
    clamp_gwei(gwei, MAX_AUTO_GAS_PRICE_GWEI)
}

fn clamp_gwei(gwei: f64, max: f64) -> f64 {
    gwei.clamp(1.0, max)
}

/// Pick a gwei price for a tier setting. A custom setting parses as a
/// finite gwei number; anything unparseable falls back to the average tier.
pub fn select_gas_price_gwei(prices: &GasPrices, setting: &AutoGasSetting) -> f64 {
    match setting {
        AutoGasSetting::Slow => prices.slow,
        AutoGasSetting::Average => prices.average,
        AutoGasSetting::Fast => prices.fast,
        AutoGasSetting::Custom(raw) => match raw.trim().parse::<f64>() {
            Ok(gwei) if gwei.is_finite() => gwei,
            _ => prices.average,
        },
    }
}

/// Convert gwei to wei, rounding to the nearest wei.
pub fn gwei_to_wei(gwei: f64) -> U256 {
    let wei = (gwei * 1e9).round();
    if wei <= 0.0 {
        U256::zero()
    } else {
        U256::from(wei as u128)
    }
}

/// Convert wei to gwei, saturating at f64 precision.
pub fn wei_to_gwei(wei: U256) -> f64 {
    if wei > U256::from(u128::MAX) {
        return u128::MAX as f64 / 1e9;
    }
    wei.as_u128() as f64 / 1e9
}
