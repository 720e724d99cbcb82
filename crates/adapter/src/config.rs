use ethereal_bridge::BridgeConfig;
use ethereal_core::{FeeSchedule, MarginMode};
use ethereal_rest::RestConfig;
use ethereal_rounding::StepSource;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Errors loading an [`AdapterConfig`] from disk.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Configuration for the [`crate::Ethereal`] facade.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    pub rest: RestConfig,
    /// Address that signs and sends orders.
    pub wallet_address: Option<String>,
    pub private_key: Option<String>,
    /// Address that owns the subaccounts. Falls back to `wallet_address`.
    pub l1_wallet_address: Option<String>,
    /// Reported by `fetch_leverage`.
    pub leverage: Decimal,
    /// Reported by `fetch_margin_mode`.
    pub margin_mode: MarginMode,
    pub fees: FeeSchedule,
    /// Grid used when normalizing orders.
    pub step_source: StepSource,
    /// Fill count requested when the caller gives no limit.
    pub default_trade_limit: u32,
    pub bridge: BridgeConfig,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            rest: RestConfig::default(),
            wallet_address: None,
            private_key: None,
            l1_wallet_address: None,
            leverage: dec!(10),
            margin_mode: MarginMode::Cross,
            fees: FeeSchedule {
                maker: dec!(0.0003),
                taker: dec!(0.0003),
            },
            step_source: StepSource::Tick,
            default_trade_limit: 100,
            bridge: BridgeConfig::default(),
        }
    }
}

// Keeps the private key out of logs.
impl std::fmt::Debug for AdapterConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterConfig")
            .field("rest", &self.rest)
            .field("wallet_address", &self.wallet_address)
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .field("l1_wallet_address", &self.l1_wallet_address)
            .field("leverage", &self.leverage)
            .field("margin_mode", &self.margin_mode)
            .field("fees", &self.fees)
            .field("step_source", &self.step_source)
            .field("default_trade_limit", &self.default_trade_limit)
            .field("bridge", &self.bridge)
            .finish()
    }
}

impl AdapterConfig {
    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&raw)
    }

    /// Address whose subaccounts are listed.
    pub fn account_owner(&self) -> Option<&str> {
        self.l1_wallet_address
            .as_deref()
            .or(self.wallet_address.as_deref())
    }
}
