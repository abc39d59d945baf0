//! Configuration schema and layered loading (§10.2).
//!
//! Defaults are baked in, overridden by an optional TOML file, overridden
//! again by `LADDER_MM__`-prefixed environment variables (double
//! underscore as the nesting separator). `validate()` runs once after
//! deserialization and turns missing/malformed values into a fatal
//! [`ConfigError`] rather than a panic deep inside the worker.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use config::{Config as ConfigLoader, Environment, File, FileFormat};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;
use crate::model::LiquidityShape;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateBehaviorConfig {
    Sequential,
    Atomic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub account_id: String,
    pub private_key_hex: String,
    pub ledger_id: String,
    #[serde(default = "default_key_type")]
    pub key_type: String,

    pub api_base_url: String,
    pub redis_connection_string: String,
    #[serde(default = "default_redis_index_key")]
    pub redis_index_key: String,
    #[serde(default = "default_redis_poll_interval_ms")]
    pub redis_poll_interval_ms: u64,

    pub num_levels: u32,
    pub level_0_quantity: u64,
    pub levels_1_to_2_quantity: u64,
    pub levels_3_plus_quantity: u64,

    pub base_spread_usd: Decimal,
    pub level_spacing_usd: Decimal,
    pub initial_margin_factor: Decimal,

    pub trading_decimals: u32,
    pub settlement_decimals: u32,

    #[serde(default = "default_update_behavior")]
    pub update_behavior: UpdateBehaviorConfig,
    #[serde(default = "default_atomic_delay_ms")]
    pub atomic_replacement_delay_ms: u64,
    #[serde(default = "default_enable_stp")]
    pub enable_self_trade_prevention: bool,
    #[serde(default = "default_peel_delay_ms")]
    pub sequential_peel_delay_ms: u64,

    #[serde(default = "default_token_refresh_secs")]
    pub token_refresh_interval_seconds: u64,
    #[serde(default)]
    pub continuous_settlement: bool,
    #[serde(default = "default_settle_on_startup")]
    pub settle_on_startup: bool,

    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_metrics_addr")]
    pub metrics_listen_addr: SocketAddr,
}

fn default_key_type() -> String {
    "ed25519".to_string()
}
fn default_redis_index_key() -> String {
    "index_price".to_string()
}
fn default_redis_poll_interval_ms() -> u64 {
    250
}
fn default_update_behavior() -> UpdateBehaviorConfig {
    UpdateBehaviorConfig::Atomic
}
fn default_atomic_delay_ms() -> u64 {
    250
}
fn default_enable_stp() -> bool {
    true
}
fn default_peel_delay_ms() -> u64 {
    150
}
fn default_token_refresh_secs() -> u64 {
    800
}
fn default_settle_on_startup() -> bool {
    true
}
fn default_log_format() -> String {
    "human".to_string()
}
fn default_metrics_addr() -> SocketAddr {
    "127.0.0.1:9090".parse().expect("valid default socket addr")
}

impl WorkerConfig {
    /// Loads configuration from, in increasing priority: built-in defaults,
    /// an optional TOML file at `path`, then `LADDER_MM__`-prefixed
    /// environment variables. Runs `validate()` before returning.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigLoader::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::new(path, FileFormat::Toml).required(false));
        }
        let built = builder
            .add_source(Environment::with_prefix("LADDER_MM").separator("__"))
            .build()
            .context("failed to assemble configuration sources")?;

        let cfg: WorkerConfig = built.try_deserialize().context("failed to deserialize configuration")?;
        cfg.validate().context("configuration failed validation")?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.account_id.trim().is_empty() {
            return Err(ConfigError::Missing("account_id"));
        }
        if self.private_key_hex.trim().is_empty() {
            return Err(ConfigError::Missing("private_key_hex"));
        }
        if self.ledger_id.trim().is_empty() {
            return Err(ConfigError::Missing("ledger_id"));
        }
        if self.api_base_url.trim().is_empty() {
            return Err(ConfigError::Missing("api_base_url"));
        }
        if self.redis_connection_string.trim().is_empty() {
            return Err(ConfigError::Missing("redis_connection_string"));
        }
        if self.num_levels == 0 {
            return Err(ConfigError::Invalid { field: "num_levels", reason: "must be > 0".into() });
        }
        if self.base_spread_usd <= Decimal::ZERO {
            return Err(ConfigError::Invalid { field: "base_spread_usd", reason: "must be positive".into() });
        }
        if self.level_spacing_usd <= Decimal::ZERO {
            return Err(ConfigError::Invalid { field: "level_spacing_usd", reason: "must be positive".into() });
        }
        if self.initial_margin_factor <= Decimal::ZERO {
            return Err(ConfigError::Invalid { field: "initial_margin_factor", reason: "must be positive".into() });
        }
        if self.trading_decimals > 18 {
            return Err(ConfigError::Invalid { field: "trading_decimals", reason: "must be <= 18".into() });
        }
        if self.settlement_decimals > 18 {
            return Err(ConfigError::Invalid { field: "settlement_decimals", reason: "must be <= 18".into() });
        }
        Ok(())
    }

    /// Fails fast (§4.5 step 1) if the venue's reported decimal precision
    /// disagrees with what this worker was configured for.
    pub fn check_decimals(&self, venue_trading: u32, venue_settlement: u32) -> Result<(), ConfigError> {
        if venue_trading != self.trading_decimals || venue_settlement != self.settlement_decimals {
            return Err(ConfigError::DecimalsMismatch {
                configured_trading: self.trading_decimals,
                configured_settlement: self.settlement_decimals,
                venue_trading,
                venue_settlement,
            });
        }
        Ok(())
    }

    pub fn liquidity_shape(&self) -> LiquidityShape {
        LiquidityShape {
            size_level_0: self.level_0_quantity,
            size_level_1_2: self.levels_1_to_2_quantity,
            size_level_3_plus: self.levels_3_plus_quantity,
        }
    }

    pub fn margin_factor_ppm(&self) -> u64 {
        (self.initial_margin_factor * Decimal::from(1_000_000u64)).to_u64().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn base_config() -> WorkerConfig {
        WorkerConfig {
            account_id: "acct".into(),
            private_key_hex: "deadbeef".into(),
            ledger_id: "ledger-0".into(),
            key_type: default_key_type(),
            api_base_url: "https://venue.example".into(),
            redis_connection_string: "redis://localhost".into(),
            redis_index_key: default_redis_index_key(),
            redis_poll_interval_ms: default_redis_poll_interval_ms(),
            num_levels: 2,
            level_0_quantity: 100,
            levels_1_to_2_quantity: 50,
            levels_3_plus_quantity: 50,
            base_spread_usd: dec!(10),
            level_spacing_usd: dec!(5),
            initial_margin_factor: dec!(0.2),
            trading_decimals: 8,
            settlement_decimals: 6,
            update_behavior: default_update_behavior(),
            atomic_replacement_delay_ms: default_atomic_delay_ms(),
            enable_self_trade_prevention: default_enable_stp(),
            sequential_peel_delay_ms: default_peel_delay_ms(),
            token_refresh_interval_seconds: default_token_refresh_secs(),
            continuous_settlement: false,
            settle_on_startup: default_settle_on_startup(),
            log_format: default_log_format(),
            metrics_listen_addr: default_metrics_addr(),
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn missing_account_id_is_rejected() {
        let mut cfg = base_config();
        cfg.account_id = "".into();
        assert!(matches!(cfg.validate(), Err(ConfigError::Missing("account_id"))));
    }

    #[test]
    fn zero_spread_is_rejected() {
        let mut cfg = base_config();
        cfg.base_spread_usd = Decimal::ZERO;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn margin_factor_ppm_converts_decimal_fraction() {
        let cfg = base_config();
        assert_eq!(cfg.margin_factor_ppm(), 200_000);
    }

    #[test]
    fn decimals_mismatch_is_fatal() {
        let cfg = base_config();
        assert!(cfg.check_decimals(8, 6).is_ok());
        assert!(matches!(cfg.check_decimals(9, 6), Err(ConfigError::DecimalsMismatch { .. })));
    }
}
