//! Configuration loading and validation for one Adapter Facade instance
//! (§4.10).
//!
//! Uses serde_yaml to load YAML configuration with environment-variable
//! overrides for credentials, mirroring the teacher's `Config::load`.

mod duration;
mod error;
mod reconnect;
mod ttl;

pub use error::ConfigError;
pub use reconnect::ReconnectCaps;
pub use ttl::TtlOverrides;

use rust_decimal::Decimal;
use serde::Deserialize;
use std::{env, fs};

/// Whether a facade simulates trading in-process or talks to the live venue
/// (§4.10). In `Paper` mode the private session is never opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    Paper,
    Live,
}

/// Configuration recognized by the Adapter Facade (§4.10's option list,
/// unchanged).
#[derive(Debug, Clone, Deserialize)]
pub struct AdapterConfig {
    pub venue: String,
    /// Loaded from `{VENUE}_API_KEY`, never read from the YAML file itself.
    #[serde(skip)]
    pub api_key: String,
    /// Loaded from `{VENUE}_API_SECRET`.
    #[serde(skip)]
    pub api_secret: String,
    pub symbol: String,
    #[serde(default)]
    pub session_id: Option<String>,
    pub trading_mode: TradingMode,
    #[serde(default)]
    pub initial_budget: Option<Decimal>,
    #[serde(default)]
    pub base_currency_balance: Option<Decimal>,
    #[serde(default = "default_true")]
    pub subscribe_to_order_book: bool,
    #[serde(default = "default_order_book_depth")]
    pub order_book_depth: usize,
    #[serde(default)]
    pub reconnect_caps: ReconnectCaps,
    #[serde(default)]
    pub ttl_overrides: TtlOverrides,
    #[serde(default = "default_fee_refresh_interval_ms")]
    pub fee_refresh_interval_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_order_book_depth() -> usize {
    10
}

fn default_fee_refresh_interval_ms() -> u64 {
    60_000
}

impl AdapterConfig {
    /// Loads configuration from a YAML file, then overlays credentials from
    /// `.env`/the process environment (`{VENUE}_API_KEY`, `{VENUE}_API_SECRET`).
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let content = fs::read_to_string(path)?;
        let mut config: AdapterConfig = serde_yaml::from_str(&content)?;

        config.load_credentials_from_env();
        config.validate()?;

        Ok(config)
    }

    fn load_credentials_from_env(&mut self) {
        let prefix = self.venue.to_uppercase();
        self.api_key = env::var(format!("{prefix}_API_KEY")).unwrap_or_default();
        self.api_secret = env::var(format!("{prefix}_API_SECRET")).unwrap_or_default();
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.venue.is_empty() {
            return Err(ConfigError::Validation("venue is required".into()));
        }
        if self.symbol.is_empty() {
            return Err(ConfigError::Validation("symbol is required".into()));
        }
        if self.trading_mode == TradingMode::Live
            && (self.api_key.is_empty() || self.api_secret.is_empty())
        {
            return Err(ConfigError::Validation(format!(
                "live trading requires credentials (set {}_API_KEY and {}_API_SECRET env vars)",
                self.venue.to_uppercase(),
                self.venue.to_uppercase()
            )));
        }
        if self.order_book_depth == 0 {
            return Err(ConfigError::Validation(
                "order_book_depth must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp_yaml(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_minimal_paper_config_without_credentials() {
        let file = write_temp_yaml(
            r#"
venue: krakenesque
symbol: "BTC/USD"
trading_mode: paper
"#,
        );
        let config = AdapterConfig::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.venue, "krakenesque");
        assert_eq!(config.order_book_depth, 10);
        assert_eq!(config.ttl_overrides.buy_ms, 16_000);
        assert_eq!(config.ttl_overrides.sell_ms, 900_000);
    }

    #[test]
    fn live_mode_without_credentials_fails_validation() {
        let file = write_temp_yaml(
            r#"
venue: krakenesque
symbol: "BTC/USD"
trading_mode: live
"#,
        );
        let err = AdapterConfig::load(file.path().to_str().unwrap()).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn zero_depth_fails_validation() {
        let file = write_temp_yaml(
            r#"
venue: krakenesque
symbol: "BTC/USD"
trading_mode: paper
order_book_depth: 0
"#,
        );
        let err = AdapterConfig::load(file.path().to_str().unwrap()).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }
}
