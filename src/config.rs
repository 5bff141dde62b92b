//! Layered configuration: built-in defaults, then an optional TOML file,
//! then `UPBOT__SECTION__KEY` environment variables.

use crate::api::{CandleUnit, UPBIT_API_BASE};
use config::{Config, ConfigBuilder, Environment, File, FileFormat};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_CONFIG_NAME: &str = "upbot";
const ENV_PREFIX: &str = "UPBOT";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub exchange: ExchangeConfig,
    pub poller: PollerConfig,
    pub rate_limit: RateLimitConfig,
    pub history: HistoryConfig,
    pub wallet: WalletConfig,
    pub strategy: StrategyConfig,
    pub report: ReportConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    pub base_url: String,
    pub request_timeout_secs: u64,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            base_url: UPBIT_API_BASE.to_string(),
            request_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CandleResolution {
    Minutes,
    Days,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    pub snapshot_interval_ms: u64,
    /// 0 disables candle polling
    pub candle_interval_secs: u64,
    pub candle_resolution: CandleResolution,
    pub candle_minutes: u32,
    pub candle_count: u32,
    pub backoff_ms: u64,
    /// Only instruments whose symbol starts with this are tracked
    pub quote_prefix: String,
    pub channel_capacity: usize,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            snapshot_interval_ms: 1_000,
            candle_interval_secs: 60,
            candle_resolution: CandleResolution::Minutes,
            candle_minutes: 1,
            candle_count: 60,
            backoff_ms: 1_000,
            quote_prefix: "KRW-".to_string(),
            channel_capacity: 16,
        }
    }
}

impl PollerConfig {
    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_millis(self.snapshot_interval_ms)
    }

    pub fn candle_interval(&self) -> Option<Duration> {
        (self.candle_interval_secs > 0).then(|| Duration::from_secs(self.candle_interval_secs))
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    pub fn candle_unit(&self) -> CandleUnit {
        match self.candle_resolution {
            CandleResolution::Minutes => CandleUnit::Minutes(self.candle_minutes),
            CandleResolution::Days => CandleUnit::Days,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub per_second: u32,
    pub per_minute: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_second: 5,
            per_minute: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Snapshots kept per instrument
    pub capacity: usize,
    /// Candles kept per instrument
    pub candle_capacity: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            capacity: 180,
            candle_capacity: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    pub starting_balance: Decimal,
    pub fee_rate: Decimal,
    /// Cash spent per buy decision
    pub buy_unit: Decimal,
    pub inbox_capacity: usize,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            starting_balance: Decimal::from(1_000_000),
            fee_rate: Decimal::new(5, 4),
            buy_unit: Decimal::from(100_000),
            inbox_capacity: 64,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    ThresholdDecline,
    RsiCross,
    StopLossOrTakeProfit,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    pub enabled: Vec<StrategyKind>,
    pub detected_rate: f64,
    /// Window length required before the threshold strategy runs;
    /// defaults to the history capacity
    pub min_samples: Option<usize>,
    pub rsi_period: usize,
    pub rsi_buy_threshold: f64,
    pub rsi_take_profit_threshold: f64,
    pub rsi_panic_threshold: f64,
    pub lose_rate: f64,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            enabled: vec![
                StrategyKind::ThresholdDecline,
                StrategyKind::RsiCross,
                StrategyKind::StopLossOrTakeProfit,
            ],
            detected_rate: 0.05,
            min_samples: None,
            rsi_period: 14,
            rsi_buy_threshold: 0.3,
            rsi_take_profit_threshold: 0.7,
            rsi_panic_threshold: 0.10,
            lose_rate: 0.05,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// How often the wallet and history summaries are logged; 0 disables
    pub summary_interval_secs: u64,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            summary_interval_secs: 60,
        }
    }
}

impl AppConfig {
    /// Load from `path` (required) or `./upbot.toml` (optional), then env
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let builder = match path {
            Some(p) => Config::builder().add_source(File::from(p).required(true)),
            None => Config::builder().add_source(File::with_name(DEFAULT_CONFIG_NAME).required(false)),
        };
        Self::build(builder)
    }

    /// Load from an inline TOML document, then env
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        Self::build(Config::builder().add_source(File::from_str(toml, FileFormat::Toml)))
    }

    fn build(
        builder: ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self, ConfigError> {
        let config: AppConfig = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.exchange.base_url.is_empty() {
            return invalid("exchange.base_url must not be empty");
        }
        if self.poller.snapshot_interval_ms == 0 {
            return invalid("poller.snapshot_interval_ms must be positive");
        }
        if self.poller.candle_resolution == CandleResolution::Minutes
            && self.poller.candle_minutes == 0
        {
            return invalid("poller.candle_minutes must be positive");
        }
        if self.poller.candle_count == 0 {
            return invalid("poller.candle_count must be positive");
        }
        if self.poller.channel_capacity == 0 {
            return invalid("poller.channel_capacity must be positive");
        }
        if self.rate_limit.per_second == 0 || self.rate_limit.per_minute == 0 {
            return invalid("rate_limit quotas must be positive");
        }
        if self.history.capacity < 2 {
            return invalid("history.capacity must be at least 2");
        }
        if self.history.candle_capacity == 0 {
            return invalid("history.candle_capacity must be positive");
        }
        if self.wallet.starting_balance < Decimal::ZERO {
            return invalid("wallet.starting_balance must not be negative");
        }
        if self.wallet.fee_rate < Decimal::ZERO || self.wallet.fee_rate >= Decimal::ONE {
            return invalid("wallet.fee_rate must be in [0, 1)");
        }
        if self.wallet.buy_unit <= Decimal::ZERO {
            return invalid("wallet.buy_unit must be positive");
        }
        if self.strategy.rsi_period == 0 {
            return invalid("strategy.rsi_period must be positive");
        }
        if !(0.0..1.0).contains(&self.strategy.lose_rate) {
            return invalid("strategy.lose_rate must be in [0, 1)");
        }
        if self.strategy.detected_rate < 0.0 {
            return invalid("strategy.detected_rate must not be negative");
        }
        Ok(())
    }

    /// Window length the threshold strategy waits for
    pub fn min_samples(&self) -> usize {
        self.strategy
            .min_samples
            .unwrap_or(self.history.capacity)
            .min(self.history.capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.rate_limit.per_second, 5);
        assert_eq!(config.rate_limit.per_minute, 500);
        assert_eq!(config.wallet.fee_rate, Decimal::new(5, 4));
        assert_eq!(config.strategy.rsi_period, 14);
        assert_eq!(config.min_samples(), 180);
        assert_eq!(config.poller.candle_unit(), CandleUnit::Minutes(1));
    }

    #[test]
    fn test_toml_overrides() {
        let config = AppConfig::from_toml_str(
            r#"
            [history]
            capacity = 30

            [wallet]
            starting_balance = 5000
            fee_rate = 0.001

            [poller]
            candle_resolution = "days"
            candle_interval_secs = 0

            [strategy]
            enabled = ["rsi_cross"]
            min_samples = 10
            "#,
        )
        .unwrap();

        assert_eq!(config.history.capacity, 30);
        assert_eq!(config.wallet.starting_balance, Decimal::from(5000));
        assert_eq!(config.wallet.fee_rate, Decimal::new(1, 3));
        assert_eq!(config.poller.candle_unit(), CandleUnit::Days);
        assert!(config.poller.candle_interval().is_none());
        assert_eq!(config.strategy.enabled, vec![StrategyKind::RsiCross]);
        assert_eq!(config.min_samples(), 10);
        // Untouched sections keep defaults
        assert_eq!(config.rate_limit.per_second, 5);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = AppConfig::from_toml_str("[rate_limit]\nper_second = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = AppConfig::from_toml_str("[wallet]\nfee_rate = 1.5\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_min_samples_capped_by_capacity() {
        let mut config = AppConfig::default();
        config.strategy.min_samples = Some(10_000);
        assert_eq!(config.min_samples(), config.history.capacity);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let err = AppConfig::load(Some(Path::new("/nonexistent/upbot-test.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Load(_)));
    }
}
