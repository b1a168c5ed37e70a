//! Configuration management for the XEMM engine.
//!
//! Loads settings from an optional config file, environment variables and
//! named presets, then validates them into the typed `XemmParams` the engine
//! runs with.

use anyhow::{anyhow, Context, Result};
use chrono::Duration;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::exchange::{TradingPair, VenueId};

/// Upper bound for configured durations (one year).
pub const MAX_DURATION_SECS: u64 = 365 * 24 * 60 * 60;

fn seconds(secs: u64) -> Option<Duration> {
    i64::try_from(secs).ok().and_then(Duration::try_seconds)
}

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Venue where resting quotes are placed
    #[serde(default = "default_maker_market")]
    pub maker: MarketConfig,
    /// Venue where fills are hedged
    #[serde(default = "default_taker_market")]
    pub taker: MarketConfig,
    /// Quoting, cancellation and hedging parameters
    #[serde(default)]
    pub strategy: StrategyConfig,
    /// Event loop and ledger settings
    #[serde(default)]
    pub runtime: RuntimeConfig,
    /// Order book / trade archival
    #[serde(default)]
    pub archive: ArchiveConfig,
    /// Paper market driving the mock venues
    #[serde(default)]
    pub paper: PaperConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    /// Venue identifier
    pub venue: String,
    /// Trading pair in BASE-QUOTE form
    pub pair: String,
    /// Price tick (0 = no rounding)
    #[serde(default)]
    pub tick_size: Decimal,
    /// Quantity step (0 = no rounding)
    #[serde(default)]
    pub lot_size: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Quote size in base asset
    #[serde(default = "default_order_amount")]
    pub order_amount: Decimal,
    /// Spread applied to the taker hedge price when quoting
    #[serde(default = "default_spread_bps")]
    pub spread_bps: Decimal,
    /// Quotes closer than this to the taker price are cancelled
    #[serde(default = "default_min_spread_bps")]
    pub min_spread_bps: Decimal,
    /// Buffer applied to taker hedge limit prices
    #[serde(default = "default_slippage_buffer_bps")]
    pub slippage_buffer_bps: Decimal,
    /// Quotes older than this are refreshed
    #[serde(default = "default_max_order_age_secs")]
    pub max_order_age_secs: u64,
    /// Maker venue fee rate (0.001 = 0.1%)
    #[serde(default = "default_fee")]
    pub maker_fee: Decimal,
    /// Taker venue fee rate
    #[serde(default = "default_fee")]
    pub taker_fee: Decimal,
    /// Quotes smaller than this after sizing are skipped
    #[serde(default)]
    pub min_order_amount: Decimal,
    /// Stop placing new quotes after a fill could not be hedged
    #[serde(default)]
    pub halt_on_unhedged_fill: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Tick cadence in milliseconds
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// SQLite ledger for quotes, hedges and profit
    #[serde(default = "default_ledger_path")]
    pub ledger_path: String,
    /// Log the status report every N ticks (0 = never)
    #[serde(default = "default_status_every_ticks")]
    pub status_every_ticks: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_archive_path")]
    pub path: String,
    /// Book levels stored per side
    #[serde(default = "default_archive_depth")]
    pub depth: usize,
    /// Buffered records are written at most this often
    #[serde(default = "default_archive_flush_secs")]
    pub flush_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperConfig {
    /// Starting mid price of both books
    #[serde(default = "default_start_mid")]
    pub start_mid: Decimal,
    /// Half of the top-of-book spread
    #[serde(default = "default_half_spread_bps")]
    pub half_spread_bps: Decimal,
    /// Distance between consecutive book levels
    #[serde(default = "default_level_step_bps")]
    pub level_step_bps: Decimal,
    /// Levels per side
    #[serde(default = "default_levels")]
    pub levels: usize,
    /// Size of each level in base asset
    #[serde(default = "default_level_amount")]
    pub level_amount: Decimal,
    /// Taker mid move per tick
    #[serde(default = "default_drift_bps")]
    pub drift_bps: Decimal,
    /// Ticks before the drift changes direction
    #[serde(default = "default_swing_ticks")]
    pub swing_ticks: u64,
    /// Maker mid trails the taker mid by this many ticks
    #[serde(default = "default_maker_lag_ticks")]
    pub maker_lag_ticks: usize,
    /// Starting base balance on each venue
    #[serde(default = "default_base_balance")]
    pub base_balance: Decimal,
    /// Starting quote balance on each venue
    #[serde(default = "default_quote_balance")]
    pub quote_balance: Decimal,
}

// Default value functions
fn default_maker_market() -> MarketConfig {
    MarketConfig {
        venue: "okx".to_string(),
        pair: "DOGE-USDT".to_string(),
        tick_size: Decimal::ZERO,
        lot_size: Decimal::ZERO,
    }
}

fn default_taker_market() -> MarketConfig {
    MarketConfig {
        venue: "binance".to_string(),
        pair: "DOGE-USDT".to_string(),
        tick_size: Decimal::ZERO,
        lot_size: Decimal::ZERO,
    }
}

fn default_order_amount() -> Decimal {
    Decimal::new(500, 0) // 500 base units
}

fn default_spread_bps() -> Decimal {
    Decimal::new(32, 0)
}

fn default_min_spread_bps() -> Decimal {
    Decimal::new(22, 0)
}

fn default_slippage_buffer_bps() -> Decimal {
    Decimal::new(2, 0)
}

fn default_max_order_age_secs() -> u64 {
    30
}

fn default_fee() -> Decimal {
    Decimal::new(1, 3) // 0.001 (0.1%)
}

fn default_tick_interval_ms() -> u64 {
    1000
}

fn default_ledger_path() -> String {
    "data/xemm_ledger.db".to_string()
}

fn default_status_every_ticks() -> u64 {
    30
}

fn default_archive_path() -> String {
    "data/archive.db".to_string()
}

fn default_archive_depth() -> usize {
    10
}

fn default_archive_flush_secs() -> u64 {
    10
}

fn default_start_mid() -> Decimal {
    Decimal::new(1, 1) // 0.10
}

fn default_half_spread_bps() -> Decimal {
    Decimal::new(5, 0)
}

fn default_level_step_bps() -> Decimal {
    Decimal::new(2, 0)
}

fn default_levels() -> usize {
    10
}

fn default_level_amount() -> Decimal {
    Decimal::new(2000, 0)
}

fn default_drift_bps() -> Decimal {
    Decimal::new(4, 0)
}

fn default_swing_ticks() -> u64 {
    40
}

fn default_maker_lag_ticks() -> usize {
    15
}

fn default_base_balance() -> Decimal {
    Decimal::new(5000, 0)
}

fn default_quote_balance() -> Decimal {
    Decimal::new(500, 0)
}

/// Named starting configurations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    /// OKX maker, Binance taker, DOGE-USDT on both
    Default,
    /// Binance US maker (DOGE-USDT), Kraken taker (DOGE-USD)
    KrakenBinanceUs,
}

impl FromStr for Preset {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "default" => Ok(Preset::Default),
            "kraken_binance_us" => Ok(Preset::KrakenBinanceUs),
            other => Err(anyhow!(
                "Unknown preset '{}' (expected 'default' or 'kraken_binance_us')",
                other
            )),
        }
    }
}

impl Config {
    /// Configuration for a named preset.
    pub fn preset(preset: Preset) -> Self {
        match preset {
            Preset::Default => Self::default(),
            Preset::KrakenBinanceUs => Self {
                maker: MarketConfig {
                    venue: "binance_us".to_string(),
                    pair: "DOGE-USDT".to_string(),
                    tick_size: Decimal::ZERO,
                    lot_size: Decimal::ZERO,
                },
                taker: MarketConfig {
                    venue: "kraken".to_string(),
                    pair: "DOGE-USD".to_string(),
                    tick_size: Decimal::ZERO,
                    lot_size: Decimal::ZERO,
                },
                strategy: StrategyConfig {
                    order_amount: Decimal::new(60, 0),
                    spread_bps: Decimal::new(20, 0),
                    min_spread_bps: Decimal::new(18, 0),
                    slippage_buffer_bps: Decimal::new(1, 0),
                    max_order_age_secs: 60,
                    taker_fee: Decimal::new(75, 5), // 0.00075 kraken taker
                    maker_fee: Decimal::ZERO,       // binance us tier 0 (tier 1 is 0.001)
                    min_order_amount: Decimal::new(1, 4),
                    halt_on_unhedged_fill: false,
                },
                ..Self::default()
            },
        }
    }

    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        Self::load_with(Preset::Default, None)
    }

    /// Load on top of a preset, with an optional explicit config file.
    ///
    /// Precedence: environment (`XEMM__SECTION__KEY`) > file > preset.
    pub fn load_with(preset: Preset, path: Option<&str>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let base = config::Config::try_from(&Self::preset(preset))
            .context("Failed to serialize preset configuration")?;

        let file = match path {
            Some(path) => config::File::with_name(path).required(true),
            None => config::File::with_name("config").required(false),
        };

        let config: Self = config::Config::builder()
            .add_source(base)
            .add_source(file)
            .add_source(config::Environment::default().separator("__").prefix("XEMM"))
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        let s = &self.strategy;

        anyhow::ensure!(s.order_amount > Decimal::ZERO, "order_amount must be positive");
        anyhow::ensure!(
            s.min_spread_bps >= Decimal::ZERO,
            "min_spread_bps must not be negative"
        );
        anyhow::ensure!(
            s.min_spread_bps < s.spread_bps,
            "min_spread_bps ({}) must be below spread_bps ({})",
            s.min_spread_bps,
            s.spread_bps
        );
        anyhow::ensure!(
            s.spread_bps < Decimal::new(10000, 0),
            "spread_bps must be below 10000"
        );
        anyhow::ensure!(
            s.slippage_buffer_bps >= Decimal::ZERO && s.slippage_buffer_bps < Decimal::new(10000, 0),
            "slippage_buffer_bps must be between 0 and 10000"
        );
        anyhow::ensure!(
            s.max_order_age_secs > 0 && s.max_order_age_secs <= MAX_DURATION_SECS,
            "max_order_age_secs must be between 1 and {}",
            MAX_DURATION_SECS
        );
        anyhow::ensure!(
            s.maker_fee >= Decimal::ZERO && s.maker_fee < Decimal::ONE,
            "maker_fee must be in [0, 1)"
        );
        anyhow::ensure!(
            s.taker_fee >= Decimal::ZERO && s.taker_fee < Decimal::ONE,
            "taker_fee must be in [0, 1)"
        );
        anyhow::ensure!(
            s.min_order_amount >= Decimal::ZERO,
            "min_order_amount must not be negative"
        );
        anyhow::ensure!(
            self.maker.venue != self.taker.venue,
            "maker and taker venues must differ (both '{}')",
            self.maker.venue
        );
        for market in [&self.maker, &self.taker] {
            anyhow::ensure!(
                market.tick_size >= Decimal::ZERO && market.lot_size >= Decimal::ZERO,
                "tick_size and lot_size must not be negative for {}",
                market.venue
            );
            TradingPair::from_str(&market.pair)
                .with_context(|| format!("Invalid pair for venue {}", market.venue))?;
        }
        anyhow::ensure!(
            self.runtime.tick_interval_ms > 0,
            "tick_interval_ms must be positive"
        );
        anyhow::ensure!(self.archive.depth > 0, "archive depth must be positive");
        anyhow::ensure!(
            self.archive.flush_interval_secs <= MAX_DURATION_SECS,
            "archive flush_interval_secs must not exceed {}",
            MAX_DURATION_SECS
        );

        Ok(())
    }

    /// Validate and convert into the typed parameters the engine runs with.
    pub fn xemm_params(&self) -> Result<XemmParams> {
        self.validate()?;
        let s = &self.strategy;

        Ok(XemmParams {
            maker: MarketSpec::from_config(&self.maker)?,
            taker: MarketSpec::from_config(&self.taker)?,
            order_amount: s.order_amount,
            spread_bps: s.spread_bps,
            min_spread_bps: s.min_spread_bps,
            slippage_buffer_bps: s.slippage_buffer_bps,
            max_order_age: seconds(s.max_order_age_secs).context("Invalid max_order_age_secs")?,
            maker_fee: s.maker_fee,
            taker_fee: s.taker_fee,
            min_order_amount: s.min_order_amount,
            halt_on_unhedged_fill: s.halt_on_unhedged_fill,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            maker: default_maker_market(),
            taker: default_taker_market(),
            strategy: StrategyConfig::default(),
            runtime: RuntimeConfig::default(),
            archive: ArchiveConfig::default(),
            paper: PaperConfig::default(),
        }
    }
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            order_amount: default_order_amount(),
            spread_bps: default_spread_bps(),
            min_spread_bps: default_min_spread_bps(),
            slippage_buffer_bps: default_slippage_buffer_bps(),
            max_order_age_secs: default_max_order_age_secs(),
            maker_fee: default_fee(),
            taker_fee: default_fee(),
            min_order_amount: Decimal::ZERO,
            halt_on_unhedged_fill: false,
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            ledger_path: default_ledger_path(),
            status_every_ticks: default_status_every_ticks(),
        }
    }
}

impl ArchiveConfig {
    pub fn flush_interval(&self) -> Result<Duration> {
        seconds(self.flush_interval_secs).context("Invalid archive flush_interval_secs")
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: default_archive_path(),
            depth: default_archive_depth(),
            flush_interval_secs: default_archive_flush_secs(),
        }
    }
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            start_mid: default_start_mid(),
            half_spread_bps: default_half_spread_bps(),
            level_step_bps: default_level_step_bps(),
            levels: default_levels(),
            level_amount: default_level_amount(),
            drift_bps: default_drift_bps(),
            swing_ticks: default_swing_ticks(),
            maker_lag_ticks: default_maker_lag_ticks(),
            base_balance: default_base_balance(),
            quote_balance: default_quote_balance(),
        }
    }
}

/// A venue + pair the engine trades on.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketSpec {
    pub venue: VenueId,
    pub pair: TradingPair,
    pub tick_size: Decimal,
    pub lot_size: Decimal,
}

impl MarketSpec {
    fn from_config(market: &MarketConfig) -> Result<Self> {
        Ok(Self {
            venue: VenueId::new(market.venue.clone()),
            pair: TradingPair::from_str(&market.pair)?,
            tick_size: market.tick_size,
            lot_size: market.lot_size,
        })
    }
}

/// Validated, immutable run parameters for the XEMM engine.
#[derive(Debug, Clone, PartialEq)]
pub struct XemmParams {
    pub maker: MarketSpec,
    pub taker: MarketSpec,
    pub order_amount: Decimal,
    pub spread_bps: Decimal,
    pub min_spread_bps: Decimal,
    pub slippage_buffer_bps: Decimal,
    pub max_order_age: Duration,
    pub maker_fee: Decimal,
    pub taker_fee: Decimal,
    pub min_order_amount: Decimal,
    pub halt_on_unhedged_fill: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());

        let params = config.xemm_params().unwrap();
        assert_eq!(params.order_amount, dec!(500));
        assert_eq!(params.spread_bps, dec!(32));
        assert_eq!(params.min_spread_bps, dec!(22));
        assert_eq!(params.max_order_age, Duration::seconds(30));
        assert_eq!(params.maker.pair.quote, "USDT");
    }

    #[test]
    fn test_min_spread_must_be_below_spread() {
        let mut config = Config::default();
        config.strategy.min_spread_bps = dec!(32);
        assert!(config.validate().is_err());

        config.strategy.min_spread_bps = dec!(40);
        assert!(config.xemm_params().is_err());
    }

    #[test]
    fn test_rejects_degenerate_values() {
        let mut config = Config::default();
        config.strategy.order_amount = Decimal::ZERO;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.strategy.taker_fee = dec!(1.5);
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.taker.venue = config.maker.venue.clone();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.maker.pair = "DOGEUSDT".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_oversized_durations() {
        let mut config = Config::default();
        config.strategy.max_order_age_secs = 10_000_000_000_000_000;
        assert!(config.validate().is_err());
        assert!(config.xemm_params().is_err());

        config.strategy.max_order_age_secs = MAX_DURATION_SECS;
        let params = config.xemm_params().unwrap();
        assert_eq!(params.max_order_age, Duration::days(365));

        let mut config = Config::default();
        config.archive.flush_interval_secs = u64::MAX;
        assert!(config.validate().is_err());
        assert!(config.archive.flush_interval().is_err());
        assert_eq!(
            Config::default().archive.flush_interval().unwrap(),
            Duration::seconds(10)
        );
    }

    #[test]
    fn test_kraken_preset() {
        let preset: Preset = "kraken-binance-us".parse().unwrap();
        let config = Config::preset(preset);
        assert!(config.validate().is_ok());

        let params = config.xemm_params().unwrap();
        assert_eq!(params.taker.pair, TradingPair::new("DOGE", "USD"));
        assert_eq!(params.order_amount, dec!(60));
        assert_eq!(params.taker_fee, dec!(0.00075));
        assert_eq!(params.max_order_age, Duration::seconds(60));
    }

    #[test]
    fn test_unknown_preset() {
        assert!("binance_okx".parse::<Preset>().is_err());
    }
}
