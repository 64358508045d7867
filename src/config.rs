// Startup configuration: file + AUTOTP__ environment overrides

use std::path::Path;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::exchange::BinanceConfig;
use crate::indicators::TrendThresholds;
use crate::models::{Product, View};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    #[default]
    Grid,
    Daily,
    Scalping,
}

/// How open intents are sent to the venue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    #[default]
    Limit,
    Market,
}

/// Distances in price points between the live price and the stop/limit prices
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Gap {
    pub open_limit: f64,
    pub sl_stop: f64,
    pub sl_limit: f64,
    pub tp_stop: f64,
    pub tp_limit: f64,
}

impl Default for Gap {
    fn default() -> Self {
        Self {
            open_limit: 200.0,
            sl_stop: 100.0,
            sl_limit: 200.0,
            tp_stop: 200.0,
            tp_limit: 300.0,
        }
    }
}

/// Neutral band of the high/low ratio; entries need the ratio outside it
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HlBand {
    pub lower: f64,
    pub upper: f64,
}

impl Default for HlBand {
    fn default() -> Self {
        Self {
            lower: 0.1,
            upper: 0.9,
        }
    }
}

/// Per-run bot configuration, immutable once loaded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotParams {
    pub bot_id: i64,
    pub exchange: String,
    pub symbol: String,
    pub product: Product,
    pub strategy: StrategyKind,
    pub view: View,
    pub order_type: EntryKind,

    pub price_digits: u32,
    pub qty_digits: u32,
    pub base_qty: f64,
    pub quote_qty: f64,

    // Grid
    pub lower_price: f64,
    pub upper_price: f64,
    pub grids: u32,
    pub start_price: f64,
    /// Fractional band around a zone price treated as "already occupied"
    pub slippage: f64,
    /// Stop-loss distance in zone widths, 0 disables
    pub grid_sl: f64,
    /// Take-profit distance in zone widths, 0 disables
    pub grid_tp: f64,

    pub auto_sl: bool,
    pub auto_tp: bool,

    // Trend / volatility
    pub ma_timeframe: String,
    pub ma_period: usize,
    pub atr_sl: f64,
    pub atr_tp: f64,
    /// Minimum distance between two entries of the same side
    pub order_gap: f64,
    pub gap: Gap,

    // Time-based exits, 0 disables
    pub max_pending_secs: i64,
    pub time_sl_secs: i64,
    pub time_tp_secs: i64,

    pub hl_ratio_timeframe: String,
    pub hl_band: HlBand,
    pub trend: TrendThresholds,

    // Kill switches
    pub close_long: bool,
    pub close_short: bool,

    pub interval_secs: u64,
}

impl Default for BotParams {
    fn default() -> Self {
        Self {
            bot_id: 1,
            exchange: "BINANCE".to_string(),
            symbol: String::new(),
            product: Product::Spot,
            strategy: StrategyKind::Grid,
            view: View::Neutral,
            order_type: EntryKind::Limit,
            price_digits: 2,
            qty_digits: 4,
            base_qty: 0.0,
            quote_qty: 0.0,
            lower_price: 0.0,
            upper_price: 0.0,
            grids: 0,
            start_price: 0.0,
            slippage: 0.0,
            grid_sl: 0.0,
            grid_tp: 0.0,
            auto_sl: false,
            auto_tp: false,
            ma_timeframe: "1d".to_string(),
            ma_period: 8,
            atr_sl: 1.0,
            atr_tp: 1.0,
            order_gap: 0.0,
            gap: Gap::default(),
            max_pending_secs: 0,
            time_sl_secs: 0,
            time_tp_secs: 0,
            hl_ratio_timeframe: "1m".to_string(),
            hl_band: HlBand::default(),
            trend: TrendThresholds::default(),
            close_long: false,
            close_short: false,
            interval_secs: 3, // ~1 tick per 3s stays inside the venue request weight limit
        }
    }
}

impl BotParams {
    /// Reject configurations that must never reach the tick loop
    pub fn validate(&self) -> Result<()> {
        if self.symbol.trim().is_empty() {
            return Err(Error::Config("bot.symbol is required".to_string()));
        }
        if self.base_qty <= 0.0 && self.quote_qty <= 0.0 {
            return Err(Error::Config(
                "bot.base_qty or bot.quote_qty must be positive".to_string(),
            ));
        }
        if self.strategy == StrategyKind::Grid {
            if self.upper_price <= self.lower_price {
                return Err(Error::Config(format!(
                    "bot.upper_price ({}) must be above bot.lower_price ({})",
                    self.upper_price, self.lower_price
                )));
            }
            if self.grids < 2 {
                return Err(Error::Config(format!(
                    "bot.grids must be at least 2, got {}",
                    self.grids
                )));
            }
        }
        if self.hl_band.lower >= self.hl_band.upper {
            return Err(Error::Config(format!(
                "bot.hl_band.lower ({}) must be below bot.hl_band.upper ({})",
                self.hl_band.lower, self.hl_band.upper
            )));
        }
        if self.strategy != StrategyKind::Grid && self.ma_period < 2 {
            return Err(Error::Config("bot.ma_period must be at least 2".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Postgres URL; the in-memory store is used when absent
    pub url: Option<String>,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub filter: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "autotp=info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub bot: BotParams,
    pub exchange: BinanceConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load `path` (YAML or TOML by extension), then apply `AUTOTP_*` overrides,
    /// e.g. `AUTOTP_EXCHANGE__API_KEY`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let builder = Config::builder()
            .set_default("database.max_connections", 5)?
            .add_source(File::from(path.as_ref()))
            .add_source(
                Environment::with_prefix("AUTOTP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        let config: AppConfig = builder.build()?.try_deserialize()?;
        config.bot.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tokio_test::{assert_err, assert_ok};

    fn grid_params() -> BotParams {
        BotParams {
            symbol: "BNBUSDT".to_string(),
            base_qty: 0.1,
            lower_price: 500.0,
            upper_price: 800.0,
            grids: 60,
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_grid_params() {
        assert_ok!(grid_params().validate());
    }

    #[test]
    fn test_inverted_bounds_rejected() {
        let params = BotParams {
            lower_price: 800.0,
            upper_price: 500.0,
            ..grid_params()
        };
        assert_err!(params.validate());
    }

    #[test]
    fn test_too_few_grids_rejected() {
        let params = BotParams {
            grids: 1,
            ..grid_params()
        };
        assert_err!(params.validate());
    }

    #[test]
    fn test_zero_quantities_rejected() {
        let params = BotParams {
            base_qty: 0.0,
            quote_qty: 0.0,
            ..grid_params()
        };
        assert_err!(params.validate());

        let params = BotParams {
            base_qty: 0.0,
            quote_qty: 50.0,
            ..grid_params()
        };
        assert_ok!(params.validate());
    }

    #[test]
    fn test_grid_bounds_ignored_for_trend_strategies() {
        let params = BotParams {
            strategy: StrategyKind::Daily,
            symbol: "BTCUSDT".to_string(),
            base_qty: 0.001,
            ..Default::default()
        };
        assert_ok!(params.validate());
    }

    #[test]
    fn test_inverted_hl_band_rejected() {
        let params = BotParams {
            hl_band: HlBand {
                lower: 0.9,
                upper: 0.1,
            },
            ..grid_params()
        };
        assert_err!(params.validate());
    }

    #[test]
    fn test_load_yaml_with_view_alias() {
        let path = std::env::temp_dir().join(format!("autotp-config-{}.yaml", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "bot:\n  symbol: BNBUSDT\n  view: L\n  base_qty: 0.1\n  lower_price: 500\n  upper_price: 800\n  grids: 60\n  gap:\n    open_limit: 50\nlogging:\n  json: true"
        )
        .unwrap();

        let config = AppConfig::load(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.bot.view, View::Long);
        assert_eq!(config.bot.grids, 60);
        assert_eq!(config.bot.gap.open_limit, 50.0);
        // Unset gap fields keep their defaults
        assert_eq!(config.bot.gap.tp_limit, 300.0);
        assert!(config.logging.json);
        assert!(config.database.url.is_none());
        assert_eq!(config.database.max_connections, 5);
    }

    #[test]
    fn test_env_overrides_file() {
        let path = std::env::temp_dir().join(format!("autotp-env-{}.yaml", std::process::id()));
        std::fs::write(
            &path,
            "bot:\n  symbol: BNBUSDT\n  base_qty: 0.1\n  lower_price: 500\n  upper_price: 800\n  grids: 60\n",
        )
        .unwrap();

        std::env::set_var("AUTOTP_BOT__SYMBOL", "ETHUSDT");
        std::env::set_var("AUTOTP_EXCHANGE__API_KEY", "key-from-env");
        let result = AppConfig::load(&path);
        std::env::remove_var("AUTOTP_BOT__SYMBOL");
        std::env::remove_var("AUTOTP_EXCHANGE__API_KEY");
        std::fs::remove_file(&path).ok();

        let config = assert_ok!(result);
        assert_eq!(config.bot.symbol, "ETHUSDT");
        assert_eq!(config.exchange.api_key, "key-from-env");
        assert_eq!(config.bot.grids, 60);
    }

    #[test]
    fn test_load_rejects_invalid_config() {
        let path = std::env::temp_dir().join(format!("autotp-bad-{}.toml", std::process::id()));
        std::fs::write(&path, "[bot]\nsymbol = \"BNBUSDT\"\nbase_qty = 0.1\ngrids = 1\n").unwrap();

        let result = AppConfig::load(&path);
        std::fs::remove_file(&path).ok();
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
