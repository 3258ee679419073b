use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::models::FeeSchedule;
use crate::strategy::profit;

/// Strategy parameters for one trading pair.
///
/// Loaded from environment variables at startup (see [`StrategyConfig::from_env`]);
/// validation failures are fatal at startup, never recovered mid-run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub symbol: String,
    /// Desired profit fraction on top of the fee-inclusive cost basis (0.005 = 0.5%)
    pub min_profit_margin: f64,
    /// Price drop from the last fill that triggers an averaging addition
    pub averaging_trigger_pct: f64,
    /// Multiplier applied to each successive addition's notional
    pub averaging_size_growth: f64,
    pub max_position_additions: u32,
    /// Book levels summed when judging depth at the touch
    pub order_book_depth_window: usize,
    /// Unfilled orders older than this are cancelled and re-evaluated
    pub stale_order_timeout_secs: u64,
    /// Quote-currency notional of the initial entry and the averaging base unit
    pub base_order_notional: f64,
    /// Smallest order the venue accepts, in quote currency
    pub min_order_notional: f64,
    pub tick_size: f64,
    /// Touch size below which the book is considered thin
    pub thin_depth_threshold: f64,
    /// Snapshots older than this cause the cycle to be skipped
    pub max_snapshot_age_secs: u64,
    /// Fraction of quote balance kept back from averaging additions
    pub capital_reserve_pct: f64,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            symbol: "BTC-USDT".to_string(),
            min_profit_margin: 0.005,
            averaging_trigger_pct: 0.005,
            averaging_size_growth: 1.5,
            max_position_additions: 5,
            order_book_depth_window: 5,
            stale_order_timeout_secs: 300,
            base_order_notional: 100.0,
            min_order_notional: 10.0,
            tick_size: 0.01,
            thin_depth_threshold: 0.05,
            max_snapshot_age_secs: 30,
            capital_reserve_pct: 0.05,
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

impl StrategyConfig {
    /// Build from `PROFITBOT_*` environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            symbol: std::env::var("PROFITBOT_SYMBOL").unwrap_or(d.symbol),
            min_profit_margin: env_or("PROFITBOT_MIN_PROFIT_MARGIN", d.min_profit_margin),
            averaging_trigger_pct: env_or(
                "PROFITBOT_AVERAGING_TRIGGER_PCT",
                d.averaging_trigger_pct,
            ),
            averaging_size_growth: env_or(
                "PROFITBOT_AVERAGING_SIZE_GROWTH",
                d.averaging_size_growth,
            ),
            max_position_additions: env_or(
                "PROFITBOT_MAX_POSITION_ADDITIONS",
                d.max_position_additions,
            ),
            order_book_depth_window: env_or("PROFITBOT_DEPTH_WINDOW", d.order_book_depth_window),
            stale_order_timeout_secs: env_or(
                "PROFITBOT_STALE_ORDER_TIMEOUT_SECS",
                d.stale_order_timeout_secs,
            ),
            base_order_notional: env_or("PROFITBOT_BASE_ORDER_NOTIONAL", d.base_order_notional),
            min_order_notional: env_or("PROFITBOT_MIN_ORDER_NOTIONAL", d.min_order_notional),
            tick_size: env_or("PROFITBOT_TICK_SIZE", d.tick_size),
            thin_depth_threshold: env_or("PROFITBOT_THIN_DEPTH_THRESHOLD", d.thin_depth_threshold),
            max_snapshot_age_secs: env_or(
                "PROFITBOT_MAX_SNAPSHOT_AGE_SECS",
                d.max_snapshot_age_secs,
            ),
            capital_reserve_pct: env_or("PROFITBOT_CAPITAL_RESERVE_PCT", d.capital_reserve_pct),
        }
    }

    /// Validate parameters against the session fee schedule.
    ///
    /// Malformed values are fatal. A margin that clears validation but sits
    /// under 1.5x the round-trip fee drag only gets a warning.
    pub fn validate(&self, fees: &FeeSchedule) -> Result<()> {
        if self.symbol.is_empty() {
            return Err(EngineError::InvalidConfig("symbol is empty".to_string()));
        }
        if self.min_profit_margin < 0.0 {
            return Err(EngineError::InvalidConfig(format!(
                "min_profit_margin must be >= 0, got {}",
                self.min_profit_margin
            )));
        }
        if !(0.0..1.0).contains(&self.averaging_trigger_pct) || self.averaging_trigger_pct == 0.0 {
            return Err(EngineError::InvalidConfig(format!(
                "averaging_trigger_pct must be in (0, 1), got {}",
                self.averaging_trigger_pct
            )));
        }
        if self.averaging_size_growth < 1.0 {
            return Err(EngineError::InvalidConfig(format!(
                "averaging_size_growth must be >= 1, got {}",
                self.averaging_size_growth
            )));
        }
        if self.base_order_notional <= 0.0 || self.min_order_notional <= 0.0 {
            return Err(EngineError::InvalidConfig(
                "order notionals must be positive".to_string(),
            ));
        }
        if self.tick_size <= 0.0 {
            return Err(EngineError::InvalidConfig(format!(
                "tick_size must be positive, got {}",
                self.tick_size
            )));
        }
        if self.order_book_depth_window == 0 {
            return Err(EngineError::InvalidConfig(
                "order_book_depth_window must be at least 1".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.capital_reserve_pct) {
            return Err(EngineError::InvalidConfig(format!(
                "capital_reserve_pct must be in [0, 1), got {}",
                self.capital_reserve_pct
            )));
        }
        if fees.maker_rate >= 1.0 || fees.taker_rate >= 1.0 {
            return Err(EngineError::InvalidConfig(format!(
                "fee rates must be below 1.0, got maker {} / taker {}",
                fees.maker_rate, fees.taker_rate
            )));
        }

        match profit::check_margin(self.min_profit_margin, fees) {
            profit::MarginCheck::Ok => {}
            profit::MarginCheck::Risky { suggested } => {
                tracing::warn!(
                    "profit margin {:.4}% barely clears the round-trip fee drag; \
                     {:.4}% or more leaves headroom for price noise",
                    self.min_profit_margin * 100.0,
                    suggested * 100.0
                );
            }
            profit::MarginCheck::TooLow { minimum } => {
                // The fee-inclusive floor still protects each exit; a margin
                // under the raw fee drag just means exits stall often
                tracing::warn!(
                    "profit margin {:.4}% is under the round-trip fee drag {:.4}%",
                    self.min_profit_margin * 100.0,
                    minimum * 100.0
                );
            }
        }
        Ok(())
    }
}

/// Session fee schedule from environment variables, default 0.1%/0.1%
pub fn load_fee_schedule() -> FeeSchedule {
    FeeSchedule {
        maker_rate: env_or("PROFITBOT_MAKER_FEE_RATE", 0.001),
        taker_rate: env_or("PROFITBOT_TAKER_FEE_RATE", 0.001),
    }
}
