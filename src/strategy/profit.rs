//! Fee-aware profit arithmetic.
//!
//! Convention: a position's cost basis is always fee-inclusive at write
//! time (the buy fee is folded into the weighted average when the fill is
//! recorded), so only the sell-side fee needs adjusting here.

use crate::error::{EngineError, Result};
use crate::models::FeeSchedule;

/// Lowest sell price that nets `desired_margin` after the sell fee.
///
/// Selling at this price yields proceeds of exactly
/// `cost_basis * (1 + desired_margin)` per unit. Pure and idempotent.
pub fn required_exit_price(
    cost_basis: f64,
    sell_fee_rate: f64,
    desired_margin: f64,
) -> Result<f64> {
    if sell_fee_rate >= 1.0 {
        return Err(EngineError::InvalidConfig(format!(
            "sell fee rate must be below 1.0, got {}",
            sell_fee_rate
        )));
    }
    if desired_margin < 0.0 {
        return Err(EngineError::InvalidConfig(format!(
            "desired margin must be >= 0, got {}",
            desired_margin
        )));
    }
    Ok(cost_basis * (1.0 + desired_margin) / (1.0 - sell_fee_rate))
}

/// Margin actually realized by selling at `sell_price`, net of the sell fee
pub fn realized_margin(cost_basis: f64, sell_price: f64, sell_fee_rate: f64) -> f64 {
    if cost_basis <= 0.0 {
        return 0.0;
    }
    let net_proceeds = sell_price * (1.0 - sell_fee_rate);
    (net_proceeds - cost_basis) / cost_basis
}

/// Margin that exactly covers the round-trip fees on a raw entry price
pub fn min_viable_margin(buy_fee_rate: f64, sell_fee_rate: f64) -> f64 {
    (buy_fee_rate + sell_fee_rate) / (1.0 - sell_fee_rate)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MarginCheck {
    Ok,
    /// Above fee drag but with little headroom; `suggested` carries a buffer
    Risky { suggested: f64 },
    TooLow { minimum: f64 },
}

/// Sanity-check a desired margin against the fee schedule
pub fn check_margin(desired_margin: f64, fees: &FeeSchedule) -> MarginCheck {
    let minimum = min_viable_margin(fees.maker_rate, fees.maker_rate);
    let suggested = minimum * 1.5;
    if desired_margin < minimum {
        MarginCheck::TooLow { minimum }
    } else if desired_margin < suggested {
        MarginCheck::Risky { suggested }
    } else {
        MarginCheck::Ok
    }
}
