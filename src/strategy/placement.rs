//! Order-book-aware limit pricing.
//!
//! Every placement stays on the passive side of the book: crossing the
//! spread turns a maker order into a taker order, and the never-lose floor
//! is computed on maker fees.

use crate::config::StrategyConfig;
use crate::error::{EngineError, Result};
use crate::models::{FeeType, MarketSnapshot, Side};

/// How much fill-probability to trade away for queue position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Urgency {
    /// Rest passively, improve inside the spread when it is wide
    Low,
    /// Quote at the touch for the fastest maker fill
    High,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub price: f64,
    pub fee_type: FeeType,
}

/// Fraction of a wide spread conceded from the touch toward the other side
const WIDE_SPREAD_STEP: f64 = 0.3;

/// Spread below this percentage of the bid counts as tight
const TIGHT_SPREAD_PCT: f64 = 0.1;

/// Best passive limit price for `side` given the current book.
///
/// Fails with `StaleMarketData` on a zero or inverted spread; the caller
/// skips the decision cycle rather than placing against a bad book.
pub fn optimal_limit_price(
    snapshot: &MarketSnapshot,
    side: Side,
    urgency: Urgency,
    config: &StrategyConfig,
) -> Result<Placement> {
    if snapshot.is_crossed() {
        return Err(EngineError::StaleMarketData(format!(
            "bid {} / ask {} at {}",
            snapshot.best_bid, snapshot.best_ask, snapshot.timestamp
        )));
    }

    let spread = snapshot.spread();
    let spread_pct = spread / snapshot.best_bid * 100.0;
    let tick = config.tick_size;

    let raw = match side {
        Side::Sell => {
            if urgency == Urgency::High {
                snapshot.best_ask
            } else if snapshot.ask_depth(config.order_book_depth_window)
                < config.thin_depth_threshold
            {
                // Thin offer side: one tick behind the touch instead of
                // competing at a level likely to be front-run
                snapshot.best_ask + tick
            } else if spread_pct < TIGHT_SPREAD_PCT {
                snapshot.best_ask - tick
            } else {
                snapshot.best_ask - spread * WIDE_SPREAD_STEP
            }
        }
        Side::Buy => {
            if urgency == Urgency::High {
                snapshot.best_bid
            } else if snapshot.bid_depth(config.order_book_depth_window)
                < config.thin_depth_threshold
            {
                snapshot.best_bid - tick
            } else if spread_pct < TIGHT_SPREAD_PCT {
                snapshot.best_bid + tick
            } else {
                snapshot.best_bid + spread * WIDE_SPREAD_STEP
            }
        }
    };

    // Maker discipline: clamp inside the book, never across it
    let price = match side {
        Side::Sell => raw.max(snapshot.best_bid + tick),
        Side::Buy => raw.min(snapshot.best_ask - tick),
    };

    Ok(Placement {
        price,
        fee_type: FeeType::Maker,
    })
}
