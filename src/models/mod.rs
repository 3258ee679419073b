use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One price level in the order book
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BookLevel {
    pub price: f64,
    pub size: f64,
}

/// Consistent, timestamped view of the order book at one instant.
///
/// Produced by the market-data collaborator, consumed read-only by the
/// decision loop. One snapshot per cycle; the engine never observes a
/// half-updated book.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub best_bid: f64,
    pub best_ask: f64,
    /// Bids sorted by price descending (best first)
    pub bids: Vec<BookLevel>,
    /// Asks sorted by price ascending (best first)
    pub asks: Vec<BookLevel>,
    pub timestamp: DateTime<Utc>,
}

impl MarketSnapshot {
    pub fn spread(&self) -> f64 {
        self.best_ask - self.best_bid
    }

    pub fn mid(&self) -> f64 {
        (self.best_ask + self.best_bid) / 2.0
    }

    /// Zero or inverted spread means the snapshot cannot be priced against
    pub fn is_crossed(&self) -> bool {
        self.best_bid <= 0.0 || self.best_ask <= 0.0 || self.best_ask <= self.best_bid
    }

    /// Total bid size across the top `levels` of the book
    pub fn bid_depth(&self, levels: usize) -> f64 {
        self.bids.iter().take(levels).map(|l| l.size).sum()
    }

    /// Total ask size across the top `levels` of the book
    pub fn ask_depth(&self, levels: usize) -> f64 {
        self.asks.iter().take(levels).map(|l| l.size).sum()
    }

    pub fn age_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.timestamp).num_seconds()
    }
}

/// Maker/taker fee rates as decimal fractions. Static per session; the
/// exchange collaborator may refresh them between sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeSchedule {
    pub maker_rate: f64,
    pub taker_rate: f64,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            maker_rate: 0.001,
            taker_rate: 0.001,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Side {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FeeType {
    Maker,
    Taker,
}

/// An order the engine wants placed. Consumed by the order router and
/// destroyed once acknowledged filled, cancelled, or rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderIntent {
    pub id: Uuid,
    pub symbol: String,
    pub side: Side,
    pub price: f64,
    pub quantity: f64,
    /// Fee the placement logic expects this order to earn
    pub fee_type: FeeType,
    /// Correlation back to the originating position; None for an initial
    /// entry, where the position is only created on fill
    pub position_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl OrderIntent {
    pub fn new(
        symbol: &str,
        side: Side,
        price: f64,
        quantity: f64,
        position_id: Option<Uuid>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            side,
            price,
            quantity,
            fee_type: FeeType::Maker,
            position_id,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CancelIntent {
    pub order_id: Uuid,
}

/// Confirmed execution reported back by the venue (or the simulator)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillEvent {
    pub order_id: Uuid,
    pub side: Side,
    pub price: f64,
    pub quantity: f64,
    /// Fee rate actually charged on this fill
    pub fee_rate: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OrderState {
    Open,
    Cancelled,
    Rejected,
    Filled,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OrderStatusEvent {
    pub order_id: Uuid,
    pub state: OrderState,
}
