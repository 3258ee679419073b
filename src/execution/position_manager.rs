use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::models::{FeeSchedule, FillEvent, Side};
use crate::strategy::profit;

/// Position lifecycle: Open -> PendingSell -> Closed.
///
/// PendingSell reverts to Open when the resting sell is cancelled or times
/// out; Open keeps absorbing buy fills (averaging) without a sub-state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionState {
    Open,
    PendingSell,
    Closed,
}

/// One consolidated holding per instrument, recomputed via fee-inclusive
/// weighted average on every buy fill.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    pub symbol: String,
    pub quantity: f64,
    /// Fee-inclusive weighted-average price paid per unit
    pub cost_basis: f64,
    /// Cumulative fees paid on entry fills
    pub entry_fees: f64,
    /// Averaging additions made after the initial fill
    pub additions: u32,
    /// Price of the most recent buy fill; averaging triggers key off this
    pub last_fill_price: f64,
    pub state: PositionState,
    pub opened_at: DateTime<Utc>,
    /// Order id of the outstanding sell, if any
    pub pending_sell: Option<Uuid>,
    pub exit_price: Option<f64>,
    pub closed_at: Option<DateTime<Utc>>,
    pub realized_pnl: Option<f64>,
}

impl Position {
    pub fn is_live(&self) -> bool {
        self.state != PositionState::Closed
    }
}

/// Owns every position and all mutation of them. Quantity and cost basis
/// change only on confirmed fills, never speculatively.
pub struct PositionManager {
    positions: Vec<Position>,
    fees: FeeSchedule,
    min_profit_margin: f64,
    total_realized_pnl: f64,
}

impl PositionManager {
    pub fn new(fees: FeeSchedule, min_profit_margin: f64) -> Self {
        Self {
            positions: Vec::new(),
            fees,
            min_profit_margin,
            total_realized_pnl: 0.0,
        }
    }

    /// Restore from externally checkpointed positions.
    ///
    /// Orders do not survive a restart, so a position checkpointed in
    /// PendingSell reverts to Open and gets its sell re-quoted against the
    /// current book on the first cycle.
    pub fn with_positions(
        fees: FeeSchedule,
        min_profit_margin: f64,
        mut positions: Vec<Position>,
    ) -> Self {
        for pos in &mut positions {
            if pos.state == PositionState::PendingSell {
                tracing::warn!(
                    "restored {} with a sell outstanding; reverting to Open for re-quoting",
                    pos.symbol
                );
                pos.state = PositionState::Open;
                pos.pending_sell = None;
            }
        }

        let total_realized_pnl: f64 = positions.iter().filter_map(|p| p.realized_pnl).sum();

        tracing::info!(
            "restored {} positions (realized P&L: {:.2})",
            positions.len(),
            total_realized_pnl
        );

        Self {
            positions,
            fees,
            min_profit_margin,
            total_realized_pnl,
        }
    }

    /// Apply a confirmed fill.
    ///
    /// Buys open or grow the consolidated position for `symbol`, folding
    /// the fee into the weighted-average basis and bumping the addition
    /// counter past the first fill. Sells must match the outstanding sell
    /// order and close the position. Returns the affected position id.
    pub fn record_fill(&mut self, symbol: &str, fill: &FillEvent) -> Result<Uuid> {
        match fill.side {
            Side::Buy => self.record_buy(symbol, fill),
            Side::Sell => self.record_sell(fill),
        }
    }

    fn record_buy(&mut self, symbol: &str, fill: &FillEvent) -> Result<Uuid> {
        let gross = fill.price * fill.quantity;
        let fee = gross * fill.fee_rate;

        if let Some(pos) = self
            .positions
            .iter_mut()
            .find(|p| p.symbol == symbol && p.is_live())
        {
            let total_cost = pos.cost_basis * pos.quantity + gross + fee;
            pos.quantity += fill.quantity;
            pos.cost_basis = total_cost / pos.quantity;
            pos.entry_fees += fee;
            pos.additions += 1;
            pos.last_fill_price = fill.price;

            tracing::info!(
                "averaged into {}: +{:.8} @ {:.2} (basis {:.2}, qty {:.8}, additions {})",
                symbol,
                fill.quantity,
                fill.price,
                pos.cost_basis,
                pos.quantity,
                pos.additions
            );
            return Ok(pos.id);
        }

        let position = Position {
            id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            quantity: fill.quantity,
            cost_basis: (gross + fee) / fill.quantity,
            entry_fees: fee,
            additions: 0,
            last_fill_price: fill.price,
            state: PositionState::Open,
            opened_at: fill.timestamp,
            pending_sell: None,
            exit_price: None,
            closed_at: None,
            realized_pnl: None,
        };
        let id = position.id;

        tracing::info!(
            "opened {}: {:.8} @ {:.2} (fee-inclusive basis {:.2})",
            symbol,
            fill.quantity,
            fill.price,
            position.cost_basis
        );

        self.positions.push(position);
        Ok(id)
    }

    fn record_sell(&mut self, fill: &FillEvent) -> Result<Uuid> {
        let pos = self
            .positions
            .iter_mut()
            .find(|p| p.pending_sell == Some(fill.order_id))
            .ok_or_else(|| {
                EngineError::InvalidState(format!(
                    "sell fill for order {} matches no outstanding sell",
                    fill.order_id
                ))
            })?;

        let gross = fill.price * fill.quantity;
        let fee = gross * fill.fee_rate;
        let pnl = gross - fee - pos.cost_basis * fill.quantity;

        pos.quantity -= fill.quantity;
        pos.realized_pnl = Some(pos.realized_pnl.unwrap_or(0.0) + pnl);
        self.total_realized_pnl += pnl;

        if pos.quantity <= 1e-12 {
            pos.quantity = 0.0;
            pos.state = PositionState::Closed;
            pos.pending_sell = None;
            pos.exit_price = Some(fill.price);
            pos.closed_at = Some(fill.timestamp);

            tracing::info!(
                "closed {}: {:.8} @ {:.2} (net P&L {:+.2})",
                pos.symbol,
                fill.quantity,
                fill.price,
                pos.realized_pnl.unwrap_or(pnl)
            );
        } else {
            // Partial fill: the remainder keeps resting at the venue, so
            // the position stays PendingSell under the same order
            tracing::info!(
                "partial exit {}: {:.8} @ {:.2}, {:.8} still resting",
                pos.symbol,
                fill.quantity,
                fill.price,
                pos.quantity
            );
        }
        Ok(pos.id)
    }

    /// Never-lose floor for this position under the session fee schedule
    pub fn required_exit_price(&self, position: &Position) -> Result<f64> {
        profit::required_exit_price(
            position.cost_basis,
            self.fees.maker_rate,
            self.min_profit_margin,
        )
    }

    /// Transition Open -> PendingSell, registering the outstanding order.
    ///
    /// Fails with `PriceBelowFloor` if `price` is under the never-lose
    /// floor; the floor is never overridden.
    pub fn request_sell(
        &mut self,
        position_id: Uuid,
        price: f64,
        quantity: f64,
        order_id: Uuid,
    ) -> Result<()> {
        let floor = {
            let pos = self.position(position_id)?;
            match pos.state {
                PositionState::Open => {}
                PositionState::PendingSell => {
                    return Err(EngineError::InvalidState(
                        "a sell is already outstanding for this position".to_string(),
                    ))
                }
                PositionState::Closed => {
                    return Err(EngineError::InvalidState(
                        "position is already closed".to_string(),
                    ))
                }
            }
            if quantity > pos.quantity + 1e-12 {
                return Err(EngineError::InvalidState(format!(
                    "sell quantity {} exceeds position quantity {}",
                    quantity, pos.quantity
                )));
            }
            self.required_exit_price(pos)?
        };

        if price < floor {
            return Err(EngineError::PriceBelowFloor { price, floor });
        }

        let pos = self.position_mut(position_id)?;
        pos.state = PositionState::PendingSell;
        pos.pending_sell = Some(order_id);
        Ok(())
    }

    /// Revert PendingSell -> Open after a cancel acknowledgement
    pub fn on_sell_cancelled(&mut self, position_id: Uuid) -> Result<()> {
        let pos = self.position_mut(position_id)?;
        match pos.state {
            PositionState::PendingSell => {
                pos.state = PositionState::Open;
                pos.pending_sell = None;
                Ok(())
            }
            // Cancel acks can race a prior revert; nothing to undo
            PositionState::Open => Ok(()),
            PositionState::Closed => Err(EngineError::InvalidState(
                "cannot revert a closed position".to_string(),
            )),
        }
    }

    /// Stale-order path: identical to a cancel, re-evaluated next cycle
    pub fn on_sell_timeout(&mut self, position_id: Uuid) -> Result<()> {
        self.on_sell_cancelled(position_id)
    }

    pub fn position(&self, position_id: Uuid) -> Result<&Position> {
        self.positions
            .iter()
            .find(|p| p.id == position_id)
            .ok_or(EngineError::PositionNotFound(position_id))
    }

    fn position_mut(&mut self, position_id: Uuid) -> Result<&mut Position> {
        self.positions
            .iter_mut()
            .find(|p| p.id == position_id)
            .ok_or(EngineError::PositionNotFound(position_id))
    }

    /// Position whose outstanding sell order has this id
    pub fn position_by_sell_order(&self, order_id: Uuid) -> Option<&Position> {
        self.positions
            .iter()
            .find(|p| p.pending_sell == Some(order_id))
    }

    /// Live (Open or PendingSell) position for the instrument
    pub fn get_open_position(&self, symbol: &str) -> Option<&Position> {
        self.positions
            .iter()
            .find(|p| p.symbol == symbol && p.is_live())
    }

    pub fn open_positions(&self) -> Vec<&Position> {
        self.positions.iter().filter(|p| p.is_live()).collect()
    }

    /// All positions, open and closed, for checkpointing
    pub fn positions(&self) -> &[Position] {
        &self.positions
    }

    /// Shutdown is terminal only when this holds
    pub fn all_closed(&self) -> bool {
        self.positions.iter().all(|p| !p.is_live())
    }

    pub fn total_realized_pnl(&self) -> f64 {
        self.total_realized_pnl
    }

    /// Unrealized P&L of live positions against the given prices, net of
    /// the sell fee that closing would incur
    pub fn unrealized_pnl(&self, prices: &HashMap<String, f64>) -> f64 {
        self.positions
            .iter()
            .filter(|p| p.is_live())
            .filter_map(|p| {
                prices.get(&p.symbol).map(|&price| {
                    price * p.quantity * (1.0 - self.fees.maker_rate) - p.cost_basis * p.quantity
                })
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn buy_fill(price: f64, quantity: f64) -> FillEvent {
        FillEvent {
            order_id: Uuid::new_v4(),
            side: Side::Buy,
            price,
            quantity,
            fee_rate: 0.001,
            timestamp: Utc::now(),
        }
    }

    fn sell_fill(order_id: Uuid, price: f64, quantity: f64) -> FillEvent {
        FillEvent {
            order_id,
            side: Side::Sell,
            price,
            quantity,
            fee_rate: 0.001,
            timestamp: Utc::now(),
        }
    }

    fn manager() -> PositionManager {
        PositionManager::new(FeeSchedule::default(), 0.01)
    }

    #[test]
    fn test_first_fill_opens_with_fee_inclusive_basis() {
        let mut pm = manager();
        let id = pm.record_fill("BTC-USDT", &buy_fill(100.0, 0.01)).unwrap();

        let pos = pm.position(id).unwrap();
        assert_eq!(pos.state, PositionState::Open);
        assert_eq!(pos.quantity, 0.01);
        assert!((pos.cost_basis - 100.1).abs() < 1e-9); // 100 * 1.001
        assert_eq!(pos.additions, 0);
        assert_eq!(pos.last_fill_price, 100.0);
    }

    #[test]
    fn test_averaging_fill_recomputes_weighted_basis() {
        let mut pm = manager();
        let id = pm.record_fill("BTC-USDT", &buy_fill(100.0, 0.01)).unwrap();
        let id2 = pm.record_fill("BTC-USDT", &buy_fill(90.0, 0.01)).unwrap();
        assert_eq!(id, id2, "buys consolidate into one position");

        let pos = pm.position(id).unwrap();
        assert_eq!(pos.quantity, 0.02);
        // (100 * 0.01 + 90 * 0.01) * 1.001 / 0.02
        assert!((pos.cost_basis - 95.095).abs() < 1e-9);
        assert_eq!(pos.additions, 1);
        assert_eq!(pos.last_fill_price, 90.0);
        assert_eq!(pos.state, PositionState::Open);
    }

    #[test]
    fn test_request_sell_below_floor_rejected() {
        let mut pm = manager();
        let id = pm.record_fill("BTC-USDT", &buy_fill(100.0, 0.01)).unwrap();
        let floor = {
            let pos = pm.position(id).unwrap();
            pm.required_exit_price(pos).unwrap()
        };

        let result = pm.request_sell(id, floor - 0.01, 0.01, Uuid::new_v4());
        assert!(matches!(result, Err(EngineError::PriceBelowFloor { .. })));

        // Still Open, no outstanding sell
        let pos = pm.position(id).unwrap();
        assert_eq!(pos.state, PositionState::Open);
        assert!(pos.pending_sell.is_none());
    }

    #[test]
    fn test_sell_lifecycle() {
        let mut pm = manager();
        let id = pm.record_fill("BTC-USDT", &buy_fill(100.0, 0.01)).unwrap();
        let floor = pm.required_exit_price(pm.position(id).unwrap()).unwrap();

        let order_id = Uuid::new_v4();
        pm.request_sell(id, floor, 0.01, order_id).unwrap();
        assert_eq!(pm.position(id).unwrap().state, PositionState::PendingSell);

        // Duplicate sell rejected while one is outstanding
        let result = pm.request_sell(id, floor, 0.01, Uuid::new_v4());
        assert!(matches!(result, Err(EngineError::InvalidState(_))));

        pm.record_fill("BTC-USDT", &sell_fill(order_id, floor, 0.01))
            .unwrap();
        let pos = pm.position(id).unwrap();
        assert_eq!(pos.state, PositionState::Closed);
        assert_eq!(pos.exit_price, Some(floor));
        // Selling at the floor nets exactly the configured margin
        let expected_pnl = pos.cost_basis * 0.01 * 0.01;
        assert!((pos.realized_pnl.unwrap() - expected_pnl).abs() < 1e-9);
        assert!(pm.all_closed());
        assert!(pm.total_realized_pnl() > 0.0);
    }

    #[test]
    fn test_timeout_reverts_to_open() {
        let mut pm = manager();
        let id = pm.record_fill("BTC-USDT", &buy_fill(100.0, 0.01)).unwrap();
        let floor = pm.required_exit_price(pm.position(id).unwrap()).unwrap();
        pm.request_sell(id, floor, 0.01, Uuid::new_v4()).unwrap();

        pm.on_sell_timeout(id).unwrap();
        let pos = pm.position(id).unwrap();
        assert_eq!(pos.state, PositionState::Open);
        assert!(pos.pending_sell.is_none());

        // Revert is idempotent against a racing cancel ack
        pm.on_sell_cancelled(id).unwrap();
        assert_eq!(pm.position(id).unwrap().state, PositionState::Open);
    }

    #[test]
    fn test_sell_fill_without_outstanding_order_rejected() {
        let mut pm = manager();
        pm.record_fill("BTC-USDT", &buy_fill(100.0, 0.01)).unwrap();

        let result = pm.record_fill("BTC-USDT", &sell_fill(Uuid::new_v4(), 110.0, 0.01));
        assert!(matches!(result, Err(EngineError::InvalidState(_))));
    }

    #[test]
    fn test_buy_after_close_opens_fresh_position() {
        let mut pm = manager();
        let id = pm.record_fill("BTC-USDT", &buy_fill(100.0, 0.01)).unwrap();
        let floor = pm.required_exit_price(pm.position(id).unwrap()).unwrap();
        let order_id = Uuid::new_v4();
        pm.request_sell(id, floor, 0.01, order_id).unwrap();
        pm.record_fill("BTC-USDT", &sell_fill(order_id, floor, 0.01))
            .unwrap();

        let id2 = pm.record_fill("BTC-USDT", &buy_fill(95.0, 0.01)).unwrap();
        assert_ne!(id, id2);
        let pos = pm.position(id2).unwrap();
        assert_eq!(pos.additions, 0);
        assert!((pos.cost_basis - 95.0 * 1.001).abs() < 1e-9);
    }

    #[test]
    fn test_unrealized_pnl_net_of_sell_fee() {
        let mut pm = manager();
        pm.record_fill("BTC-USDT", &buy_fill(100.0, 1.0)).unwrap();

        let mut prices = HashMap::new();
        prices.insert("BTC-USDT".to_string(), 110.0);

        // 110 * (1 - 0.001) - 100.1
        let pnl = pm.unrealized_pnl(&prices);
        assert!((pnl - (109.89 - 100.1)).abs() < 1e-9);
    }

    #[test]
    fn test_restore_from_checkpoint() {
        let mut pm = manager();
        let id = pm.record_fill("BTC-USDT", &buy_fill(100.0, 0.01)).unwrap();
        let floor = pm.required_exit_price(pm.position(id).unwrap()).unwrap();
        let order_id = Uuid::new_v4();
        pm.request_sell(id, floor, 0.01, order_id).unwrap();
        pm.record_fill("BTC-USDT", &sell_fill(order_id, floor, 0.01))
            .unwrap();

        let restored = PositionManager::with_positions(
            FeeSchedule::default(),
            0.01,
            pm.positions().to_vec(),
        );
        assert!((restored.total_realized_pnl() - pm.total_realized_pnl()).abs() < 1e-12);
        assert!(restored.all_closed());
    }

    #[test]
    fn test_restore_reverts_outstanding_sells() {
        let mut pm = manager();
        let id = pm.record_fill("BTC-USDT", &buy_fill(100.0, 0.01)).unwrap();
        let floor = pm.required_exit_price(pm.position(id).unwrap()).unwrap();
        pm.request_sell(id, floor, 0.01, Uuid::new_v4()).unwrap();

        // The checkpointed sell order does not exist in the new session;
        // the position must come back ready for a fresh sell
        let restored = PositionManager::with_positions(
            FeeSchedule::default(),
            0.01,
            pm.positions().to_vec(),
        );
        let pos = restored.position(id).unwrap();
        assert_eq!(pos.state, PositionState::Open);
        assert!(pos.pending_sell.is_none());
    }

    #[test]
    fn test_partial_sell_fill_keeps_remainder() {
        let mut pm = manager();
        let id = pm.record_fill("BTC-USDT", &buy_fill(100.0, 1.0)).unwrap();
        let floor = pm.required_exit_price(pm.position(id).unwrap()).unwrap();
        let order_id = Uuid::new_v4();
        pm.request_sell(id, floor, 1.0, order_id).unwrap();

        // 40% fills: the remainder stays PendingSell under the same order
        pm.record_fill("BTC-USDT", &sell_fill(order_id, floor, 0.4))
            .unwrap();
        let pos = pm.position(id).unwrap();
        assert_eq!(pos.state, PositionState::PendingSell);
        assert!((pos.quantity - 0.6).abs() < 1e-9);
        assert_eq!(pos.pending_sell, Some(order_id));
        assert!(!pm.all_closed());
        let partial_pnl = pm.total_realized_pnl();
        assert!(partial_pnl > 0.0);

        // The rest fills: now the position is fully liquidated
        pm.record_fill("BTC-USDT", &sell_fill(order_id, floor, 0.6))
            .unwrap();
        let pos = pm.position(id).unwrap();
        assert_eq!(pos.state, PositionState::Closed);
        assert_eq!(pos.quantity, 0.0);
        assert!(pm.all_closed());
        assert!(pm.total_realized_pnl() > partial_pnl);
        assert!((pos.realized_pnl.unwrap() - pm.total_realized_pnl()).abs() < 1e-9);
    }
}
