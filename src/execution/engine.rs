use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::config::StrategyConfig;
use crate::error::{EngineError, Result};
use crate::execution::exit::{ExitController, ShutdownPhase, ShutdownProgress};
use crate::execution::position_manager::{Position, PositionManager, PositionState};
use crate::execution::router::{ExchangeEvent, OrderRouter};
use crate::models::{
    CancelIntent, FeeSchedule, FillEvent, MarketSnapshot, OrderIntent, OrderState,
    OrderStatusEvent, Side,
};
use crate::strategy::averaging::{self, AddDecision};
use crate::strategy::placement::{self, Urgency};

/// An intent submitted to the router and not yet acknowledged terminal
struct PendingIntent {
    intent: OrderIntent,
    placed_at: DateTime<Utc>,
    cancel_requested: bool,
}

/// Full engine state for external checkpointing
#[derive(Debug, Clone, Serialize)]
pub struct EngineSnapshot {
    pub taken_at: DateTime<Utc>,
    pub positions: Vec<Position>,
    pub outstanding: Vec<OrderIntent>,
    pub shutdown: ShutdownProgress,
}

/// Single sequential decision maker for one trading pair.
///
/// Consumes one `MarketSnapshot` per cycle and produces at most one new
/// `OrderIntent` per instrument per cycle, so conflicting orders for the
/// same position cannot be issued. All position state is owned here (via
/// the `PositionManager`); collaborators hand data in through the snapshot
/// channel and the router's event queue.
pub struct TradingEngine<R: OrderRouter> {
    config: StrategyConfig,
    positions: PositionManager,
    router: R,
    exit: ExitController,
    pending_buy: Option<PendingIntent>,
    pending_sell: Option<PendingIntent>,
}

impl<R: OrderRouter> TradingEngine<R> {
    pub fn new(config: StrategyConfig, fees: FeeSchedule, router: R) -> Self {
        let positions = PositionManager::new(fees, config.min_profit_margin);
        Self {
            config,
            positions,
            router,
            exit: ExitController::new(),
            pending_buy: None,
            pending_sell: None,
        }
    }

    /// Resume with externally checkpointed positions
    pub fn with_positions(
        config: StrategyConfig,
        fees: FeeSchedule,
        router: R,
        positions: Vec<Position>,
    ) -> Self {
        let positions = PositionManager::with_positions(fees, config.min_profit_margin, positions);
        Self {
            config,
            positions,
            router,
            exit: ExitController::new(),
            pending_buy: None,
            pending_sell: None,
        }
    }

    pub fn positions(&self) -> &PositionManager {
        &self.positions
    }

    pub fn router(&self) -> &R {
        &self.router
    }

    pub fn shutdown_progress(&self) -> ShutdownProgress {
        self.exit.progress(&self.positions)
    }

    /// Begin draining: no new buys, hold every position for its floor
    pub fn request_stop(&mut self) {
        self.exit.request_stop();
        // An unfilled entry/averaging buy has no business resting any more
        if let Some(pending) = &mut self.pending_buy {
            if !pending.cancel_requested {
                pending.cancel_requested = true;
                if let Err(e) = self.router.cancel(&CancelIntent {
                    order_id: pending.intent.id,
                }) {
                    tracing::warn!("cancel of open buy on stop failed: {}", e);
                }
            }
        }
    }

    /// Everything an external checkpointer needs to restore the engine
    pub fn state_snapshot(&self) -> EngineSnapshot {
        let outstanding = self
            .pending_buy
            .iter()
            .chain(self.pending_sell.iter())
            .map(|p| p.intent.clone())
            .collect();
        EngineSnapshot {
            taken_at: Utc::now(),
            positions: self.positions.positions().to_vec(),
            outstanding,
            shutdown: self.exit.progress(&self.positions),
        }
    }

    /// One decision cycle against the wall clock
    pub fn on_cycle(&mut self, snapshot: &MarketSnapshot) -> Result<()> {
        self.on_cycle_at(snapshot, Utc::now())
    }

    /// One decision cycle with an explicit clock (tests and replays)
    pub fn on_cycle_at(&mut self, snapshot: &MarketSnapshot, now: DateTime<Utc>) -> Result<()> {
        // Order status and fills first: decisions must see a fully
        // applied account state, never a half-applied fill
        let events = self.router.poll_events(snapshot);
        self.apply_events(events)?;
        self.expire_stale_orders(now);
        self.exit.update(&self.positions);

        if snapshot.is_crossed() {
            return Err(EngineError::StaleMarketData(format!(
                "bid {} / ask {}",
                snapshot.best_bid, snapshot.best_ask
            )));
        }
        let age = snapshot.age_secs(now);
        if age > self.config.max_snapshot_age_secs as i64 {
            return Err(EngineError::StaleMarketData(format!(
                "snapshot is {}s old (limit {}s)",
                age, self.config.max_snapshot_age_secs
            )));
        }

        if self.exit.is_draining() {
            return self.drain_cycle(snapshot, now);
        }

        // Sell side first: a filled position should always have a resting
        // sell at or above its floor. One new intent per cycle.
        if self.place_resting_sell(snapshot, now)? {
            return Ok(());
        }
        self.place_buy(snapshot, now)
    }

    fn apply_events(&mut self, events: Vec<ExchangeEvent>) -> Result<()> {
        for event in events {
            match event {
                ExchangeEvent::Fill(fill) => self.apply_fill(fill)?,
                ExchangeEvent::Status(status) => self.apply_status(status),
            }
        }
        Ok(())
    }

    fn apply_fill(&mut self, fill: FillEvent) -> Result<()> {
        let matches_buy = self
            .pending_buy
            .as_ref()
            .is_some_and(|p| p.intent.id == fill.order_id);
        let matches_sell = self
            .pending_sell
            .as_ref()
            .is_some_and(|p| p.intent.id == fill.order_id);

        if matches_buy {
            if let Some(pending) = self.pending_buy.take() {
                self.positions.record_fill(&pending.intent.symbol, &fill)?;
                // The basis just moved; a resting sell is priced off stale
                // numbers and must be re-quoted
                self.cancel_resting_sell("cost basis changed by averaging fill");
            }
        } else if matches_sell {
            if let Some(pending) = self.pending_sell.take() {
                let id = self.positions.record_fill(&pending.intent.symbol, &fill)?;
                // A partial fill leaves the remainder resting at the venue
                // under the same order id
                if self.positions.position(id)?.state == PositionState::PendingSell {
                    self.pending_sell = Some(pending);
                }
            }
        } else {
            tracing::warn!("fill for unknown order {}", fill.order_id);
        }
        Ok(())
    }

    fn apply_status(&mut self, status: OrderStatusEvent) {
        match status.state {
            OrderState::Cancelled | OrderState::Rejected => {
                if self
                    .pending_sell
                    .as_ref()
                    .is_some_and(|p| p.intent.id == status.order_id)
                {
                    self.pending_sell = None;
                    if let Some(pos) = self.positions.position_by_sell_order(status.order_id) {
                        let id = pos.id;
                        if let Err(e) = self.positions.on_sell_cancelled(id) {
                            tracing::error!("sell cancel revert failed: {}", e);
                        }
                    }
                } else if self
                    .pending_buy
                    .as_ref()
                    .is_some_and(|p| p.intent.id == status.order_id)
                {
                    self.pending_buy = None;
                }
            }
            // Acks; fills carry their own event with price and fee
            OrderState::Open | OrderState::Filled => {}
        }
    }

    /// Cancel-and-reassess: intents unfilled past the timeout are pulled
    /// and re-evaluated against fresh market conditions next cycle
    fn expire_stale_orders(&mut self, now: DateTime<Utc>) {
        let timeout = Duration::seconds(self.config.stale_order_timeout_secs as i64);
        let mut to_cancel = Vec::new();

        if let Some(pending) = &mut self.pending_buy {
            if !pending.cancel_requested && now - pending.placed_at > timeout {
                pending.cancel_requested = true;
                to_cancel.push(pending.intent.id);
            }
        }
        if let Some(pending) = &mut self.pending_sell {
            if !pending.cancel_requested && now - pending.placed_at > timeout {
                pending.cancel_requested = true;
                to_cancel.push(pending.intent.id);
            }
        }

        for order_id in to_cancel {
            tracing::info!("order {} stale, cancelling for re-evaluation", order_id);
            if let Err(e) = self.router.cancel(&CancelIntent { order_id }) {
                tracing::warn!("stale-order cancel failed: {}", e);
            }
        }
    }

    fn cancel_resting_sell(&mut self, reason: &str) {
        if let Some(pending) = &mut self.pending_sell {
            if !pending.cancel_requested {
                tracing::info!("cancelling resting sell {}: {}", pending.intent.id, reason);
                pending.cancel_requested = true;
                if let Err(e) = self.router.cancel(&CancelIntent {
                    order_id: pending.intent.id,
                }) {
                    tracing::warn!("sell cancel failed: {}", e);
                }
            }
        }
    }

    /// Draining: sell whatever has reached its floor, never at a loss
    fn drain_cycle(&mut self, snapshot: &MarketSnapshot, now: DateTime<Utc>) -> Result<()> {
        let mut prices = HashMap::new();
        prices.insert(snapshot.symbol.clone(), snapshot.best_bid);

        let ready = self.exit.ready_to_exit(&self.positions, &prices)?;
        if let Some(&position_id) = ready.first() {
            self.submit_sell(position_id, snapshot, now)?;
        }
        self.exit.update(&self.positions);
        Ok(())
    }

    /// Keep one sell resting for the live position. Returns true if a new
    /// intent went out this cycle.
    fn place_resting_sell(
        &mut self,
        snapshot: &MarketSnapshot,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        if self.pending_sell.is_some() {
            return Ok(false);
        }
        let Some(pos) = self.positions.get_open_position(&snapshot.symbol) else {
            return Ok(false);
        };
        if pos.state != PositionState::Open {
            return Ok(false);
        }
        let position_id = pos.id;
        self.submit_sell(position_id, snapshot, now)
    }

    fn submit_sell(
        &mut self,
        position_id: Uuid,
        snapshot: &MarketSnapshot,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        if self.pending_sell.is_some() {
            return Ok(false);
        }
        let (quantity, floor) = {
            let pos = self.positions.position(position_id)?;
            (pos.quantity, self.positions.required_exit_price(pos)?)
        };

        let placement =
            placement::optimal_limit_price(snapshot, Side::Sell, Urgency::Low, &self.config)?;
        // The never-lose floor always beats queue position
        let price = placement.price.max(floor);

        let intent = OrderIntent::new(
            &snapshot.symbol,
            Side::Sell,
            price,
            quantity,
            Some(position_id),
        );
        self.positions
            .request_sell(position_id, price, quantity, intent.id)?;

        match self.router.submit(&intent) {
            Ok(()) => {
                tracing::info!(
                    "sell {:.8} {} @ {:.2} (floor {:.2})",
                    quantity,
                    snapshot.symbol,
                    price,
                    floor
                );
                self.pending_sell = Some(PendingIntent {
                    intent,
                    placed_at: now,
                    cancel_requested: false,
                });
                Ok(true)
            }
            Err(EngineError::OrderRejectedByVenue(id, reason)) => {
                // As if the order never existed; re-decide next cycle
                tracing::warn!("venue rejected sell {}: {}", id, reason);
                self.positions.on_sell_cancelled(position_id)?;
                Ok(false)
            }
            Err(e) => {
                self.positions.on_sell_cancelled(position_id)?;
                Err(e)
            }
        }
    }

    /// Initial entry when flat, averaging additions otherwise
    fn place_buy(&mut self, snapshot: &MarketSnapshot, now: DateTime<Utc>) -> Result<()> {
        if self.pending_buy.is_some() {
            return Ok(());
        }

        let available = self.router.quote_balance();
        let (notional, position_id) = match self.positions.get_open_position(&snapshot.symbol) {
            None => {
                let spendable = available * (1.0 - self.config.capital_reserve_pct);
                let notional = self.config.base_order_notional.min(spendable);
                if notional < self.config.min_order_notional {
                    return Ok(());
                }
                (notional, None)
            }
            Some(pos) => {
                match averaging::should_average(pos, snapshot.best_ask, &self.config, available) {
                    AddDecision::Add { notional } => (notional, Some(pos.id)),
                    AddDecision::NoAction => return Ok(()),
                }
            }
        };

        let placement =
            placement::optimal_limit_price(snapshot, Side::Buy, Urgency::Low, &self.config)?;
        let quantity = notional / placement.price;

        let intent = OrderIntent::new(
            &snapshot.symbol,
            Side::Buy,
            placement.price,
            quantity,
            position_id,
        );
        match self.router.submit(&intent) {
            Ok(()) => {
                tracing::info!(
                    "buy {:.8} {} @ {:.2} ({:.2} notional)",
                    quantity,
                    snapshot.symbol,
                    placement.price,
                    notional
                );
                self.pending_buy = Some(PendingIntent {
                    intent,
                    placed_at: now,
                    cancel_requested: false,
                });
                Ok(())
            }
            Err(EngineError::OrderRejectedByVenue(id, reason)) => {
                tracing::warn!("venue rejected buy {}: {}", id, reason);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Decision loop: one snapshot per cycle, cooperative stop flag
    /// consulted at the top of each cycle, terminal once draining finishes.
    pub async fn run(
        mut self,
        mut snapshots: mpsc::Receiver<MarketSnapshot>,
        stop: watch::Receiver<bool>,
    ) -> Result<()> {
        tracing::info!("decision loop started for {}", self.config.symbol);

        while let Some(snapshot) = snapshots.recv().await {
            if *stop.borrow() {
                self.request_stop();
            }

            if let Err(e) = self.on_cycle(&snapshot) {
                match e {
                    EngineError::StaleMarketData(msg) => {
                        tracing::warn!("skipping cycle: stale market data ({})", msg)
                    }
                    // A single bad cycle never takes the loop down
                    e => tracing::error!("cycle error: {}", e),
                }
            }

            if self.exit.phase() == ShutdownPhase::Complete {
                break;
            }
        }

        tracing::info!(
            "decision loop ended (realized P&L {:+.2})",
            self.positions.total_realized_pnl()
        );
        Ok(())
    }
}
