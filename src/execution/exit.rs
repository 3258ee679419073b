//! Graceful shutdown: stop opening, wait for every position to clear its
//! never-lose floor, then liquidate.
//!
//! This can wait indefinitely if the market never recovers; that is the
//! intended guarantee, and the progress signal lets an operator distinguish
//! "waiting on market" from "stuck" before deciding to force-liquidate
//! outside the engine.

use std::collections::HashMap;

use serde::Serialize;
use uuid::Uuid;

use crate::error::Result;
use crate::execution::position_manager::{PositionManager, PositionState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ShutdownPhase {
    /// Normal trading
    Active,
    /// Stop requested: no new buys, selling positions as they turn profitable
    Draining,
    /// Every position closed; the engine may exit
    Complete,
}

/// Externally observable shutdown progress
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ShutdownProgress {
    pub phase: ShutdownPhase,
    pub open: usize,
    pub pending_sell: usize,
    pub closed: usize,
}

pub struct ExitController {
    phase: ShutdownPhase,
}

impl ExitController {
    pub fn new() -> Self {
        Self {
            phase: ShutdownPhase::Active,
        }
    }

    pub fn phase(&self) -> ShutdownPhase {
        self.phase
    }

    /// True once a stop has been requested; suppresses all buy decisions
    pub fn is_draining(&self) -> bool {
        self.phase != ShutdownPhase::Active
    }

    pub fn request_stop(&mut self) {
        if self.phase == ShutdownPhase::Active {
            self.phase = ShutdownPhase::Draining;
            tracing::info!("stop requested: holding until every position clears its floor");
        }
    }

    /// Open positions whose latest price meets their required exit.
    ///
    /// Positions below their floor are left open; the shutdown never
    /// forces a loss-making liquidation.
    pub fn ready_to_exit(
        &self,
        pm: &PositionManager,
        prices: &HashMap<String, f64>,
    ) -> Result<Vec<Uuid>> {
        let mut ready = Vec::new();
        for pos in pm.open_positions() {
            if pos.state != PositionState::Open {
                continue; // sell already resting
            }
            let Some(&latest) = prices.get(&pos.symbol) else {
                continue;
            };
            let floor = pm.required_exit_price(pos)?;
            if latest >= floor {
                ready.push(pos.id);
            } else {
                tracing::debug!(
                    "{} still underwater: {:.2} < floor {:.2}",
                    pos.symbol,
                    latest,
                    floor
                );
            }
        }
        Ok(ready)
    }

    /// Advance to Complete once nothing is live
    pub fn update(&mut self, pm: &PositionManager) {
        if self.phase == ShutdownPhase::Draining && pm.all_closed() {
            self.phase = ShutdownPhase::Complete;
            tracing::info!(
                "shutdown complete: all positions closed (realized P&L {:+.2})",
                pm.total_realized_pnl()
            );
        }
    }

    pub fn progress(&self, pm: &PositionManager) -> ShutdownProgress {
        let mut open = 0;
        let mut pending_sell = 0;
        let mut closed = 0;
        for pos in pm.positions() {
            match pos.state {
                PositionState::Open => open += 1,
                PositionState::PendingSell => pending_sell += 1,
                PositionState::Closed => closed += 1,
            }
        }
        ShutdownProgress {
            phase: self.phase,
            open,
            pending_sell,
            closed,
        }
    }
}

impl Default for ExitController {
    fn default() -> Self {
        Self::new()
    }
}
