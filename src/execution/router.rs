use crate::error::Result;
use crate::models::{CancelIntent, FillEvent, MarketSnapshot, OrderIntent, OrderStatusEvent};

/// Something the venue tells us back about our orders
#[derive(Debug, Clone)]
pub enum ExchangeEvent {
    Fill(FillEvent),
    Status(OrderStatusEvent),
}

/// Mode adapter seam between the engine and a venue.
///
/// The engine emits identical intents whether they land in the simulated
/// fill engine or a live exchange client; only the wiring in `main` picks
/// the implementation. Submission may fail with `OrderRejectedByVenue`,
/// which the engine treats as if the order never existed.
pub trait OrderRouter: Send {
    fn submit(&mut self, intent: &OrderIntent) -> Result<()>;

    fn cancel(&mut self, intent: &CancelIntent) -> Result<()>;

    /// Drain fills and status changes accumulated since the last cycle.
    /// The snapshot lets simulated venues decide which resting orders
    /// traded; a live adapter ignores it.
    fn poll_events(&mut self, snapshot: &MarketSnapshot) -> Vec<ExchangeEvent>;

    /// Spendable quote-currency balance
    fn quote_balance(&self) -> f64;

    /// Held base-currency balance
    fn base_balance(&self) -> f64;
}
