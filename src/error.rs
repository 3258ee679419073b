use thiserror::Error;
use uuid::Uuid;

/// Errors produced by the strategy and position engine.
///
/// Propagation policy: `InvalidConfig` aborts startup, `StaleMarketData`
/// skips the current decision cycle, `PriceBelowFloor` rejects a single
/// order request, and `OrderRejectedByVenue` makes the engine re-decide on
/// the next cycle. None of these may crash the decision loop.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("stale market data: {0}")]
    StaleMarketData(String),

    #[error("sell price {price:.8} below never-lose floor {floor:.8}")]
    PriceBelowFloor { price: f64, floor: f64 },

    #[error("order {0} rejected by venue: {1}")]
    OrderRejectedByVenue(Uuid, String),

    #[error("position {0} not found")]
    PositionNotFound(Uuid),

    #[error("invalid position state: {0}")]
    InvalidState(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
