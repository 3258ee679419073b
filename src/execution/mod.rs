// Decision loop, position state machine, and the venue seam
pub mod engine;
pub mod exit;
pub mod position_manager;
pub mod router;

pub use engine::{EngineSnapshot, TradingEngine};
pub use exit::{ExitController, ShutdownPhase, ShutdownProgress};
pub use position_manager::{Position, PositionManager, PositionState};
pub use router::{ExchangeEvent, OrderRouter};
