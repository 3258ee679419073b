// Pure decision components: no side effects, no clock, no venue access
pub mod averaging;
pub mod placement;
pub mod profit;

pub use averaging::AddDecision;
pub use placement::{Placement, Urgency};
