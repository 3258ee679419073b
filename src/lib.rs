// Core modules
pub mod config;
pub mod error;
pub mod execution;
pub mod models;
pub mod sim;
pub mod strategy;

// Re-export commonly used types
pub use error::{EngineError, Result};
pub use models::*;
