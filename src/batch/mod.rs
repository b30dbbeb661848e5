pub mod artifact;
pub mod buffer;
pub mod scheduler;
pub mod types;

pub use buffer::{MemoryTradeBuffer, TradeBuffer};
pub use scheduler::{BatchScheduler, CycleError, CycleOutcome, CycleState};
pub use types::*;
