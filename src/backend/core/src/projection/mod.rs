//! State projection: folding event streams into current aggregate state.

pub mod projector;
pub mod state;

pub use projector::{fold, rebuild, FoldOutcome};
pub use state::AggregateState;
