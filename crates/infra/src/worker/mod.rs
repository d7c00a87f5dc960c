//! Outbound worker: lifecycle control and the tick engine.

pub mod lifecycle;
pub mod tick;

pub use lifecycle::{EmptyTick, LifecycleController, StartOutcome};
pub use tick::{TickEngine, TickError, TickReport};
