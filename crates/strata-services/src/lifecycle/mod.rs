mod manager;
mod plan;

pub use manager::{LifecycleManager, PlannedAction, SweepFailure, SweepSummary};
pub use plan::{plan, LifecycleAction};
