//! Strata Services Layer
//!
//! Business services that operate on committed objects rather than on the
//! ingestion path. Today that is the lifecycle manager, which applies the
//! retention policy to stored objects on a schedule.

pub mod lifecycle;

pub use lifecycle::{
    plan, LifecycleAction, LifecycleManager, PlannedAction, SweepFailure, SweepSummary,
};
