//! State module for tracking crawl progress
//!
//! # Components
//!
//! - `TaskState`: the lifecycle of a single crawl task (pending, claimed, fetched, committed, ...)
//! - `FailureKind`: transient vs. permanent fetch failure classification

mod task_state;

pub use task_state::{FailureKind, TaskState};
