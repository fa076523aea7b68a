//! Task execution engine
//!
//! This module holds the task abstraction, execution contexts, the target
//! dependency graph and the runner that drives a single task.

pub mod context;
pub mod graph;
pub mod task;
pub mod task_runner;

// Re-export main types
pub use context::*;
pub use graph::*;
pub use task::*;
pub use task_runner::*;
