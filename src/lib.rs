//! Deo - a programmable task runner
//!
//! Targets are named, configured task instances wired into a dependency
//! graph. Running a target runs its dependencies first, in order, and
//! supports both tasks that finish and tasks that keep running until they
//! are disposed.

// Public modules
pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod runner;
pub mod tasks;
pub mod utils;

// Re-export commonly used types
pub use error::{DeoError, Result};
pub use orchestrator::Deo;

/// Current version of Deo
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
