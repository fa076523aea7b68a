//! Configuration: properties, settings, target registry and deofiles
//!
//! This module holds everything that is set up before a target runs.

pub mod deofile;
pub mod interpolate;
pub mod properties;
pub mod registry;
pub mod settings;

// Re-export main types
pub use deofile::*;
pub use properties::*;
pub use registry::*;
pub use settings::*;
