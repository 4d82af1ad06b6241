//! Metric names for the courier pipeline.
//!
//! Recording goes through the `metrics` crate facade, so nothing is exported
//! unless the embedding application installs a recorder.
//!
//! ```rust,ignore
//! use courier_metrics::{counter, pipeline};
//!
//! counter!(pipeline::PIPES_TOTAL).increment(1);
//! ```

mod definitions;

pub use definitions::*;

// Re-export metrics macros for convenience
pub use metrics::{counter, gauge, histogram};
