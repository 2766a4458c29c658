//! Verdict Engine Library
//!
//! Multi-horizon consensus voting with downgrade-only invariant arbitration

pub mod audit;
pub mod config;
pub mod consensus;
pub mod error;
pub mod invariants;
pub mod pipeline;
pub mod regime;
pub mod types;

pub use error::ConfigError;
pub use pipeline::{EvaluationRequest, Verdict, VerdictPipeline, WireRequest};
