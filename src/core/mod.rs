//! Core error handling, tuning configuration and run statistics.

pub mod config;
pub mod errors;
pub mod stats;

pub use config::TuningConfig;
pub use errors::{OmrError, OmrResult, ProcessingStage};
pub use stats::Stats;
