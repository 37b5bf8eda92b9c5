//! # OMR Batch
//!
//! A Rust library that recognizes filled bubbles on scanned answer sheets
//! ("OMR sheets") and optionally grades them against a scoring key.
//!
//! Sheet layouts are described by a JSON template which declares the bubble
//! grid geometry, an ordered preprocessing chain, and the ordered output
//! columns. Input is a directory tree: any directory may carry its own
//! `template.json`, `config.json` (tuning parameters) or `evaluation.json`
//! (scoring key), and directories that carry none inherit all three from
//! the nearest ancestor that does.
//!
//! ## Features
//!
//! - Hierarchical batch processing over nested input directories
//! - Per-directory cascading configuration (template / tuning / scoring key)
//! - Pluggable preprocessing steps (page crop, marker crop, blur, levels)
//! - Built-in intensity-threshold bubble reader, swappable via the
//!   [`RecognitionEngine`](recognition::RecognitionEngine) trait
//! - Three-way outcome classification (success / error / multi-marked)
//!   with append-only CSV output channels
//!
//! ## Modules
//!
//! * [`core`] - Error types, tuning configuration, run statistics
//! * [`template`] - Layout template loading and bubble grid geometry
//! * [`processors`] - Image preprocessing steps and the pipeline adapter
//! * [`recognition`] - Bubble recognition engine and its contract
//! * [`evaluation`] - Scoring key loading and response grading
//! * [`pipeline`] - Directory walker, outcome classification, output files
//! * [`utils`] - Image loading and visualization helpers
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use omr_batch::prelude::*;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let options = RunOptions::new("outputs");
//! let orchestrator = Orchestrator::new();
//! let mut stats = Stats::default();
//! orchestrator.run(Path::new("inputs"), &options, &mut stats)?;
//! println!("processed {} file(s)", stats.total());
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod evaluation;
pub mod pipeline;
pub mod processors;
pub mod recognition;
pub mod template;
pub mod utils;

/// Prelude module for convenient imports.
///
/// Bring the essentials into scope with a single use statement:
///
/// ```rust
/// use omr_batch::prelude::*;
/// ```
pub mod prelude {
    pub use crate::core::{OmrError, OmrResult, Stats, TuningConfig};
    pub use crate::pipeline::{Orchestrator, RunOptions, TemplateSource};
    pub use crate::recognition::{BubbleReader, RecognitionEngine};
    pub use crate::template::Template;
}
