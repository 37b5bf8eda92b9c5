//! Per-sheet outcome classification.
//!
//! Every processed sheet is assigned exactly one outcome, and every
//! outcome causes exactly one append to exactly one output channel; no
//! sheet is ever dropped silently.

use std::path::Path;

use tracing::debug;

use crate::core::stats::Stats;

/// Terminal disposition of one processed sheet.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Recognition succeeded and the sheet is not filtered out.
    Success {
        /// Computed score, or 0.0 when no scoring key is in scope.
        score: f32,
    },
    /// Preprocessing or recognition failed for this sheet.
    RecognitionFailure,
    /// At least one field carries multiple marks and filtering is on.
    MultiMarked,
}

impl Outcome {
    /// Name of the output channel this outcome is routed to.
    pub fn channel(&self) -> &'static str {
        match self {
            Outcome::Success { .. } => "Results",
            Outcome::RecognitionFailure => "Errors",
            Outcome::MultiMarked => "MultiMarked",
        }
    }
}

/// Classifies a successfully recognized sheet.
///
/// A multi-marked sheet only routes to the multi-marked channel when the
/// scope's tuning parameters request filtering; otherwise it counts as a
/// success like any other sheet.
pub fn classify_recognized(multi_marked: bool, filter_multimarked: bool, score: f32) -> Outcome {
    if multi_marked && filter_multimarked {
        Outcome::MultiMarked
    } else {
        Outcome::Success { score }
    }
}

/// Routes a classified sheet towards its destination folder.
///
/// Physically relocating files is currently a no-op that always reports
/// success: the output row records the intended destination and the
/// sheet stays in place, counted under `files_not_moved`.
pub fn check_and_move(stats: &mut Stats, from: &Path, to: &Path) -> bool {
    debug!(from = %from.display(), to = %to.display(), "file move skipped (no-op stage)");
    stats.files_not_moved += 1;
    true
}
