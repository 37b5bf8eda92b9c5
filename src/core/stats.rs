//! Run statistics.
//!
//! The counters are an explicit accumulator owned by one orchestrator
//! invocation and threaded by mutable reference through the recursive
//! walk. Repeated invocations in one process therefore never leak counts
//! into each other.

/// File-movement counters for one orchestrator invocation.
///
/// The physical relocation of classified sheets is currently a no-op
/// stage that always reports success (see
/// [`classify::check_and_move`](crate::pipeline::classify::check_and_move)),
/// so `files_moved` stays zero and every classified sheet lands in
/// `files_not_moved`. The tally `files_moved + files_not_moved` still
/// equals the number of classified sheets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// Sheets physically relocated to their destination folder.
    pub files_moved: u32,
    /// Sheets classified but left in place.
    pub files_not_moved: u32,
}

impl Stats {
    /// Total number of sheets classified during the run.
    pub fn total(&self) -> u32 {
        self.files_moved + self.files_not_moved
    }

    /// Merges counters from another accumulator, e.g. when a caller runs
    /// the orchestrator once per top-level input path.
    pub fn merge(&mut self, other: &Stats) {
        self.files_moved += other.files_moved;
        self.files_not_moved += other.files_not_moved;
    }
}
