//! Directory walking, outcome classification and output aggregation.

pub mod classify;
pub mod outputs;
pub mod scope;
pub mod walker;

pub use classify::Outcome;
pub use outputs::{OutputsNamespace, Paths};
pub use scope::ConfigScope;
pub use walker::{Orchestrator, RunOptions, TemplateSource};
