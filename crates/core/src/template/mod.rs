//! Journal template engine.
//!
//! A template maps one transaction type onto a fixed line layout and a set of
//! accounts. Applying it validates the event, prices it, and posts a
//! balanced entry exactly once per event id.

mod builder;
mod engine;
mod error;
mod registry;
mod types;
mod validation;

pub use builder::build_lines;
pub use engine::{EntryDraft, IngestOutcome, TemplateEngine};
pub use error::TemplateError;
pub use registry::TemplateRegistry;
pub use types::{FieldRule, JournalTemplate, LineLayout, TemplateId, TemplateKind};
pub use validation::validate_event;
