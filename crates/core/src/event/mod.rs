//! Typed external transaction events and the processor feed.

mod feed;
mod metadata;
mod types;

pub use feed::{MemoryFeed, TransactionFeed};
pub use metadata::{EventMetadata, FieldName, KnownField};
pub use types::{ExternalTransactionEvent, RiskLevel, TransactionType};
