//! Repository abstractions for data access outside the engine's store traits.

pub mod account;

pub use account::{AccountError, AccountRepository, chart_drift};
