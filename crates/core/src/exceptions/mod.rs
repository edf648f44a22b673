//! Reconciliation exceptions and their resolution workflow.

mod error;
mod manager;
mod types;
mod workflow;

#[cfg(test)]
mod workflow_props;

pub use error::ExceptionError;
pub use manager::ExceptionManager;
pub use types::{
    ExceptionFilter, ExceptionStatus, ExceptionTarget, ExceptionType, ReconciliationException,
    Resolution, ResolutionAction, Severity,
};
pub use workflow::ExceptionWorkflow;
