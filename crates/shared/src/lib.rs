//! Shared types and configuration for Clearbook.
//!
//! This crate provides common types used across all other crates:
//! - Integer minor-unit money and ISO currency codes
//! - Typed IDs for type-safe entity references
//! - Runtime configuration management

pub mod config;
pub mod types;

pub use config::{
    AppConfig, DatabaseConfig, FeeConfig, IdempotencyConfig, ReconciliationConfig,
    SeverityThresholds,
};
