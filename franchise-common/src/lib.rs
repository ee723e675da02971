//! # Franchise Locator Common Library
//!
//! Shared code for the franchise location streaming crates:
//! - Location records, merged entries and the master table
//! - Source progress state
//! - Wire event types and the session EventBus
//! - Phone number normalization
//! - Configuration loading

pub mod config;
pub mod error;
pub mod events;
pub mod models;
pub mod phone;

pub use error::{Error, Result};
pub use models::{FranchiseQuery, MasterTable, MergedEntry, SourceSet, SourceState, SourceStatus, SourcedLocation};
pub use phone::normalize_phone;
