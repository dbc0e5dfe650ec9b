//! Shared infrastructure for Rollcall modules
//!
//! Provides the common error taxonomy, the broadcast event bus used for sync
//! progress reporting, configuration resolution, and database initialization
//! shared by the sync engine and any future Rollcall services.

pub mod config;
pub mod db;
pub mod error;
pub mod events;

pub use error::{Error, Result};
