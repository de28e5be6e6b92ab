//! # Delve Common Library
//!
//! Shared code for the Delve research service:
//! - Bootstrap configuration loading
//! - Database bootstrap (pool, pragmas, schema)
//! - Event types and the EventBus
//! - SSE helpers
//! - Time utilities

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod sse;
pub mod time;

pub use error::{Error, Result};
