//! # Codex Common Library
//!
//! Shared code for the Codex comic server crates:
//! - Error type
//! - Configuration loading and root folder resolution
//! - Event types (CodexEvent enum) and the EventBus
//! - Database initialization and migrations

pub mod config;
pub mod db;
pub mod error;
pub mod events;

pub use error::{Error, Result};
