//! Database Layer
//!
//! This module handles all database interactions using libsql:
//!
//! - Database initialization and connection management (`DatabaseService`)
//! - Row-level access to containers, plugins and payloads (`PluginStore`)
//! - Gap opening in a scope's position sequence (`PositionAllocator`)
//! - Squashing scopes back to `1..=N` behind pluggable backends (`Renumberer`)
//!
//! # Architecture
//!
//! Statements are plain functions over a `libsql::Connection`; the service
//! layer decides which of them share one `BEGIN IMMEDIATE` transaction.

mod database;
mod error;
mod plugin_store;
mod positions;
pub mod renumber;

pub use database::{DatabaseService, DEFAULT_BUSY_TIMEOUT_MS};
pub use error::DatabaseError;
pub use plugin_store::PluginStore;
pub use positions::PositionAllocator;
pub use renumber::{PortableRenumber, RenumberBackend, Renumberer, WindowRankRenumber};
