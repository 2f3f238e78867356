//! Blockspace Core - ordered plugin tree engine
//!
//! This crate stores ordered, hierarchical trees of typed content plugins and
//! keeps their positions consistent under every mutation.
//!
//! # Architecture
//!
//! - **Scopes**: positions are dense (`1..=N`) per (container, language) pair
//! - **Contiguous subtrees**: a plugin's descendants directly follow it
//! - **libsql**: Embedded SQLite-compatible database, one `BEGIN IMMEDIATE`
//!   transaction per mutation
//! - **Registry, not globals**: plugin behaviors live in an immutable
//!   `PluginTypeRegistry` passed to every component
//!
//! # Modules
//!
//! - [`models`] - Data structures (Node, Container, Scope, BoundPlugin)
//! - [`behaviors`] - Plugin type system and trait-based behaviors
//! - [`services`] - Tree mutation, copy, clipboard and the `PluginTreeService` facade
//! - [`db`] - Database layer with libsql integration
//! - [`config`] - Engine configuration

pub mod behaviors;
pub mod config;
pub mod db;
pub mod models;
pub mod services;

// Re-export commonly used types
pub use behaviors::*;
pub use config::{EngineConfig, RenumberStrategy};
pub use models::*;
pub use services::*;
