//! Data Models
//!
//! This module contains the core data structures used throughout Blockspace:
//!
//! - `Node` - A plugin row positioned inside a container scope
//! - `Container` - A named slot (placeholder) holding an ordered plugin tree
//! - `Scope` - The (container, language) namespace of dense positions
//! - `BoundPlugin` - A node resolved to its typed payload with nested children

mod bound_plugin;
mod container;
mod node;
mod scope;

pub use bound_plugin::BoundPlugin;
pub use container::{Container, ContainerOwner};
pub use node::{NewPlugin, Node, Placement, ValidationError};
pub use scope::Scope;
