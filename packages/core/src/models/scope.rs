//! Position scopes
//!
//! A scope is the (container, language) namespace inside which positions form
//! the dense sequence `1..=N`.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
    pub container_id: String,
    pub language: String,
}

impl Scope {
    pub fn new(container_id: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            container_id: container_id.into(),
            language: language.into(),
        }
    }

    /// Same container, different language
    pub fn with_language(&self, language: impl Into<String>) -> Self {
        Self::new(self.container_id.clone(), language)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.container_id, self.language)
    }
}
