//! Link plugin
//!
//! Points either at an external URL or at another plugin. Internal targets are
//! retargeted on copy when the target plugin was copied in the same batch.

use super::{CopyMap, PluginBehavior};
use crate::models::{Node, ValidationError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkPayload {
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_plugin_id: Option<String>,
}

pub struct LinkBehavior;

impl PluginBehavior for LinkBehavior {
    fn type_tag(&self) -> &'static str {
        "link"
    }

    fn validate(&self, payload: &Value) -> Result<(), ValidationError> {
        let link: LinkPayload = serde_json::from_value(payload.clone())
            .map_err(|e| ValidationError::InvalidPayload(e.to_string()))?;

        if link.label.trim().is_empty() {
            return Err(ValidationError::MissingField("label".to_string()));
        }
        if link.url.is_none() && link.target_plugin_id.is_none() {
            return Err(ValidationError::InvalidPayload(
                "link needs a url or a target_plugin_id".to_string(),
            ));
        }
        Ok(())
    }

    // Links are leaves.
    fn child_types(&self) -> Option<&'static [&'static str]> {
        Some(&[])
    }

    fn post_copy(
        &self,
        _old: &Node,
        payload: &mut Value,
        copies: &CopyMap,
    ) -> Result<bool, ValidationError> {
        let Some(target) = payload.get("target_plugin_id").and_then(Value::as_str) else {
            return Ok(false);
        };
        match copies.new_id(target) {
            Some(new_id) => {
                payload["target_plugin_id"] = Value::String(new_id.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
