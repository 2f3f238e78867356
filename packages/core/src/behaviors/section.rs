//! Section plugin: a titled group for other plugins.

use super::PluginBehavior;
use crate::models::ValidationError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

pub struct SectionBehavior;

impl PluginBehavior for SectionBehavior {
    fn type_tag(&self) -> &'static str {
        "section"
    }

    fn validate(&self, payload: &Value) -> Result<(), ValidationError> {
        if !payload.is_object() {
            return Err(ValidationError::InvalidPayload(
                "section payload must be an object".to_string(),
            ));
        }
        serde_json::from_value::<SectionPayload>(payload.clone())
            .map(|_| ())
            .map_err(|e| ValidationError::InvalidPayload(e.to_string()))
    }
}
