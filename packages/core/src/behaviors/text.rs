//! Text plugin
//!
//! Rich text body that can embed child plugins inline with `{{plugin:<id>}}`
//! markers. When a text plugin is copied together with its embedded children,
//! the markers are rewritten to the ids of the copies.

use super::{CopyMap, PluginBehavior};
use crate::models::{Node, ValidationError};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextPayload {
    pub body: String,
}

impl TextPayload {
    /// Ids of the plugins embedded in the body, in order of appearance
    pub fn embedded_ids(&self) -> Vec<String> {
        marker_regex()
            .captures_iter(&self.body)
            .map(|caps| caps[1].to_string())
            .collect()
    }
}

/// Marker for an inline child plugin
pub fn plugin_marker(id: &str) -> String {
    format!("{{{{plugin:{}}}}}", id)
}

const PLUGIN_MARKER_PATTERN: &str = r"\{\{plugin:([A-Za-z0-9_\-]+)\}\}";

fn marker_regex() -> &'static Regex {
    static MARKER_REGEX: OnceLock<Regex> = OnceLock::new();
    MARKER_REGEX.get_or_init(|| Regex::new(PLUGIN_MARKER_PATTERN).unwrap())
}

pub struct TextBehavior;

impl PluginBehavior for TextBehavior {
    fn type_tag(&self) -> &'static str {
        "text"
    }

    fn validate(&self, payload: &Value) -> Result<(), ValidationError> {
        match payload.get("body") {
            Some(Value::String(_)) => Ok(()),
            Some(_) => Err(ValidationError::InvalidPayload(
                "text body must be a string".to_string(),
            )),
            None => Err(ValidationError::MissingField("body".to_string())),
        }
    }

    fn post_copy(
        &self,
        _old: &Node,
        payload: &mut Value,
        copies: &CopyMap,
    ) -> Result<bool, ValidationError> {
        let Some(body) = payload.get("body").and_then(Value::as_str) else {
            return Ok(false);
        };

        let mut changed = false;
        let rewritten = marker_regex().replace_all(body, |caps: &Captures| {
            match copies.new_id(&caps[1]) {
                Some(new_id) => {
                    changed = true;
                    plugin_marker(new_id)
                }
                None => caps[0].to_string(),
            }
        });

        if changed {
            let rewritten = rewritten.into_owned();
            payload["body"] = Value::String(rewritten);
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn node(id: &str) -> Node {
        let now = Utc::now();
        Node {
            id: id.to_string(),
            container_id: "c".to_string(),
            parent_id: None,
            language: "en".to_string(),
            type_tag: "text".to_string(),
            position: 1,
            created_at: now,
            changed_at: now,
        }
    }

    #[test]
    fn test_validate_requires_string_body() {
        assert!(TextBehavior.validate(&json!({ "body": "hi" })).is_ok());
        assert!(matches!(
            TextBehavior.validate(&json!({})),
            Err(ValidationError::MissingField(_))
        ));
        assert!(matches!(
            TextBehavior.validate(&json!({ "body": 3 })),
            Err(ValidationError::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_embedded_ids() {
        let payload = TextPayload {
            body: format!("See {} and {}", plugin_marker("a-1"), plugin_marker("b-2")),
        };
        assert_eq!(payload.embedded_ids(), vec!["a-1", "b-2"]);
    }

    #[test]
    fn test_post_copy_rewrites_only_copied_markers() {
        let mut copies = CopyMap::new();
        copies.insert("child-old", node("child-new"));

        let mut payload = json!({
            "body": format!("A {} B {}", plugin_marker("child-old"), plugin_marker("elsewhere"))
        });

        let changed = TextBehavior
            .post_copy(&node("text-old"), &mut payload, &copies)
            .unwrap();

        assert!(changed);
        assert_eq!(
            payload["body"],
            format!("A {} B {}", plugin_marker("child-new"), plugin_marker("elsewhere"))
        );
    }

    #[test]
    fn test_post_copy_without_markers_is_unchanged() {
        let mut payload = json!({ "body": "plain" });
        let changed = TextBehavior
            .post_copy(&node("t"), &mut payload, &CopyMap::new())
            .unwrap();
        assert!(!changed);
        assert_eq!(payload, json!({ "body": "plain" }));
    }
}
