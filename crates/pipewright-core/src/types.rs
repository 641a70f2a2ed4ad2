use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{PipewrightError, Result};

/// Role in a conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

/// One entry of the run's message log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Message {
    fn with_role(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Some(Utc::now()),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content)
    }

    pub fn tool(content: impl Into<String>) -> Self {
        Self::with_role(Role::Tool, content)
    }
}

/// Tool definition for sending to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Outcome of a document or command tool.
///
/// `NotFound` is an ordinary outcome: callers record it and carry on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutcome {
    Done(String),
    NotFound(String),
    Failed(String),
}

impl ToolOutcome {
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done(_))
    }

    /// Text form recorded in the message log.
    pub fn describe(&self, tool: &str) -> String {
        match self {
            Self::Done(content) => format!("[{}] {}", tool, content),
            Self::NotFound(name) => format!("[{}] document not found: {}", tool, name),
            Self::Failed(reason) => format!("[{}] failed: {}", tool, reason),
        }
    }
}

/// Kind of a field in a structured generation result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Text,
    Flag,
    /// Mapping of file path to file content.
    Files,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub kind: FieldKind,
    pub description: String,
}

impl Field {
    pub fn new(name: impl Into<String>, kind: FieldKind, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            description: description.into(),
        }
    }
}

/// The declared shape a generation result must conform to.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Shape {
    pub fields: Vec<Field>,
}

/// A validated field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Flag(bool),
    Text(String),
    Files(BTreeMap<String, String>),
}

/// A generation result that matched its shape.
pub type StructuredResult = BTreeMap<String, FieldValue>;

impl Shape {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    /// Check a raw JSON object against the shape.
    ///
    /// Every declared field must be present with the declared kind; extra
    /// fields are dropped.
    pub fn validate(&self, stage: &str, raw: &serde_json::Value) -> Result<StructuredResult> {
        let malformed = |reason: String| PipewrightError::MalformedGeneration {
            stage: stage.to_string(),
            reason,
        };

        let obj = raw
            .as_object()
            .ok_or_else(|| malformed("result is not a JSON object".to_string()))?;

        let mut result = StructuredResult::new();
        for field in &self.fields {
            let value = obj
                .get(&field.name)
                .ok_or_else(|| malformed(format!("missing field {}", field.name)))?;
            let parsed = match field.kind {
                FieldKind::Text => value.as_str().map(|s| FieldValue::Text(s.to_string())),
                FieldKind::Flag => value.as_bool().map(FieldValue::Flag),
                FieldKind::Files => value.as_object().and_then(|files| {
                    files
                        .iter()
                        .map(|(path, content)| {
                            content.as_str().map(|c| (path.clone(), c.to_string()))
                        })
                        .collect::<Option<BTreeMap<_, _>>>()
                        .map(FieldValue::Files)
                }),
            };
            let parsed = parsed.ok_or_else(|| {
                malformed(format!("field {} is not {:?}", field.name, field.kind))
            })?;
            result.insert(field.name.clone(), parsed);
        }
        Ok(result)
    }
}

/// Decision returned by the judgment collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub approved: bool,
    /// Per-criterion decisions; single-criterion stages carry one entry.
    #[serde(default)]
    pub criteria: BTreeMap<String, bool>,
    pub message: String,
}

impl Verdict {
    /// Build a verdict from per-criterion decisions. Approved only when every
    /// criterion is true and at least one exists.
    pub fn from_criteria(criteria: BTreeMap<String, bool>, message: impl Into<String>) -> Self {
        let approved = !criteria.is_empty() && criteria.values().all(|v| *v);
        Self {
            approved,
            criteria,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn design_shape() -> Shape {
        Shape::new(vec![
            Field::new("UML_class", FieldKind::Text, "class diagram"),
            Field::new("code", FieldKind::Files, "sources"),
            Field::new("ready", FieldKind::Flag, "done"),
        ])
    }

    #[test]
    fn test_validate_accepts_matching_result() {
        let raw = json!({
            "UML_class": "classDiagram",
            "code": {"app/main.py": "print()"},
            "ready": true,
            "extra": 1
        });
        let result = design_shape().validate("design", &raw).unwrap();
        assert_eq!(result.len(), 3);
        assert_eq!(result["UML_class"], FieldValue::Text("classDiagram".into()));
        assert_eq!(result["ready"], FieldValue::Flag(true));
        assert!(!result.contains_key("extra"));
    }

    #[test]
    fn test_validate_missing_field() {
        let raw = json!({"UML_class": "x", "ready": true});
        let err = design_shape().validate("design", &raw).unwrap_err();
        match err {
            PipewrightError::MalformedGeneration { stage, reason } => {
                assert_eq!(stage, "design");
                assert!(reason.contains("code"));
            }
            other => panic!("Expected MalformedGeneration, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_wrong_kind() {
        let raw = json!({"UML_class": 3, "code": {}, "ready": true});
        assert!(design_shape().validate("design", &raw).is_err());

        let raw = json!({"UML_class": "x", "code": {"a.py": 1}, "ready": true});
        assert!(design_shape().validate("design", &raw).is_err());
    }

    #[test]
    fn test_verdict_from_criteria() {
        let mut criteria = BTreeMap::new();
        criteria.insert("UML_class".to_string(), true);
        criteria.insert("UML_sequence".to_string(), false);
        assert!(!Verdict::from_criteria(criteria.clone(), "no").approved);

        criteria.insert("UML_sequence".to_string(), true);
        assert!(Verdict::from_criteria(criteria, "ok").approved);
        assert!(!Verdict::from_criteria(BTreeMap::new(), "empty").approved);
    }

    #[test]
    fn test_outcome_describe() {
        let out = ToolOutcome::NotFound("UML_class".into());
        assert_eq!(
            out.describe("view_document"),
            "[view_document] document not found: UML_class"
        );
        assert!(!out.is_done());
    }
}
