use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{PipewrightError, Result};
use crate::types::Message;

/// Document key holding the generated source files.
pub const CODE_KEY: &str = "code";

/// A named artifact produced or consumed by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Document {
    Text(String),
    /// Mapping of file path to file content.
    Files(BTreeMap<String, String>),
}

impl Document {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Files(_) => None,
        }
    }

    pub fn as_files(&self) -> Option<&BTreeMap<String, String>> {
        match self {
            Self::Files(files) => Some(files),
            Self::Text(_) => None,
        }
    }

    /// Render for inclusion in a prompt.
    pub fn render(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Files(files) => files
                .iter()
                .map(|(path, content)| format!("### {}\n{}", path, content))
                .collect::<Vec<_>>()
                .join("\n\n"),
        }
    }
}

impl From<&str> for Document {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Document {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

/// Shared state threaded through every task of a run.
///
/// Documents, approvals, and the message log are the only channel between
/// nodes. The message log is append-only. The cancellation token is not
/// serialized; clones of the state share it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunState {
    documents: BTreeMap<String, Document>,
    approvals: BTreeMap<String, bool>,
    messages: Vec<Message>,
    #[serde(default)]
    attempts: BTreeMap<String, u32>,
    #[serde(skip)]
    cancel: CancellationToken,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a state seeded with initial messages.
    pub fn seeded(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    // ── Documents ───────────────────────────────────────────

    pub fn documents(&self) -> &BTreeMap<String, Document> {
        &self.documents
    }

    pub fn get_document(&self, key: &str) -> Option<&Document> {
        self.documents.get(key)
    }

    /// Get a document a node depends on. A missing key is a broken contract
    /// between nodes, never a default.
    pub fn document(&self, key: &str) -> Result<&Document> {
        self.documents
            .get(key)
            .ok_or_else(|| PipewrightError::MissingState(format!("document {}", key)))
    }

    pub fn text(&self, key: &str) -> Result<&str> {
        self.document(key)?
            .as_text()
            .ok_or_else(|| PipewrightError::StateShape {
                key: key.to_string(),
                expected: "text",
            })
    }

    pub fn files(&self, key: &str) -> Result<&BTreeMap<String, String>> {
        self.document(key)?
            .as_files()
            .ok_or_else(|| PipewrightError::StateShape {
                key: key.to_string(),
                expected: "a file map",
            })
    }

    /// Insert or replace a document. Returns true if the content changed.
    pub fn add_document(&mut self, key: impl Into<String>, doc: impl Into<Document>) -> bool {
        let key = key.into();
        let doc = doc.into();
        if self.documents.get(&key) == Some(&doc) {
            return false;
        }
        self.documents.insert(key, doc);
        true
    }

    /// Look up a document by name: a top-level text document, or a file in
    /// the generated code map.
    pub fn find_document(&self, name: &str) -> Option<&str> {
        if let Some(doc) = self.documents.get(name) {
            return doc.as_text();
        }
        self.code_files()
            .and_then(|files| files.get(name))
            .map(|s| s.as_str())
    }

    /// Replace the content of an existing text document or code file.
    /// Returns false when no such document exists. File maps are not text
    /// documents and are never replaced here.
    pub fn update_document(&mut self, name: &str, content: impl Into<String>) -> bool {
        let content = content.into();
        match self.documents.get_mut(name) {
            Some(Document::Text(text)) => {
                *text = content;
                return true;
            }
            Some(Document::Files(_)) => return false,
            None => {}
        }
        if let Some(Document::Files(files)) = self.documents.get_mut(CODE_KEY) {
            if let Some(file) = files.get_mut(name) {
                *file = content;
                return true;
            }
        }
        false
    }

    /// Remove a document or code file. Returns false when no such document exists.
    pub fn remove_document(&mut self, name: &str) -> bool {
        if self.documents.remove(name).is_some() {
            return true;
        }
        match self.documents.get_mut(CODE_KEY) {
            Some(Document::Files(files)) => files.remove(name).is_some(),
            _ => false,
        }
    }

    fn code_files(&self) -> Option<&BTreeMap<String, String>> {
        self.documents.get(CODE_KEY).and_then(|d| d.as_files())
    }

    // ── Approvals ───────────────────────────────────────────

    pub fn approvals(&self) -> &BTreeMap<String, bool> {
        &self.approvals
    }

    pub fn set_approval(&mut self, stage: impl Into<String>, approved: bool) {
        self.approvals.insert(stage.into(), approved);
    }

    /// Whether a stage has been approved. Absent means not approved.
    pub fn is_approved(&self, stage: &str) -> bool {
        self.approvals.get(stage).copied().unwrap_or(false)
    }

    /// Whether a stage has been judged and rejected.
    pub fn is_rejected(&self, stage: &str) -> bool {
        self.approvals.get(stage) == Some(&false)
    }

    /// True only when at least one approval exists and all are true.
    pub fn is_fully_approved(&self) -> bool {
        !self.approvals.is_empty() && self.approvals.values().all(|v| *v)
    }

    // ── Attempts ────────────────────────────────────────────

    pub fn attempts(&self, stage: &str) -> u32 {
        self.attempts.get(stage).copied().unwrap_or(0)
    }

    /// Count one more judgment of a stage, returning the new total.
    pub fn record_attempt(&mut self, stage: &str) -> u32 {
        let count = self.attempts.entry(stage.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    // ── Messages ────────────────────────────────────────────

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn push_message(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn last_message(&self) -> Result<&Message> {
        self.messages
            .last()
            .ok_or_else(|| PipewrightError::MissingState("messages".to_string()))
    }

    // ── Cancellation ────────────────────────────────────────

    /// Token that cancels this run when triggered from outside.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
