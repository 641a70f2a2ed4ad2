use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

use pipewright_core::error::{PipewrightError, Result};
use pipewright_core::state::RunState;
use pipewright_core::traits::Tool;
use pipewright_core::types::{ToolDefinition, ToolOutcome};

use crate::builtin::{
    AddDocumentTool, BashTool, DeleteDocumentTool, UpdateDocumentTool, ViewDocumentTool,
};

/// Registry of available tools.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool.
    pub fn register(&mut self, tool: impl Tool) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(tool));
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// List all registered tools, sorted by name.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Tool definitions for the fix-up prompt, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .values()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.input_schema(),
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Execute a tool by name against the run state.
    pub async fn execute(
        &self,
        name: &str,
        input: serde_json::Value,
        state: &mut RunState,
    ) -> Result<ToolOutcome> {
        let tool = self
            .get(name)
            .ok_or_else(|| PipewrightError::ToolNotFound(name.to_string()))?;

        debug!(tool = %name, "Executing tool");
        let timeout = std::time::Duration::from_secs(tool.timeout_secs());

        match tokio::time::timeout(timeout, tool.execute(input, state)).await {
            Ok(result) => result,
            Err(_) => Err(PipewrightError::ToolTimeout {
                tool: name.to_string(),
                timeout_secs: tool.timeout_secs(),
            }),
        }
    }

    /// Document tools plus the command tool rooted at `working_dir`.
    pub fn with_builtins(working_dir: impl Into<PathBuf>) -> Self {
        let mut registry = Self::new();
        registry.register(ViewDocumentTool);
        registry.register(UpdateDocumentTool);
        registry.register(AddDocumentTool);
        registry.register(DeleteDocumentTool);
        registry.register(BashTool::new(working_dir));
        registry
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builtins_registered() {
        let registry = ToolRegistry::with_builtins(".");
        assert_eq!(
            registry.list(),
            vec![
                "add_document",
                "bash",
                "delete_document",
                "update_document",
                "view_document"
            ]
        );
        assert_eq!(registry.definitions().len(), 5);
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let registry = ToolRegistry::new();
        let mut state = RunState::new();
        let err = registry
            .execute("nope", json!({}), &mut state)
            .await
            .unwrap_err();
        assert!(matches!(err, PipewrightError::ToolNotFound(_)));
    }

    #[tokio::test]
    async fn test_execute_mutates_state() {
        let registry = ToolRegistry::with_builtins(".");
        let mut state = RunState::new();
        registry
            .execute(
                "add_document",
                json!({"document_name": "PRD", "content": "todo app"}),
                &mut state,
            )
            .await
            .unwrap();
        assert_eq!(state.text("PRD").unwrap(), "todo app");
    }
}
