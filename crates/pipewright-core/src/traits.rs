use futures::future::BoxFuture;

use crate::config::ModelConfig;
use crate::error::Result;
use crate::state::RunState;
use crate::types::*;

/// LLM client: a single chat completion returning the response text.
pub trait LlmClient: Send + Sync + 'static {
    fn complete(
        &self,
        config: &ModelConfig,
        messages: Vec<Message>,
    ) -> BoxFuture<'_, Result<String>>;
}

/// Generation collaborator: produces a stage's artifacts.
///
/// The result must conform to `shape`; anything else is surfaced as
/// `MalformedGeneration`, never defaulted.
pub trait Generator: Send + Sync + 'static {
    fn generate<'a>(
        &'a self,
        stage: &'a str,
        prompt: Vec<Message>,
        shape: &'a Shape,
    ) -> BoxFuture<'a, Result<StructuredResult>>;
}

/// Judgment collaborator: approves or rejects a stage's artifacts.
pub trait Judge: Send + Sync + 'static {
    fn judge<'a>(
        &'a self,
        stage: &'a str,
        prompt: Vec<Message>,
        criteria: &'a [String],
    ) -> BoxFuture<'a, Result<Verdict>>;
}

/// Fix-up collaborator: repairs rejected documents in place before a stage
/// is regenerated.
pub trait Repairer: Send + Sync + 'static {
    fn repair<'a>(&'a self, stage: &'a str, state: &'a mut RunState) -> BoxFuture<'a, Result<()>>;
}

/// A document or command operation over the run state.
pub trait Tool: Send + Sync + 'static {
    /// Tool name (used in LLM tool calls).
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// JSON Schema for tool input.
    fn input_schema(&self) -> serde_json::Value;

    /// Execute the tool. Missing documents are reported as
    /// `ToolOutcome::NotFound`, not as errors.
    fn execute<'a>(
        &'a self,
        input: serde_json::Value,
        state: &'a mut RunState,
    ) -> BoxFuture<'a, Result<ToolOutcome>>;

    /// Timeout in seconds for this tool.
    fn timeout_secs(&self) -> u64 {
        30
    }
}
