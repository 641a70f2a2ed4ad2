use std::sync::Arc;

use futures::future::BoxFuture;
use serde::Deserialize;
use tracing::{info, warn};

use pipewright_core::config::ModelConfig;
use pipewright_core::error::Result;
use pipewright_core::state::RunState;
use pipewright_core::traits::{LlmClient, Repairer};
use pipewright_core::types::{Message, ToolOutcome};
use pipewright_tools::ToolRegistry;

use crate::generator::extract_json;

const MAX_TOOL_CALLS: usize = 16;

/// Fix-up assistant: asks the model for document edits after a rejection and
/// applies them through the tool registry.
///
/// Failed requests and tool failures are recorded in the message log and
/// never abort the run;
/// the stage is regenerated afterwards either way.
pub struct Assistant {
    llm: Arc<dyn LlmClient>,
    config: ModelConfig,
    tools: Arc<ToolRegistry>,
}

#[derive(Debug, Deserialize)]
struct ToolCall {
    tool: String,
    #[serde(default)]
    input: serde_json::Value,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ToolCalls {
    List(Vec<ToolCall>),
    Wrapped { calls: Vec<ToolCall> },
}

impl Assistant {
    pub fn new(llm: Arc<dyn LlmClient>, config: ModelConfig, tools: Arc<ToolRegistry>) -> Self {
        Self { llm, config, tools }
    }

    fn prompt(&self, stage: &str, feedback: &str, state: &RunState) -> Result<Vec<Message>> {
        let tools = serde_json::to_string_pretty(&self.tools.definitions())?;
        let documents: Vec<&str> = state.documents().keys().map(|k| k.as_str()).collect();
        Ok(vec![
            Message::system(format!(
                "You fix documents rejected in review. Available tools:\n{}\n\
                 Respond with ONLY a JSON array of calls: [{{\"tool\": \"<name>\", \"input\": {{...}}}}]. \
                 Respond with [] if nothing should change.",
                tools
            )),
            Message::user(format!(
                "Stage: {}\nDocuments: {}\nReviewer feedback:\n{}",
                stage,
                documents.join(", "),
                feedback
            )),
        ])
    }

    async fn run_calls(&self, stage: &str, calls: Vec<ToolCall>, state: &mut RunState) {
        for call in calls.into_iter().take(MAX_TOOL_CALLS) {
            let record = match self.tools.execute(&call.tool, call.input, state).await {
                Ok(outcome) => {
                    if let ToolOutcome::NotFound(name) = &outcome {
                        warn!(stage, tool = %call.tool, document = %name, "Document not found");
                    }
                    outcome.describe(&call.tool)
                }
                Err(e) => {
                    warn!(stage, tool = %call.tool, error = %e, "Tool call failed");
                    format!("[{}] error: {}", call.tool, e)
                }
            };
            state.push_message(Message::tool(record));
        }
    }
}

impl Repairer for Assistant {
    fn repair<'a>(&'a self, stage: &'a str, state: &'a mut RunState) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let feedback = state.last_message()?.content.clone();
            let prompt = self.prompt(stage, &feedback, state)?;
            let response = match self.llm.complete(&self.config, prompt).await {
                Ok(response) => response,
                Err(e) => {
                    warn!(stage, error = %e, "Fix-up request failed, skipping repair");
                    state.push_message(Message::tool(format!("[assistant] request failed: {}", e)));
                    return Ok(());
                }
            };

            let calls = match serde_json::from_str::<ToolCalls>(extract_json(&response)) {
                Ok(ToolCalls::List(calls)) | Ok(ToolCalls::Wrapped { calls }) => calls,
                Err(e) => {
                    warn!(stage, error = %e, "Unparseable fix-up response, skipping repair");
                    state.push_message(Message::tool(format!(
                        "[assistant] no usable tool calls: {}",
                        e
                    )));
                    return Ok(());
                }
            };

            info!(stage, calls = calls.len(), "Applying fix-up tool calls");
            self.run_calls(stage, calls, state).await;
            Ok(())
        })
    }
}
