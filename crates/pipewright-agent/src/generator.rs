use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{debug, warn};

use pipewright_core::config::ModelConfig;
use pipewright_core::error::{PipewrightError, Result};
use pipewright_core::traits::{Generator, LlmClient};
use pipewright_core::types::{FieldKind, Message, Shape, StructuredResult};

/// Generator backed by a chat-completion model.
///
/// The model is asked for a single JSON object; the reply is checked against
/// the stage's shape and anything that doesn't fit is a malformed result.
pub struct LlmGenerator {
    llm: Arc<dyn LlmClient>,
    config: ModelConfig,
}

impl LlmGenerator {
    pub fn new(llm: Arc<dyn LlmClient>, config: ModelConfig) -> Self {
        Self { llm, config }
    }
}

fn kind_hint(kind: FieldKind) -> &'static str {
    match kind {
        FieldKind::Text => "string",
        FieldKind::Flag => "boolean",
        FieldKind::Files => "object mapping file path to file content",
    }
}

/// Instruction listing the fields a reply must contain.
pub fn format_instruction(shape: &Shape) -> String {
    let fields: Vec<String> = shape
        .fields
        .iter()
        .map(|f| format!("- \"{}\" ({}): {}", f.name, kind_hint(f.kind), f.description))
        .collect();
    format!(
        "Respond with ONLY a JSON object containing exactly these fields:\n{}\n\
         Do not wrap it in prose.",
        fields.join("\n")
    )
}

impl Generator for LlmGenerator {
    fn generate<'a>(
        &'a self,
        stage: &'a str,
        mut prompt: Vec<Message>,
        shape: &'a Shape,
    ) -> BoxFuture<'a, Result<StructuredResult>> {
        Box::pin(async move {
            prompt.push(Message::user(format_instruction(shape)));
            let response = self.llm.complete(&self.config, prompt).await?;
            debug!(stage, len = response.len(), "Generation response received");

            let raw: serde_json::Value =
                serde_json::from_str(extract_json(&response)).map_err(|e| {
                    warn!(stage, error = %e, "Generation response is not JSON");
                    PipewrightError::MalformedGeneration {
                        stage: stage.to_string(),
                        reason: format!("invalid JSON: {}", e),
                    }
                })?;
            shape.validate(stage, &raw)
        })
    }
}

/// Pull the JSON payload out of a model reply: a fenced block if there is
/// one, otherwise the outermost braces.
pub(crate) fn extract_json(text: &str) -> &str {
    let trimmed = text.trim();
    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        // Skip a language tag such as ```json
        let body = match after.find('\n') {
            Some(nl) if !after[..nl].contains('{') && !after[..nl].contains('[') => &after[nl + 1..],
            _ => after,
        };
        if let Some(end) = body.find("```") {
            return body[..end].trim();
        }
    }
    let open = trimmed.find(['{', '[']);
    let close = trimmed.rfind(['}', ']']);
    if let (Some(start), Some(end)) = (open, close) {
        if start < end {
            return &trimmed[start..=end];
        }
    }
    trimmed
}
