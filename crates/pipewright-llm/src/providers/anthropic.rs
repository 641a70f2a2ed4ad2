use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use pipewright_core::config::ModelConfig;
use pipewright_core::error::{PipewrightError, Result};
use pipewright_core::traits::LlmClient;
use pipewright_core::types::{Message, Role};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicClient {
    http: Client,
}

impl AnthropicClient {
    pub fn new(timeout_secs: u64) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { http }
    }
}

#[derive(Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<ApiMessage>,
}

#[derive(Serialize, Debug)]
struct ApiMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

/// Split out system prompts and merge consecutive same-role turns, which the
/// messages API rejects.
fn convert_messages(messages: Vec<Message>) -> (Option<String>, Vec<ApiMessage>) {
    let mut system: Vec<String> = Vec::new();
    let mut out: Vec<ApiMessage> = Vec::new();

    for m in messages {
        let (role, content) = match m.role {
            Role::System => {
                system.push(m.content);
                continue;
            }
            Role::Assistant => ("assistant", m.content),
            Role::User => ("user", m.content),
            Role::Tool => ("user", format!("Tool result:\n{}", m.content)),
        };
        match out.last_mut() {
            Some(last) if last.role == role => {
                last.content.push_str("\n\n");
                last.content.push_str(&content);
            }
            _ => out.push(ApiMessage { role, content }),
        }
    }

    let system = (!system.is_empty()).then(|| system.join("\n\n"));
    (system, out)
}

impl LlmClient for AnthropicClient {
    fn complete(
        &self,
        config: &ModelConfig,
        messages: Vec<Message>,
    ) -> BoxFuture<'_, Result<String>> {
        let config = config.clone();

        Box::pin(async move {
            let api_key = config
                .api_key
                .as_deref()
                .ok_or_else(|| PipewrightError::Config("Anthropic API key not set".into()))?;
            let base_url = config.base_url.as_deref().unwrap_or(ANTHROPIC_API_URL);

            let (system, api_messages) = convert_messages(messages);
            let body = AnthropicRequest {
                model: config.model_id.clone(),
                max_tokens: config.max_tokens,
                temperature: (config.temperature > 0.0).then_some(config.temperature),
                system,
                messages: api_messages,
            };

            let response = self
                .http
                .post(base_url)
                .header("x-api-key", api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .header("content-type", "application/json")
                .json(&body)
                .send()
                .await
                .map_err(|e| PipewrightError::LlmRequest(e.to_string()))?;

            let status = response.status();
            let text = response
                .text()
                .await
                .map_err(|e| PipewrightError::LlmRequest(e.to_string()))?;
            if !status.is_success() {
                return Err(PipewrightError::LlmRequest(format!("HTTP {}: {}", status, text)));
            }

            let parsed: AnthropicResponse = serde_json::from_str(&text)
                .map_err(|e| PipewrightError::LlmRequest(format!("unreadable response: {}", e)))?;
            let content: String = parsed.content.into_iter().filter_map(|b| b.text).collect();

            debug!(model = %config.model_id, bytes = content.len(), "Message received");
            Ok(content)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_messages_splits_system_and_merges_turns() {
        let (system, msgs) = convert_messages(vec![
            Message::system("one"),
            Message::user("PRD"),
            Message::tool("done"),
            Message::assistant("ok"),
            Message::system("two"),
        ]);
        assert_eq!(system.as_deref(), Some("one\n\ntwo"));
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].role, "user");
        assert!(msgs[0].content.contains("Tool result:\ndone"));
        assert_eq!(msgs[1].role, "assistant");
    }
}
