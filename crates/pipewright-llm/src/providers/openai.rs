use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use pipewright_core::config::ModelConfig;
use pipewright_core::error::{PipewrightError, Result};
use pipewright_core::traits::LlmClient;
use pipewright_core::types::{Message, Role};

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// OpenAI-compatible client. Works with OpenAI, Ollama, vLLM, Groq, OpenRouter, etc.
pub struct OpenAiClient {
    http: Client,
}

impl OpenAiClient {
    pub fn new(timeout_secs: u64) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { http }
    }
}

impl Default for OpenAiClient {
    fn default() -> Self {
        Self::new(300)
    }
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<OaiMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct ResponseFormat {
    r#type: &'static str,
}

#[derive(Serialize, Debug, PartialEq)]
struct OaiMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Tool results have no call id here, so they travel as user turns.
fn convert_messages(messages: Vec<Message>) -> Vec<OaiMessage> {
    messages
        .into_iter()
        .map(|m| match m.role {
            Role::Tool => OaiMessage {
                role: "user",
                content: format!("Tool result:\n{}", m.content),
            },
            role => OaiMessage {
                role: role.as_str(),
                content: m.content,
            },
        })
        .collect()
}

fn parse_response(body: &str) -> Result<String> {
    let parsed: ChatResponse = serde_json::from_str(body)
        .map_err(|e| PipewrightError::LlmRequest(format!("unreadable response: {}", e)))?;
    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| PipewrightError::LlmRequest("response has no content".into()))
}

impl LlmClient for OpenAiClient {
    fn complete(
        &self,
        config: &ModelConfig,
        messages: Vec<Message>,
    ) -> BoxFuture<'_, Result<String>> {
        let config = config.clone();

        Box::pin(async move {
            let base_url = config.base_url.as_deref().unwrap_or(OPENAI_API_URL);

            let body = ChatRequest {
                model: config.model_id.clone(),
                messages: convert_messages(messages),
                max_tokens: config.max_tokens,
                temperature: (config.temperature > 0.0).then_some(config.temperature),
                response_format: ResponseFormat {
                    r#type: "json_object",
                },
            };

            let mut req = self.http.post(base_url).json(&body);
            if let Some(api_key) = &config.api_key {
                req = req.header("Authorization", format!("Bearer {}", api_key));
            }

            let response = req
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

            debug!(model = %config.model_id, bytes = text.len(), "Chat completion received");
            parse_response(&text)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_messages_maps_tool_role() {
        let converted = convert_messages(vec![
            Message::system("be terse"),
            Message::tool("[view_document] document not found: x"),
        ]);
        assert_eq!(converted[0].role, "system");
        assert_eq!(converted[1].role, "user");
        assert!(converted[1].content.starts_with("Tool result:"));
    }

    #[test]
    fn test_parse_response() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"{\"a\":1}"}}]}"#;
        assert_eq!(parse_response(body).unwrap(), r#"{"a":1}"#);
    }

    #[test]
    fn test_parse_response_without_content() {
        let body = r#"{"choices":[]}"#;
        assert!(matches!(
            parse_response(body),
            Err(PipewrightError::LlmRequest(_))
        ));
    }
}
