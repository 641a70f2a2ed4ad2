pub mod providers;
pub mod retry;

use pipewright_core::config::ModelConfig;
use pipewright_core::traits::LlmClient;

pub use providers::anthropic::AnthropicClient;
pub use providers::openai::OpenAiClient;
pub use retry::RetryingClient;

/// Create an LLM client based on the provider name.
pub fn create_client(config: &ModelConfig) -> Box<dyn LlmClient> {
    match config.provider.as_str() {
        "anthropic" | "claude" => Box::new(AnthropicClient::new(config.timeout_secs)),
        // Everything else speaks the OpenAI chat completions API
        _ => Box::new(OpenAiClient::new(config.timeout_secs)),
    }
}
