use std::io::Write;

use pipewright_agent::{GatePolicy, Pipeline, Stage, Step};
use pipewright_core::config::AppConfig;

#[test]
fn test_load_full_config_from_file() {
    let toml_content = r#"
[model]
provider = "anthropic"
model_id = "claude-sonnet-4-20250514"
api_key = "sk-test-key"
max_tokens = 4096
temperature = 0.5

[[fallback_models]]
provider = "openai"
model_id = "gpt-4o"
base_url = "http://localhost:8080/v1"

[retry]
max_retries = 5
initial_backoff_ms = 200

[pipeline]
max_retries = 2
max_generation_attempts = 4
repair = false
max_steps = 60
workdir = "/tmp/pipewright-work"
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.model.provider, "anthropic");
    assert_eq!(config.model.model_id, "claude-sonnet-4-20250514");
    assert_eq!(config.model.api_key, Some("sk-test-key".to_string()));
    assert_eq!(config.model.max_tokens, 4096);

    assert_eq!(config.fallback_models.len(), 1);
    assert_eq!(
        config.fallback_models[0].base_url.as_deref(),
        Some("http://localhost:8080/v1")
    );

    assert_eq!(config.retry.max_retries, 5);
    assert_eq!(config.retry.initial_backoff_ms, 200);
    assert_eq!(config.retry.max_backoff_ms, 30000);

    assert_eq!(config.pipeline.max_retries, 2);
    assert!(!config.pipeline.repair);
    assert_eq!(config.pipeline.max_steps, Some(60));
    assert_eq!(config.pipeline.workdir, "/tmp/pipewright-work");

    let policy = GatePolicy::from(&config.pipeline);
    assert_eq!(policy.max_retries, 2);
    assert_eq!(policy.max_generation_attempts, 4);
}

#[test]
fn test_env_var_expansion_in_config() {
    std::env::set_var("PIPEWRIGHT_TEST_API_KEY", "expanded-key-value");

    let toml_content = r#"
[model]
model_id = "test-model"
api_key = "${PIPEWRIGHT_TEST_API_KEY}"
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");
    assert_eq!(config.model.api_key, Some("expanded-key-value".to_string()));

    std::env::remove_var("PIPEWRIGHT_TEST_API_KEY");
}

#[test]
fn test_pipeline_builds_from_minimal_config() {
    let (config, _file) = pipewright_test_utils::config_from_toml(
        r#"
[model]
model_id = "llama3.2"
"#,
    )
    .expect("load config");

    let pipeline = Pipeline::from_config(&config).expect("build pipeline");
    assert_eq!(pipeline.graph().start(), Step::Produce(Stage::Design));
    assert_eq!(pipeline.graph().nodes().len(), 10);
}

#[test]
fn test_config_round_trips_through_toml() {
    let (config, _file) = pipewright_test_utils::config_from_toml(
        r#"
[model]
model_id = "gpt-4o"

[pipeline]
max_retries = 1
"#,
    )
    .expect("load config");

    let printed = toml::to_string_pretty(&config).expect("serialize");
    let reparsed = AppConfig::parse(&printed).expect("reparse");
    assert_eq!(reparsed.model.model_id, "gpt-4o");
    assert_eq!(reparsed.pipeline.max_retries, 1);
    assert_eq!(reparsed.pipeline.max_generation_attempts, 2);
}
