//! Mocks and fixtures shared by the pipewright test suites.

use std::collections::{BTreeMap, VecDeque};
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use pipewright_core::config::{AppConfig, ModelConfig};
use pipewright_core::error::{PipewrightError, Result};
use pipewright_core::state::RunState;
use pipewright_core::traits::{Generator, Judge, LlmClient, Repairer};
use pipewright_core::types::{FieldKind, FieldValue, Message, Shape, StructuredResult, Verdict};

/// Generator that fills any shape with placeholder content.
///
/// Text fields become `"<stage> <field> #<call>"`, file maps hold one file
/// (`app/main.py` for generated code, `test_<field>.py` otherwise), flags
/// are true.
#[derive(Default)]
pub struct ScriptedGenerator {
    calls: AtomicUsize,
    fail_first: usize,
    prompts: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a malformed result for the first `n` calls.
    pub fn fail_first(mut self, n: usize) -> Self {
        self.fail_first = n;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every prompt received, in call order.
    pub fn prompts(&self) -> Vec<Vec<Message>> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

/// Placeholder result matching `shape`.
pub fn sample_result(stage: &str, shape: &Shape, call: usize) -> StructuredResult {
    shape
        .fields
        .iter()
        .map(|field| {
            let value = match field.kind {
                FieldKind::Text => FieldValue::Text(format!("{} {} #{}", stage, field.name, call)),
                FieldKind::Flag => FieldValue::Flag(true),
                FieldKind::Files => {
                    let path = if field.name == "code" {
                        "app/main.py".to_string()
                    } else {
                        format!("test_{}.py", field.name)
                    };
                    FieldValue::Files(BTreeMap::from([(path, format!("# {} #{}", field.name, call))]))
                }
            };
            (field.name.clone(), value)
        })
        .collect()
}

impl Generator for ScriptedGenerator {
    fn generate<'a>(
        &'a self,
        stage: &'a str,
        prompt: Vec<Message>,
        shape: &'a Shape,
    ) -> BoxFuture<'a, Result<StructuredResult>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt);
        }
        Box::pin(async move {
            if call <= self.fail_first {
                return Err(PipewrightError::MalformedGeneration {
                    stage: stage.to_string(),
                    reason: "scripted failure".to_string(),
                });
            }
            Ok(sample_result(stage, shape, call))
        })
    }
}

/// Judge that returns scripted verdicts in order, repeating the last one
/// once the script runs out.
pub struct ScriptedJudge {
    verdicts: Mutex<VecDeque<Verdict>>,
    last: Mutex<Option<Verdict>>,
    calls: AtomicUsize,
    stages: Mutex<Vec<String>>,
    cancel: Option<CancellationToken>,
}

fn verdict(approved: bool) -> Verdict {
    Verdict {
        approved,
        criteria: BTreeMap::new(),
        message: if approved {
            "Approved.".to_string()
        } else {
            "Rejected: please revise.".to_string()
        },
    }
}

impl ScriptedJudge {
    pub fn new(verdicts: Vec<Verdict>) -> Self {
        Self {
            verdicts: Mutex::new(verdicts.into()),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
            stages: Mutex::new(Vec::new()),
            cancel: None,
        }
    }

    pub fn sequence(decisions: impl IntoIterator<Item = bool>) -> Self {
        Self::new(decisions.into_iter().map(verdict).collect())
    }

    pub fn always(approved: bool) -> Self {
        Self::new(vec![verdict(approved)])
    }

    /// Cancel the given token on every call, simulating a user interrupt
    /// that lands while a review is in flight.
    pub fn cancelling(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Stage names judged, in call order.
    pub fn stages(&self) -> Vec<String> {
        self.stages.lock().map(|s| s.clone()).unwrap_or_default()
    }

    fn next_verdict(&self) -> Verdict {
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        let mut queue = self.verdicts.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(v) = queue.pop_front() {
            *last = Some(v);
        }
        last.clone().unwrap_or_else(|| verdict(true))
    }
}

impl Judge for ScriptedJudge {
    fn judge<'a>(
        &'a self,
        stage: &'a str,
        _prompt: Vec<Message>,
        _criteria: &'a [String],
    ) -> BoxFuture<'a, Result<Verdict>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut stages) = self.stages.lock() {
            stages.push(stage.to_string());
        }
        if let Some(token) = &self.cancel {
            token.cancel();
        }
        let verdict = self.next_verdict();
        Box::pin(async move { Ok(verdict) })
    }
}

/// Repairer that only counts calls and leaves a marker message.
#[derive(Default)]
pub struct CountingRepairer {
    calls: AtomicUsize,
}

impl CountingRepairer {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Repairer for CountingRepairer {
    fn repair<'a>(&'a self, stage: &'a str, state: &'a mut RunState) -> BoxFuture<'a, Result<()>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        state.push_message(Message::tool(format!("[repair] {}", stage)));
        Box::pin(async { Ok(()) })
    }
}

/// LLM client that replays canned responses and records each request.
pub struct MockLlmClient {
    responses: Mutex<VecDeque<Result<String>>>,
    requests: Mutex<Vec<Vec<Message>>>,
}

impl MockLlmClient {
    pub fn new(responses: impl IntoIterator<Item = String>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(Ok).collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue an error response.
    pub fn with_error(self, error: PipewrightError) -> Self {
        if let Ok(mut responses) = self.responses.lock() {
            responses.push_back(Err(error));
        }
        self
    }

    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl LlmClient for MockLlmClient {
    fn complete(
        &self,
        _config: &ModelConfig,
        messages: Vec<Message>,
    ) -> BoxFuture<'_, Result<String>> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(messages);
        }
        let next = self
            .responses
            .lock()
            .ok()
            .and_then(|mut r| r.pop_front())
            .unwrap_or_else(|| Err(PipewrightError::LlmRequest("no scripted response".into())));
        Box::pin(async move { next })
    }
}

/// Minimal model config for tests.
pub fn test_model() -> ModelConfig {
    ModelConfig {
        provider: "openai".into(),
        model_id: "test-model".into(),
        api_key: None,
        base_url: Some("http://127.0.0.1:9".into()),
        max_tokens: 1024,
        temperature: 0.0,
        timeout_secs: 5,
    }
}

/// A state seeded the way a run starts: the PRD document and the opening
/// messages.
pub fn seeded_state(prd: &str) -> RunState {
    let mut state = RunState::seeded(vec![
        Message::system("You are producing a software project from a PRD."),
        Message::user(prd),
    ]);
    state.add_document("PRD", prd);
    state
}

/// Write `content` to a temporary TOML file and parse it as the app config.
pub fn config_from_toml(content: &str) -> Result<(AppConfig, tempfile::NamedTempFile)> {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile()?;
    file.write_all(content.as_bytes())?;
    let config = AppConfig::load(file.path())?;
    Ok((config, file))
}
