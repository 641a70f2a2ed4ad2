//! The five-stage production pipeline: design, setup, implementation,
//! acceptance tests, unit tests. Each stage is an approval gate; an approved
//! stage hands over to the next one and the last approval ends the run.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use pipewright_core::config::AppConfig;
use pipewright_core::error::Result;
use pipewright_core::state::RunState;
use pipewright_core::traits::{LlmClient, Repairer};
use pipewright_core::types::Message;
use pipewright_llm::{create_client, RetryingClient};
use pipewright_tools::ToolRegistry;

use crate::assistant::Assistant;
use crate::gate::{ApprovalGate, Collaborators, GatePolicy};
use crate::generator::LlmGenerator;
use crate::graph::{CompiledGraph, ExecutionResult, Route, StateGraph};
use crate::judge::LlmJudge;
use crate::stage::Stage;

/// Node keys of the pipeline graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    Produce(Stage),
    Approve(Stage),
}

impl Step {
    pub fn stage(&self) -> Stage {
        match self {
            Step::Produce(s) | Step::Approve(s) => *s,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Produce(Stage::Design) => f.write_str("software_design"),
            Step::Produce(Stage::Setup) => f.write_str("environment_setup"),
            Step::Produce(stage) => f.write_str(stage.name()),
            Step::Approve(Stage::Design) => f.write_str("approve_software_design"),
            Step::Approve(Stage::Setup) => f.write_str("approve_environment_setup"),
            Step::Approve(stage) => write!(f, "approve_{}", stage.name()),
        }
    }
}

/// Build and compile the pipeline graph.
pub fn build_pipeline(
    collaborators: Collaborators,
    policy: GatePolicy,
) -> Result<CompiledGraph<Step>> {
    let mut graph = StateGraph::new();

    for stage in Stage::ALL {
        let forward = match stage.next() {
            Some(next) => Route::To(Step::Produce(next)),
            None => Route::End,
        };
        ApprovalGate::new(stage.spec(), collaborators.clone(), policy).install(
            &mut graph,
            Step::Produce(stage),
            Step::Approve(stage),
            forward,
        )?;
    }
    graph.set_entry(Step::Produce(Stage::Design))?;

    graph.compile()
}

/// Initial state for a run: the PRD as a document and the opening messages.
pub fn seed_state(prd: &str) -> RunState {
    let mut state = RunState::seeded(vec![
        Message::system(
            "You are a software team turning a product requirements document into a \
             tested Python project, one reviewed stage at a time.",
        ),
        Message::user(prd),
    ]);
    state.add_document("PRD", prd);
    state
}

/// The compiled pipeline with its LLM-backed collaborators.
pub struct Pipeline {
    graph: CompiledGraph<Step>,
}

impl Pipeline {
    pub fn new(graph: CompiledGraph<Step>) -> Self {
        Self { graph }
    }

    /// Wire the pipeline to the configured model, with retry and fallbacks.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let fallbacks = config
            .fallback_models
            .iter()
            .map(|m| (m.clone(), create_client(m)))
            .collect();
        let llm: Arc<dyn LlmClient> = Arc::new(RetryingClient::new(
            create_client(&config.model),
            fallbacks,
            config.retry.clone(),
        ));

        let repairer: Option<Arc<dyn Repairer>> = if config.pipeline.repair {
            let tools = Arc::new(ToolRegistry::with_builtins(PathBuf::from(
                &config.pipeline.workdir,
            )));
            Some(Arc::new(Assistant::new(llm.clone(), config.model.clone(), tools)))
        } else {
            None
        };

        let collaborators = Collaborators {
            generator: Arc::new(LlmGenerator::new(llm.clone(), config.model.clone())),
            judge: Arc::new(LlmJudge::new(llm, config.model.clone())),
            repairer,
        };

        let mut graph = build_pipeline(collaborators, GatePolicy::from(&config.pipeline))?;
        if let Some(max) = config.pipeline.max_steps {
            graph = graph.with_max_steps(max);
        }
        Ok(Self::new(graph))
    }

    pub fn graph(&self) -> &CompiledGraph<Step> {
        &self.graph
    }

    pub async fn run(&self, state: &mut RunState) -> Result<ExecutionResult<Step>> {
        info!(nodes = self.graph.nodes().len(), "Starting pipeline");
        self.graph.execute(state).await
    }
}
