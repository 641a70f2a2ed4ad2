//! Approval-gated stage: a production node, an approval node, and a router
//! that loops back on rejection.
//!
//! The gate is written once and installed for every stage. The retry bound
//! is enforced by the approval node, so the router stays a pure read of the
//! state.

use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{info, warn};

use pipewright_core::config::PipelineConfig;
use pipewright_core::error::{PipewrightError, Result};
use pipewright_core::state::{Document, RunState};
use pipewright_core::traits::{Generator, Judge, Repairer};
use pipewright_core::types::{FieldValue, Message, StructuredResult, Verdict};

use crate::graph::{NodeKey, Route, StateGraph, Task};
use crate::stage::StageSpec;

/// Limits applied by every gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatePolicy {
    /// Regenerations allowed after a rejection.
    pub max_retries: u32,
    /// Attempts per node when a collaborator returns a malformed result.
    pub max_generation_attempts: u32,
}

impl Default for GatePolicy {
    fn default() -> Self {
        Self::from(&PipelineConfig::default())
    }
}

impl From<&PipelineConfig> for GatePolicy {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            max_generation_attempts: config.max_generation_attempts.max(1),
        }
    }
}

/// The collaborators a gate calls out to.
#[derive(Clone)]
pub struct Collaborators {
    pub generator: Arc<dyn Generator>,
    pub judge: Arc<dyn Judge>,
    pub repairer: Option<Arc<dyn Repairer>>,
}

/// One approval-gated stage.
pub struct ApprovalGate {
    spec: Arc<StageSpec>,
    collaborators: Collaborators,
    policy: GatePolicy,
}

impl ApprovalGate {
    pub fn new(spec: StageSpec, collaborators: Collaborators, policy: GatePolicy) -> Self {
        Self {
            spec: Arc::new(spec),
            collaborators,
            policy,
        }
    }

    pub fn spec(&self) -> &StageSpec {
        &self.spec
    }

    pub fn production_task(&self) -> ProductionTask {
        ProductionTask {
            spec: self.spec.clone(),
            generator: self.collaborators.generator.clone(),
            repairer: self.collaborators.repairer.clone(),
            policy: self.policy,
        }
    }

    pub fn approval_task(&self) -> ApprovalTask {
        ApprovalTask {
            spec: self.spec.clone(),
            judge: self.collaborators.judge.clone(),
            policy: self.policy,
        }
    }

    /// Add the gate's two nodes and their transitions to a graph.
    ///
    /// `forward` is where an approved stage goes: the next stage's production
    /// node, or [`Route::End`].
    pub fn install<K: NodeKey>(
        &self,
        graph: &mut StateGraph<K>,
        produce: K,
        approve: K,
        forward: Route<K>,
    ) -> Result<()> {
        let stage = self.spec.name.clone();
        graph
            .add_node(produce, self.production_task())?
            .add_node(approve, self.approval_task())?
            .add_edge(produce, approve)?
            .add_conditional_edges(
                approve,
                move |state: &RunState| route_after_review(state, &stage, produce, forward),
                [Route::To(produce), forward, Route::End],
            )?;
        Ok(())
    }
}

/// Route after a stage's review: cancelled runs end, approved stages move
/// forward, rejected stages are produced again.
pub fn route_after_review<K: NodeKey>(
    state: &RunState,
    stage: &str,
    produce: K,
    forward: Route<K>,
) -> Route<K> {
    if state.is_cancelled() {
        Route::End
    } else if state.is_approved(stage) {
        forward
    } else {
        Route::To(produce)
    }
}

/// Produces a stage's documents through the generator.
pub struct ProductionTask {
    spec: Arc<StageSpec>,
    generator: Arc<dyn Generator>,
    repairer: Option<Arc<dyn Repairer>>,
    policy: GatePolicy,
}

impl ProductionTask {
    async fn produce(&self, state: &mut RunState) -> Result<()> {
        let stage = self.spec.name.as_str();

        let feedback = if state.is_rejected(stage) {
            let feedback = state.last_message()?.content.clone();
            if let Some(repairer) = &self.repairer {
                info!(stage, "Repairing rejected documents");
                repairer.repair(stage, state).await?;
            }
            Some(feedback)
        } else {
            None
        };

        let prompt = self.spec.production_prompt(state, feedback.as_deref())?;

        let mut attempt = 0;
        let result = loop {
            attempt += 1;
            let generated = self
                .generator
                .generate(stage, prompt.clone(), &self.spec.shape)
                .await
                .and_then(|result| self.check(result));

            match generated {
                Ok(result) => break result,
                Err(PipewrightError::MalformedGeneration { reason, .. }) => {
                    warn!(stage, attempt, %reason, "Malformed generation");
                    if attempt >= self.policy.max_generation_attempts {
                        return Err(PipewrightError::GenerationExhausted {
                            stage: stage.to_string(),
                            attempts: attempt,
                        });
                    }
                }
                Err(e) => return Err(e),
            }
        };

        self.apply(result, state);
        Ok(())
    }

    /// A generator may return a map that skipped fields; that is malformed
    /// too.
    fn check(&self, mut result: StructuredResult) -> Result<StructuredResult> {
        let mut checked = StructuredResult::new();
        for field in &self.spec.shape.fields {
            let value = result.remove(&field.name).ok_or_else(|| {
                PipewrightError::MalformedGeneration {
                    stage: self.spec.name.clone(),
                    reason: format!("missing field {}", field.name),
                }
            })?;
            checked.insert(field.name.clone(), value);
        }
        Ok(checked)
    }

    fn apply(&self, result: StructuredResult, state: &mut RunState) {
        let stage = self.spec.name.as_str();
        let mut changed = Vec::new();

        for (field, value) in result {
            if self.spec.is_status_field(&field) {
                if let FieldValue::Text(text) = value {
                    state.push_message(Message::assistant(text));
                }
                continue;
            }
            let doc = match value {
                FieldValue::Text(text) => Document::Text(text),
                FieldValue::Files(files) => Document::Files(files),
                FieldValue::Flag(flag) => Document::Text(flag.to_string()),
            };
            if state.add_document(field.clone(), doc) {
                changed.push(field);
            }
        }

        info!(stage, changed = ?changed, "Stage produced");
    }
}

impl Task for ProductionTask {
    fn run<'a>(&'a self, state: &'a mut RunState) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.produce(state))
    }
}

/// Reviews a stage's documents through the judge and records the decision.
pub struct ApprovalTask {
    spec: Arc<StageSpec>,
    judge: Arc<dyn Judge>,
    policy: GatePolicy,
}

impl ApprovalTask {
    async fn review(&self, state: &mut RunState) -> Result<()> {
        let stage = self.spec.name.as_str();
        let prompt = self.spec.review_prompt(state)?;

        let mut attempt = 0;
        let verdict = loop {
            attempt += 1;
            let judged = self
                .judge
                .judge(stage, prompt.clone(), &self.spec.criteria)
                .await
                .and_then(|verdict| self.decide(verdict));

            match judged {
                Ok(verdict) => break verdict,
                Err(PipewrightError::MalformedJudgment { reason, .. })
                    if attempt < self.policy.max_generation_attempts =>
                {
                    warn!(stage, attempt, %reason, "Malformed judgment, asking again");
                }
                Err(e) => return Err(e),
            }
        };

        let attempts = state.record_attempt(stage);
        state.set_approval(stage, verdict.approved);
        state.push_message(Message::assistant(verdict.message.clone()));

        info!(stage, approved = verdict.approved, attempts, "Stage reviewed");

        if !verdict.approved && attempts > self.policy.max_retries {
            warn!(stage, attempts, "Retries exhausted");
            return Err(PipewrightError::RetriesExhausted {
                stage: stage.to_string(),
                attempts,
            });
        }
        Ok(())
    }

    /// Approval requires every stage criterion to be decided and true. A
    /// verdict with no per-criterion detail stands on its own flag.
    fn decide(&self, verdict: Verdict) -> Result<Verdict> {
        if verdict.criteria.is_empty() {
            return Ok(verdict);
        }
        let mut approved = verdict.approved;
        for criterion in &self.spec.criteria {
            match verdict.criteria.get(criterion) {
                Some(ok) => approved &= *ok,
                None => {
                    return Err(PipewrightError::MalformedJudgment {
                        stage: self.spec.name.clone(),
                        reason: format!("no decision for {}", criterion),
                    })
                }
            }
        }
        Ok(Verdict { approved, ..verdict })
    }
}

impl Task for ApprovalTask {
    fn run<'a>(&'a self, state: &'a mut RunState) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.review(state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Termination;
    use pipewright_core::types::{Field, FieldKind, Shape};
    use crate::assistant::Assistant;
    use pipewright_test_utils::{test_model, MockLlmClient, ScriptedGenerator, ScriptedJudge};
    use pipewright_tools::ToolRegistry;
    use std::collections::BTreeMap;

    fn tiny_spec() -> StageSpec {
        StageSpec {
            name: "design".into(),
            shape: Shape::new(vec![
                Field::new("UML_class", FieldKind::Text, "class diagram"),
                Field::new("design_message", FieldKind::Text, "status"),
            ]),
            criteria: vec!["UML_class".into()],
            inputs: vec!["PRD".into()],
            review_inputs: vec!["UML_class".into()],
            status_fields: vec!["design_message".into()],
            instructions: "design it".into(),
            review_instructions: "review it".into(),
        }
    }

    fn seeded() -> RunState {
        let mut state = RunState::seeded(vec![Message::user("build a todo app")]);
        state.add_document("PRD", "A todo app");
        state
    }

    fn single_gate(
        generator: Arc<ScriptedGenerator>,
        judge: Arc<ScriptedJudge>,
        policy: GatePolicy,
    ) -> crate::graph::CompiledGraph<&'static str> {
        gate_with_repairer(generator, judge, None, policy)
    }

    fn gate_with_repairer(
        generator: Arc<ScriptedGenerator>,
        judge: Arc<ScriptedJudge>,
        repairer: Option<Arc<dyn Repairer>>,
        policy: GatePolicy,
    ) -> crate::graph::CompiledGraph<&'static str> {
        let gate = ApprovalGate::new(
            tiny_spec(),
            Collaborators {
                generator,
                judge,
                repairer,
            },
            policy,
        );
        let mut graph = StateGraph::new();
        gate.install(&mut graph, "produce", "approve", Route::End).unwrap();
        graph.set_entry("produce").unwrap();
        graph.compile().unwrap()
    }

    #[tokio::test]
    async fn test_rejected_then_approved_runs_each_node_twice() {
        let generator = Arc::new(ScriptedGenerator::new());
        let judge = Arc::new(ScriptedJudge::sequence([false, true]));
        let graph = single_gate(generator.clone(), judge.clone(), GatePolicy::default());

        let mut state = seeded();
        let result = graph.execute(&mut state).await.unwrap();

        assert_eq!(result.path(), vec!["produce", "approve", "produce", "approve"]);
        assert_eq!(result.termination, Termination::EndMarker);
        assert_eq!(generator.calls(), 2);
        assert_eq!(judge.calls(), 2);
        assert!(state.is_approved("design"));
        assert_eq!(state.attempts("design"), 2);
        assert!(state.get_document("design_message").is_none());
    }

    #[tokio::test]
    async fn test_approval_recorded_only_by_accepting_review() {
        let gate = ApprovalGate::new(
            tiny_spec(),
            Collaborators {
                generator: Arc::new(ScriptedGenerator::new()),
                judge: Arc::new(ScriptedJudge::sequence([false, true])),
                repairer: None,
            },
            GatePolicy::default(),
        );
        let produce = gate.production_task();
        let approve = gate.approval_task();

        let mut state = seeded();
        produce.run(&mut state).await.unwrap();
        assert!(!state.approvals().contains_key("design"));

        approve.run(&mut state).await.unwrap();
        assert!(!state.is_approved("design"));
        assert!(state.is_rejected("design"));

        produce.run(&mut state).await.unwrap();
        assert!(!state.is_approved("design"));

        approve.run(&mut state).await.unwrap();
        assert!(state.is_approved("design"));
        assert_eq!(state.attempts("design"), 2);
    }

    #[tokio::test]
    async fn test_failed_fix_up_request_still_regenerates() {
        let generator = Arc::new(ScriptedGenerator::new());
        let judge = Arc::new(ScriptedJudge::sequence([false, true]));
        let llm = Arc::new(
            MockLlmClient::new(Vec::<String>::new())
                .with_error(PipewrightError::LlmRequest("HTTP 503".into())),
        );
        let assistant = Assistant::new(
            llm.clone(),
            test_model(),
            Arc::new(ToolRegistry::with_builtins(".")),
        );
        let graph = gate_with_repairer(
            generator.clone(),
            judge,
            Some(Arc::new(assistant)),
            GatePolicy::default(),
        );

        let mut state = seeded();
        let result = graph.execute(&mut state).await.unwrap();

        assert_eq!(result.path(), vec!["produce", "approve", "produce", "approve"]);
        assert_eq!(llm.requests().len(), 1);
        assert_eq!(generator.calls(), 2);
        assert!(state.is_approved("design"));
        assert!(state
            .messages()
            .iter()
            .any(|m| m.content.contains("HTTP 503")));
    }

    #[tokio::test]
    async fn test_rejection_feedback_reaches_next_prompt() {
        let generator = Arc::new(ScriptedGenerator::new());
        let judge = Arc::new(ScriptedJudge::new(vec![
            Verdict::from_criteria(BTreeMap::from([("UML_class".into(), false)]), "add a Todo class"),
            Verdict::from_criteria(BTreeMap::from([("UML_class".into(), true)]), "ok"),
        ]));
        let graph = single_gate(generator.clone(), judge, GatePolicy::default());

        let mut state = seeded();
        graph.execute(&mut state).await.unwrap();

        let prompts = generator.prompts();
        assert_eq!(prompts.len(), 2);
        let last = prompts[1].last().unwrap();
        assert!(last.content.contains("add a Todo class"));
    }

    #[tokio::test]
    async fn test_always_rejected_exhausts_retries() {
        let generator = Arc::new(ScriptedGenerator::new());
        let judge = Arc::new(ScriptedJudge::always(false));
        let policy = GatePolicy {
            max_retries: 3,
            max_generation_attempts: 1,
        };
        let graph = single_gate(generator.clone(), judge.clone(), policy);

        let mut state = seeded();
        let err = graph.execute(&mut state).await.unwrap_err();

        assert_eq!(err.node(), Some("approve"));
        assert!(matches!(
            err.root(),
            PipewrightError::RetriesExhausted { stage, attempts: 4 } if stage == "design"
        ));
        assert_eq!(generator.calls(), 4);
        assert_eq!(judge.calls(), 4);
        assert!(state.is_rejected("design"));
    }

    #[tokio::test]
    async fn test_malformed_generation_is_retried() {
        let generator = Arc::new(ScriptedGenerator::new().fail_first(1));
        let judge = Arc::new(ScriptedJudge::always(true));
        let graph = single_gate(generator.clone(), judge, GatePolicy::default());

        let mut state = seeded();
        let result = graph.execute(&mut state).await.unwrap();
        assert_eq!(result.path(), vec!["produce", "approve"]);
        assert_eq!(generator.calls(), 2);
        assert!(state.text("UML_class").is_ok());
    }

    #[tokio::test]
    async fn test_malformed_generation_exhausts() {
        let generator = Arc::new(ScriptedGenerator::new().fail_first(5));
        let judge = Arc::new(ScriptedJudge::always(true));
        let policy = GatePolicy {
            max_retries: 3,
            max_generation_attempts: 2,
        };
        let graph = single_gate(generator.clone(), judge.clone(), policy);

        let mut state = seeded();
        let err = graph.execute(&mut state).await.unwrap_err();
        assert_eq!(err.node(), Some("produce"));
        assert!(matches!(
            err.root(),
            PipewrightError::GenerationExhausted { attempts: 2, .. }
        ));
        assert_eq!(judge.calls(), 0);
        assert!(state.get_document("UML_class").is_none());
    }

    #[tokio::test]
    async fn test_missing_criterion_is_malformed_judgment() {
        let generator = Arc::new(ScriptedGenerator::new());
        let judge = Arc::new(ScriptedJudge::new(vec![Verdict::from_criteria(
            BTreeMap::from([("something_else".into(), true)]),
            "ok",
        )]));
        let policy = GatePolicy {
            max_retries: 3,
            max_generation_attempts: 1,
        };
        let graph = single_gate(generator, judge, policy);

        let mut state = seeded();
        let err = graph.execute(&mut state).await.unwrap_err();
        assert!(matches!(err.root(), PipewrightError::MalformedJudgment { .. }));
        assert_eq!(state.attempts("design"), 0);
    }

    #[tokio::test]
    async fn test_cancelled_during_review_routes_to_end() {
        let mut state = seeded();
        let generator = Arc::new(ScriptedGenerator::new());
        let judge = Arc::new(ScriptedJudge::always(false).cancelling(state.cancellation_token()));
        let graph = single_gate(generator.clone(), judge, GatePolicy::default());

        let result = graph.execute(&mut state).await.unwrap();
        assert_eq!(result.path(), vec!["produce", "approve"]);
        assert_eq!(result.termination, Termination::EndMarker);
        assert_eq!(generator.calls(), 1);
    }

    #[test]
    fn test_router_is_pure() {
        let mut state = RunState::new();
        let route = |s: &RunState| route_after_review(s, "setup", "setup", Route::To("implementation"));
        assert_eq!(route(&state), Route::To("setup"));
        state.set_approval("setup", true);
        assert_eq!(route(&state), Route::To("implementation"));
        assert_eq!(route(&state), route(&state));
        state.cancel();
        assert_eq!(route(&state), Route::End);
    }

    #[test]
    fn test_policy_from_config() {
        let config = PipelineConfig {
            max_generation_attempts: 0,
            ..PipelineConfig::default()
        };
        let policy = GatePolicy::from(&config);
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.max_generation_attempts, 1);
    }
}
