use std::time::Instant;

use tracing::{debug, error, info};

use pipewright_core::error::{PipewrightError, Result};
use pipewright_core::state::RunState;

use super::builder::CompiledGraph;
use super::edge::Route;
use super::node::NodeKey;

/// Result of running a single node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRun<K> {
    /// Which node was run.
    pub node: K,
    /// Execution time in milliseconds.
    pub elapsed_ms: u64,
}

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// A routing function returned the terminal marker.
    EndMarker,
    /// The last node was designated as a finish node.
    Finish,
    /// The last node had no outgoing transition.
    NoSuccessor,
}

/// Result of running a graph to completion.
#[derive(Debug, Clone)]
pub struct ExecutionResult<K> {
    /// Node runs in execution order.
    pub runs: Vec<NodeRun<K>>,
    pub termination: Termination,
    /// Total execution time in milliseconds.
    pub total_elapsed_ms: u64,
}

impl<K: NodeKey> ExecutionResult<K> {
    /// Node keys in the order they ran.
    pub fn path(&self) -> Vec<K> {
        self.runs.iter().map(|r| r.node).collect()
    }

    /// How many times a node ran.
    pub fn visits(&self, node: K) -> usize {
        self.runs.iter().filter(|r| r.node == node).count()
    }

    pub fn last(&self) -> Option<K> {
        self.runs.last().map(|r| r.node)
    }
}

enum Transition<K> {
    Next(K),
    Stop(Termination),
}

impl<K: NodeKey> CompiledGraph<K> {
    /// Run the graph from its start node until a terminal transition.
    pub async fn execute(&self, state: &mut RunState) -> Result<ExecutionResult<K>> {
        self.execute_from(self.start, state).await
    }

    /// Run the graph from an arbitrary node.
    ///
    /// Nodes run strictly one at a time. A task error stops the run and is
    /// reported wrapped with the failing node's name; the state keeps every
    /// mutation made up to that point.
    pub async fn execute_from(&self, start: K, state: &mut RunState) -> Result<ExecutionResult<K>> {
        if !self.contains(start) {
            return Err(PipewrightError::UnknownNode(start.to_string()));
        }

        let started = Instant::now();
        let mut runs: Vec<NodeRun<K>> = Vec::new();
        let mut current = start;

        let termination = loop {
            if state.is_cancelled() {
                info!(node = %current, "Run cancelled before node");
                return Err(PipewrightError::Cancelled);
            }
            if let Some(max) = self.max_steps {
                if runs.len() >= max {
                    return Err(PipewrightError::StepLimitExceeded(max));
                }
            }

            let task = self
                .tasks
                .get(&current)
                .ok_or_else(|| PipewrightError::UnknownNode(current.to_string()))?;

            info!(node = %current, step = runs.len() + 1, "Running node");

            let node_start = Instant::now();
            if let Err(e) = task.run(state).await {
                error!(node = %current, error = %e, "Node failed");
                return Err(PipewrightError::in_node(current.to_string(), e));
            }
            let elapsed_ms = node_start.elapsed().as_millis() as u64;
            runs.push(NodeRun {
                node: current,
                elapsed_ms,
            });

            match self.transition(current, state)? {
                Transition::Next(next) => {
                    debug!(from = %current, to = %next, "Following transition");
                    current = next;
                }
                Transition::Stop(reason) => break reason,
            }
        };

        let total_elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            steps = runs.len(),
            total_elapsed_ms,
            termination = ?termination,
            "Graph execution complete"
        );

        Ok(ExecutionResult {
            runs,
            termination,
            total_elapsed_ms,
        })
    }

    fn transition(&self, node: K, state: &RunState) -> Result<Transition<K>> {
        if self.finish.contains(&node) {
            return Ok(Transition::Stop(Termination::Finish));
        }

        if let Some(branch) = self.branches.get(&node) {
            let route = branch.route(state);
            if !branch.allows(&route) {
                return Err(PipewrightError::InvalidRoute {
                    node: node.to_string(),
                    target: route.to_string(),
                });
            }
            return Ok(match route {
                Route::To(next) => Transition::Next(next),
                Route::End => Transition::Stop(Termination::EndMarker),
            });
        }

        // Several unconditional edges: the first registered wins.
        Ok(match self.edges.get(&node).and_then(|e| e.first()) {
            Some(next) => Transition::Next(*next),
            None => Transition::Stop(Termination::NoSuccessor),
        })
    }
}
