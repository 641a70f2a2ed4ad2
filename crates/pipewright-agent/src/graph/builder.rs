use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use pipewright_core::error::{PipewrightError, Result};
use pipewright_core::state::RunState;

use super::edge::{Branch, Route};
use super::node::{NodeKey, Task};

/// Mutable graph under construction.
///
/// Nodes keep their registration order; it decides start-candidate order,
/// which unconditional edge wins when a node has several, and how errors
/// list node names.
pub struct StateGraph<K: NodeKey> {
    order: Vec<K>,
    tasks: HashMap<K, Arc<dyn Task>>,
    edges: HashMap<K, Vec<K>>,
    branches: HashMap<K, Branch<K>>,
    entry: Option<K>,
    finish: HashSet<K>,
}

impl<K: NodeKey> Default for StateGraph<K> {
    fn default() -> Self {
        Self {
            order: Vec::new(),
            tasks: HashMap::new(),
            edges: HashMap::new(),
            branches: HashMap::new(),
            entry: None,
            finish: HashSet::new(),
        }
    }
}

impl<K: NodeKey> StateGraph<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, key: K, task: impl Task) -> Result<&mut Self> {
        if self.tasks.contains_key(&key) {
            return Err(PipewrightError::DuplicateNode(key.to_string()));
        }
        self.order.push(key);
        self.tasks.insert(key, Arc::new(task));
        Ok(self)
    }

    /// Add an unconditional edge. Repeating an existing edge is a no-op.
    pub fn add_edge(&mut self, from: K, to: K) -> Result<&mut Self> {
        self.require(from)?;
        self.require(to)?;
        let targets = self.edges.entry(from).or_default();
        if !targets.contains(&to) {
            targets.push(to);
        }
        Ok(self)
    }

    /// Attach a routing function to `from`, with the closed set of outcomes
    /// it may return. Targets are checked against the node set at compile time.
    pub fn add_conditional_edges<F>(
        &mut self,
        from: K,
        router: F,
        targets: impl IntoIterator<Item = Route<K>>,
    ) -> Result<&mut Self>
    where
        F: Fn(&RunState) -> Route<K> + Send + Sync + 'static,
    {
        self.require(from)?;
        if self.branches.contains_key(&from) {
            return Err(PipewrightError::ConflictingEdges(from.to_string()));
        }
        self.branches.insert(from, Branch::new(router, targets));
        Ok(self)
    }

    /// Designate the start node explicitly.
    pub fn set_entry(&mut self, key: K) -> Result<&mut Self> {
        self.require(key)?;
        self.entry = Some(key);
        Ok(self)
    }

    /// Mark a node after which execution stops.
    pub fn set_finish(&mut self, key: K) -> Result<&mut Self> {
        self.require(key)?;
        self.finish.insert(key);
        Ok(self)
    }

    fn require(&self, key: K) -> Result<()> {
        if self.tasks.contains_key(&key) {
            Ok(())
        } else {
            Err(PipewrightError::UnknownNode(key.to_string()))
        }
    }

    /// Validate the graph and freeze it for execution.
    ///
    /// Checks run in a fixed order: edge structure, cycles among
    /// unconditional edges, start inference, terminal existence, and finally
    /// reachability from the start node.
    pub fn compile(self) -> Result<CompiledGraph<K>> {
        if self.order.is_empty() {
            return Err(PipewrightError::NoStartNode);
        }

        self.check_structure()?;
        self.check_cycles()?;
        let start = self.infer_start()?;
        self.check_terminal()?;
        self.check_reachable(start)?;

        debug!(
            nodes = self.order.len(),
            start = %start,
            "Graph compiled"
        );

        Ok(CompiledGraph {
            order: self.order,
            tasks: self.tasks,
            edges: self.edges,
            branches: self.branches,
            finish: self.finish,
            start,
            max_steps: None,
        })
    }

    fn check_structure(&self) -> Result<()> {
        for key in &self.order {
            let has_edges = self.edges.get(key).is_some_and(|e| !e.is_empty());
            let is_finish = self.finish.contains(key);

            if let Some(branch) = self.branches.get(key) {
                if has_edges || is_finish {
                    return Err(PipewrightError::ConflictingEdges(key.to_string()));
                }
                if branch.targets().is_empty() {
                    return Err(PipewrightError::EmptyRouteSet(key.to_string()));
                }
                for target in branch.node_targets() {
                    self.require(target)?;
                }
            } else if has_edges && is_finish {
                return Err(PipewrightError::ConflictingEdges(key.to_string()));
            }
        }
        Ok(())
    }

    /// Three-color depth-first search over unconditional edges. Every node is
    /// used as a root so cycles with no way in are still found.
    fn check_cycles(&self) -> Result<()> {
        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            White,
            Gray,
            Black,
        }

        let mut color: HashMap<K, Color> = self.order.iter().map(|k| (*k, Color::White)).collect();
        let roots = self.entry.iter().chain(self.order.iter());

        for root in roots {
            if color[root] != Color::White {
                continue;
            }
            // (node, index of the next edge to explore)
            let mut stack: Vec<(K, usize)> = vec![(*root, 0)];
            color.insert(*root, Color::Gray);

            while let Some(top) = stack.last_mut() {
                let node = top.0;
                let targets = self.unconditional(node);
                if top.1 >= targets.len() {
                    color.insert(node, Color::Black);
                    stack.pop();
                    continue;
                }
                let target = targets[top.1];
                top.1 += 1;

                match color[&target] {
                    Color::White => {
                        color.insert(target, Color::Gray);
                        stack.push((target, 0));
                    }
                    Color::Gray => {
                        let from = stack.iter().position(|(k, _)| *k == target).unwrap_or(0);
                        let mut path: Vec<String> =
                            stack[from..].iter().map(|(k, _)| k.to_string()).collect();
                        path.push(target.to_string());
                        return Err(PipewrightError::CycleDetected { path });
                    }
                    Color::Black => {}
                }
            }
        }
        Ok(())
    }

    fn infer_start(&self) -> Result<K> {
        if let Some(entry) = self.entry {
            return Ok(entry);
        }

        let targeted: HashSet<K> = self.edges.values().flatten().copied().collect();
        let candidates: Vec<K> = self
            .order
            .iter()
            .copied()
            .filter(|k| !targeted.contains(k))
            .collect();

        match candidates.as_slice() {
            [] => Err(PipewrightError::NoStartNode),
            [start] => Ok(*start),
            _ => Err(PipewrightError::AmbiguousStart {
                candidates: candidates.iter().map(|k| k.to_string()).collect(),
            }),
        }
    }

    fn check_terminal(&self) -> Result<()> {
        let has_terminal = self.order.iter().any(|k| {
            if self.finish.contains(k) {
                return true;
            }
            match self.branches.get(k) {
                Some(branch) => branch.can_end(),
                None => self.unconditional(*k).is_empty(),
            }
        });
        if has_terminal {
            Ok(())
        } else {
            Err(PipewrightError::NoTerminalNode)
        }
    }

    fn check_reachable(&self, start: K) -> Result<()> {
        let mut seen: HashSet<K> = HashSet::from([start]);
        let mut stack = vec![start];

        while let Some(node) = stack.pop() {
            let conditional = self
                .branches
                .get(&node)
                .into_iter()
                .flat_map(|b| b.node_targets());
            let next: Vec<K> = self
                .unconditional(node)
                .iter()
                .copied()
                .chain(conditional)
                .collect();
            for target in next {
                if seen.insert(target) {
                    stack.push(target);
                }
            }
        }

        let unreachable: Vec<String> = self
            .order
            .iter()
            .filter(|k| !seen.contains(k))
            .map(|k| k.to_string())
            .collect();

        if unreachable.is_empty() {
            Ok(())
        } else {
            Err(PipewrightError::UnreachableNodes(unreachable))
        }
    }

    fn unconditional(&self, key: K) -> &[K] {
        self.edges.get(&key).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// A validated, immutable graph ready to execute.
pub struct CompiledGraph<K: NodeKey> {
    pub(super) order: Vec<K>,
    pub(super) tasks: HashMap<K, Arc<dyn Task>>,
    pub(super) edges: HashMap<K, Vec<K>>,
    pub(super) branches: HashMap<K, Branch<K>>,
    pub(super) finish: HashSet<K>,
    pub(super) start: K,
    pub(super) max_steps: Option<usize>,
}

impl<K: NodeKey> CompiledGraph<K> {
    pub fn start(&self) -> K {
        self.start
    }

    /// Node keys in registration order.
    pub fn nodes(&self) -> &[K] {
        &self.order
    }

    pub fn contains(&self, key: K) -> bool {
        self.tasks.contains_key(&key)
    }

    /// Bound the number of task invocations per run. Off by default; graphs
    /// whose loops are bounded by their own tasks don't need it.
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = Some(max_steps);
        self
    }

    /// One line per node describing its outgoing transitions.
    pub fn describe(&self) -> Vec<String> {
        self.order
            .iter()
            .map(|k| {
                let marker = if *k == self.start { "* " } else { "  " };
                let out = if let Some(branch) = self.branches.get(k) {
                    let targets: Vec<String> =
                        branch.targets().iter().map(|t| t.to_string()).collect();
                    format!("-? {}", targets.join(" | "))
                } else if self.finish.contains(k) {
                    "-> END (finish)".to_string()
                } else {
                    match self.edges.get(k).and_then(|e| e.first()) {
                        Some(next) => format!("-> {}", next),
                        None => "-> END".to_string(),
                    }
                };
                format!("{}{} {}", marker, k, out)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::node::task_fn;

    fn noop() -> impl Task {
        task_fn(|_: &mut RunState| Ok(()))
    }

    fn graph(nodes: &[&'static str]) -> StateGraph<&'static str> {
        let mut g = StateGraph::new();
        for n in nodes {
            g.add_node(*n, noop()).unwrap();
        }
        g
    }

    #[test]
    fn test_duplicate_node() {
        let mut g = graph(&["a"]);
        let err = g.add_node("a", noop()).err().unwrap();
        assert!(matches!(err, PipewrightError::DuplicateNode(n) if n == "a"));
    }

    #[test]
    fn test_edge_to_unknown_node() {
        let mut g = graph(&["a"]);
        let err = g.add_edge("a", "b").err().unwrap();
        assert!(matches!(err, PipewrightError::UnknownNode(n) if n == "b"));
    }

    #[test]
    fn test_conditional_target_checked_at_compile() {
        let mut g = graph(&["a"]);
        g.add_conditional_edges("a", |_| Route::End, [Route::End, Route::To("ghost")])
            .unwrap();
        let err = g.compile().err().unwrap();
        assert!(matches!(err, PipewrightError::UnknownNode(n) if n == "ghost"));
    }

    #[test]
    fn test_linear_chain_compiles() {
        let mut g = graph(&["a", "b", "c"]);
        g.add_edge("a", "b").unwrap().add_edge("b", "c").unwrap();
        let compiled = g.compile().unwrap();
        assert_eq!(compiled.start(), "a");
        assert_eq!(compiled.nodes(), &["a", "b", "c"]);
    }

    #[test]
    fn test_cycle_detected() {
        let mut g = graph(&["a", "b", "c"]);
        g.add_edge("a", "b").unwrap();
        g.add_edge("b", "c").unwrap();
        g.add_edge("c", "b").unwrap();
        let err = g.compile().err().unwrap();
        match err {
            PipewrightError::CycleDetected { path } => {
                assert_eq!(path, vec!["b", "c", "b"]);
            }
            other => panic!("Expected CycleDetected, got {:?}", other),
        }
    }

    #[test]
    fn test_cycle_without_entry_point_is_still_a_cycle() {
        let mut g = graph(&["a", "b"]);
        g.add_edge("a", "b").unwrap().add_edge("b", "a").unwrap();
        assert!(matches!(
            g.compile(),
            Err(PipewrightError::CycleDetected { .. })
        ));
    }

    #[test]
    fn test_self_loop_is_a_cycle() {
        let mut g = graph(&["a"]);
        g.add_edge("a", "a").unwrap();
        let err = g.compile().err().unwrap();
        assert!(matches!(err, PipewrightError::CycleDetected { path } if path == vec!["a", "a"]));
    }

    #[test]
    fn test_ambiguous_start_and_explicit_entry() {
        let mut g = graph(&["a", "b", "c"]);
        g.add_edge("a", "c").unwrap();
        g.add_edge("b", "c").unwrap();
        match g.compile().err().unwrap() {
            PipewrightError::AmbiguousStart { candidates } => {
                assert_eq!(candidates, vec!["a", "b"]);
            }
            other => panic!("Expected AmbiguousStart, got {:?}", other),
        }

        let mut g = graph(&["a", "b", "c"]);
        g.add_edge("a", "c").unwrap();
        g.add_edge("b", "c").unwrap();
        g.set_entry("a").unwrap();
        // b has no way in from a
        let err = g.compile().err().unwrap();
        assert!(matches!(err, PipewrightError::UnreachableNodes(n) if n == vec!["b"]));
    }

    #[test]
    fn test_unreachable_nodes_named_exactly() {
        let mut g = graph(&["a", "b", "c", "d"]);
        g.add_edge("a", "b").unwrap();
        g.add_edge("c", "d").unwrap();
        g.set_entry("a").unwrap();
        match g.compile().err().unwrap() {
            PipewrightError::UnreachableNodes(nodes) => assert_eq!(nodes, vec!["c", "d"]),
            other => panic!("Expected UnreachableNodes, got {:?}", other),
        }
    }

    #[test]
    fn test_conditional_targets_count_for_reachability() {
        let mut g = graph(&["produce", "approve", "next"]);
        g.add_edge("produce", "approve").unwrap();
        g.add_conditional_edges(
            "approve",
            |_| Route::To("next"),
            [Route::To("produce"), Route::To("next")],
        )
        .unwrap();
        g.set_entry("produce").unwrap();
        let compiled = g.compile().unwrap();
        assert_eq!(compiled.start(), "produce");
    }

    #[test]
    fn test_no_terminal_node() {
        let mut g = graph(&["a", "b"]);
        g.add_edge("a", "b").unwrap();
        g.add_conditional_edges("b", |_| Route::To("a"), [Route::To("a")])
            .unwrap();
        g.set_entry("a").unwrap();
        assert!(matches!(g.compile(), Err(PipewrightError::NoTerminalNode)));
    }

    #[test]
    fn test_finish_node_with_edges_conflicts() {
        let mut g = graph(&["a", "b"]);
        g.add_edge("a", "b").unwrap();
        g.add_conditional_edges("b", |_| Route::To("a"), [Route::To("a")])
            .unwrap();
        g.set_entry("a").unwrap();
        g.set_finish("a").unwrap();
        // a is a finish node but also has an outgoing edge
        assert!(matches!(
            g.compile(),
            Err(PipewrightError::ConflictingEdges(n)) if n == "a"
        ));
    }

    #[test]
    fn test_router_and_edges_conflict() {
        let mut g = graph(&["a", "b"]);
        g.add_edge("a", "b").unwrap();
        g.add_conditional_edges("a", |_| Route::End, [Route::End])
            .unwrap();
        assert!(matches!(
            g.compile(),
            Err(PipewrightError::ConflictingEdges(n)) if n == "a"
        ));

        let mut g = graph(&["a"]);
        g.add_conditional_edges("a", |_| Route::End, [Route::End])
            .unwrap();
        let err = g
            .add_conditional_edges("a", |_| Route::End, [Route::End])
            .err()
            .unwrap();
        assert!(matches!(err, PipewrightError::ConflictingEdges(_)));
    }

    #[test]
    fn test_empty_route_set() {
        let mut g = graph(&["a"]);
        g.add_conditional_edges("a", |_| Route::End, std::iter::empty())
            .unwrap();
        assert!(matches!(
            g.compile(),
            Err(PipewrightError::EmptyRouteSet(n)) if n == "a"
        ));
    }

    #[test]
    fn test_empty_graph_has_no_start() {
        let g: StateGraph<&'static str> = StateGraph::new();
        assert!(matches!(g.compile(), Err(PipewrightError::NoStartNode)));
    }

    #[test]
    fn test_describe_marks_start_and_routes() {
        let mut g = graph(&["a", "b"]);
        g.add_edge("a", "b").unwrap();
        g.add_conditional_edges("b", |_| Route::End, [Route::To("a"), Route::End])
            .unwrap();
        let lines = g.compile().unwrap().describe();
        assert_eq!(lines, vec!["* a -> b", "  b -? a | END"]);
    }
}
