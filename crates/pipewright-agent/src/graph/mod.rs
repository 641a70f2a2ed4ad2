//! Task-graph engine.
//!
//! A [`StateGraph`] is built from nodes (tasks keyed by a [`NodeKey`]),
//! unconditional edges, and routing functions with a declared outcome set.
//! Compiling validates the structure and yields a [`CompiledGraph`] which
//! runs one node at a time against a shared
//! [`RunState`](pipewright_core::state::RunState).

pub mod builder;
pub mod edge;
pub mod executor;
pub mod node;

pub use builder::{CompiledGraph, StateGraph};
pub use edge::{Branch, Route, RouteFn};
pub use executor::{ExecutionResult, NodeRun, Termination};
pub use node::{task_fn, FnTask, NodeKey, Task};
