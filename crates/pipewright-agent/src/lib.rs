pub mod assistant;
pub mod gate;
pub mod generator;
pub mod graph;
pub mod judge;
pub mod pipeline;
pub mod record;
pub mod stage;

pub use assistant::Assistant;
pub use gate::{ApprovalGate, Collaborators, GatePolicy};
pub use generator::LlmGenerator;
pub use graph::{CompiledGraph, ExecutionResult, Route, StateGraph, Task, Termination};
pub use judge::LlmJudge;
pub use pipeline::{build_pipeline, seed_state, Pipeline, Step};
pub use record::{RunError, RunRecord, RunStatus};
pub use stage::{Stage, StageSpec};
