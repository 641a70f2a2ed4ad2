use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipewrightError {
    // Graph construction / compilation errors
    #[error("Duplicate node: {0}")]
    DuplicateNode(String),

    #[error("Unknown node: {0}")]
    UnknownNode(String),

    #[error("Cycle detected among unconditional edges: {}", .path.join(" -> "))]
    CycleDetected { path: Vec<String> },

    #[error("Graph has no start node")]
    NoStartNode,

    #[error("Ambiguous start, candidates: {}", .candidates.join(", "))]
    AmbiguousStart { candidates: Vec<String> },

    #[error("Unreachable nodes: {}", .0.join(", "))]
    UnreachableNodes(Vec<String>),

    #[error("Graph has no terminal node")]
    NoTerminalNode,

    #[error("Node {0} mixes a routing function with other outgoing edges")]
    ConflictingEdges(String),

    #[error("Routing function on {0} declares no targets")]
    EmptyRouteSet(String),

    // Routing / execution errors
    #[error("Invalid route from {node}: {target}")]
    InvalidRoute { node: String, target: String },

    #[error("Node {node} failed: {source}")]
    NodeFailed {
        node: String,
        #[source]
        source: Box<PipewrightError>,
    },

    #[error("Execution exceeded {0} steps")]
    StepLimitExceeded(usize),

    #[error("Run cancelled")]
    Cancelled,

    // Collaborator errors
    #[error("LLM request failed: {0}")]
    LlmRequest(String),

    #[error("Malformed generation for {stage}: {reason}")]
    MalformedGeneration { stage: String, reason: String },

    #[error("Malformed judgment for {stage}: {reason}")]
    MalformedJudgment { stage: String, reason: String },

    #[error("Generation for {stage} still malformed after {attempts} attempts")]
    GenerationExhausted { stage: String, attempts: u32 },

    #[error("Stage {stage} rejected {attempts} times, retries exhausted")]
    RetriesExhausted { stage: String, attempts: u32 },

    // Tool errors
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool execution failed: {tool}: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("Tool timeout after {timeout_secs}s: {tool}")]
    ToolTimeout { tool: String, timeout_secs: u64 },

    #[error("Tool input validation failed: {0}")]
    ToolValidation(String),

    // State-shape errors
    #[error("Run state is missing {0}")]
    MissingState(String),

    #[error("Run state entry {key} is not {expected}")]
    StateShape { key: String, expected: &'static str },

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipewrightError {
    /// Wrap an error raised while a node's task was running.
    pub fn in_node(node: impl Into<String>, source: PipewrightError) -> Self {
        Self::NodeFailed {
            node: node.into(),
            source: Box::new(source),
        }
    }

    /// Stable kind name used in output records.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DuplicateNode(_) => "duplicate_node",
            Self::UnknownNode(_) => "unknown_node",
            Self::CycleDetected { .. } => "cycle_detected",
            Self::NoStartNode => "no_start_node",
            Self::AmbiguousStart { .. } => "ambiguous_start",
            Self::UnreachableNodes(_) => "unreachable_nodes",
            Self::NoTerminalNode => "no_terminal_node",
            Self::ConflictingEdges(_) => "conflicting_edges",
            Self::EmptyRouteSet(_) => "empty_route_set",
            Self::InvalidRoute { .. } => "invalid_route",
            Self::NodeFailed { source, .. } => source.kind(),
            Self::StepLimitExceeded(_) => "step_limit_exceeded",
            Self::Cancelled => "cancelled",
            Self::LlmRequest(_) => "llm_request",
            Self::MalformedGeneration { .. } => "malformed_generation",
            Self::MalformedJudgment { .. } => "malformed_judgment",
            Self::GenerationExhausted { .. } => "generation_exhausted",
            Self::RetriesExhausted { .. } => "retries_exhausted",
            Self::ToolNotFound(_) => "tool_not_found",
            Self::ToolExecution { .. } => "tool_execution",
            Self::ToolTimeout { .. } => "tool_timeout",
            Self::ToolValidation(_) => "tool_validation",
            Self::MissingState(_) => "missing_state",
            Self::StateShape { .. } => "state_shape",
            Self::Config(_) => "config",
            Self::ConfigNotFound(_) => "config_not_found",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
        }
    }

    /// The node an execution error was raised in, if any.
    pub fn node(&self) -> Option<&str> {
        match self {
            Self::NodeFailed { node, .. } | Self::InvalidRoute { node, .. } => Some(node),
            _ => None,
        }
    }

    /// The innermost error, with node wrappers removed.
    pub fn root(&self) -> &PipewrightError {
        match self {
            Self::NodeFailed { source, .. } => source.root(),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, PipewrightError>;
