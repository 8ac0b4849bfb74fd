use thiserror::Error;

use crate::types::NodeId;

/// Problems with a swarm configuration. Always raised before a run starts.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("swarm configuration must define at least one agent")]
    EmptyNodeSet,

    #[error("Duplicate agent names in swarm configuration: {0:?}")]
    DuplicateNodes(Vec<NodeId>),

    #[error("entryAgent '{0}' is not one of the configured agents")]
    EntryNodeMissing(NodeId),

    #[error("invalid orchestrator bounds: {0}")]
    InvalidBounds(String),

    #[error("toolParameters keys {keys:?} not found in tools of agent '{node}'")]
    ToolParametersMismatch { node: NodeId, keys: Vec<String> },

    #[error("unknown tool '{tool}' on agent '{node}'")]
    UnknownTool { node: NodeId, tool: String },

    #[error("tool '{tool}' on agent '{node}' has no registered factory")]
    ToolUnavailable { node: NodeId, tool: String },

    #[error("invalid parameters for tool '{tool}' on agent '{node}': {reason}")]
    InvalidToolParameters {
        node: NodeId,
        tool: String,
        reason: String,
    },

    #[error("{0} agent references have not been resolved into definitions")]
    UnresolvedReferences(usize),

    #[error("could not resolve agent reference '{agent}' ({endpoint}): {reason}")]
    ReferenceResolution {
        agent: String,
        endpoint: String,
        reason: String,
    },
}

/// Failures surfaced by a single node invocation.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("model throttled the request: {0}")]
    Throttled(String),

    #[error("model rejected the request: {0}")]
    Validation(String),

    #[error("conversation exceeded the model context window")]
    ContextWindowOverflow,

    #[error("tool '{tool}' failed: {source}")]
    Tool {
        tool: String,
        #[source]
        source: ToolError,
    },

    #[error("model requested unknown tool '{0}'")]
    UnknownTool(String),

    #[error("exceeded maximum of {0} tool calls in one invocation")]
    ToolLoopExceeded(usize),

    #[error("model transport error: {0}")]
    Transport(String),
}

impl AgentError {
    pub fn is_throttling(&self) -> bool {
        matches!(self, AgentError::Throttled(_))
    }
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("invalid tool input: {0}")]
    InvalidInput(String),

    #[error("tool execution failed: {0}")]
    Execution(String),

    #[error("mcp server '{server}': {reason}")]
    Mcp { server: String, reason: String },
}
