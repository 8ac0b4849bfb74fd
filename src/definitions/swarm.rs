use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

use super::schema::{deserialize_node_name, sanitize_node_name, AgentNode, ConversationManagerType};
use crate::error::ConfigError;
use crate::types::NodeId;

pub const DEFAULT_MAX_HANDOFFS: usize = 20;
pub const DEFAULT_MAX_ITERATIONS: usize = 20;
pub const DEFAULT_EXECUTION_TIMEOUT_SECS: f64 = 900.0;
pub const DEFAULT_NODE_TIMEOUT_SECS: f64 = 300.0;
pub const DEFAULT_REPETITIVE_HANDOFF_DETECTION_WINDOW: usize = 8;
pub const DEFAULT_REPETITIVE_HANDOFF_MIN_UNIQUE_AGENTS: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorBounds {
    #[serde(default = "default_max_handoffs")]
    pub max_handoffs: usize,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_execution_timeout")]
    pub execution_timeout_seconds: f64,
    #[serde(default = "default_node_timeout")]
    pub node_timeout_seconds: f64,
    #[serde(default = "default_detection_window")]
    pub repetitive_handoff_detection_window: usize,
    #[serde(default = "default_min_unique_agents")]
    pub repetitive_handoff_min_unique_agents: usize,
}

fn default_max_handoffs() -> usize {
    DEFAULT_MAX_HANDOFFS
}

fn default_max_iterations() -> usize {
    DEFAULT_MAX_ITERATIONS
}

fn default_execution_timeout() -> f64 {
    DEFAULT_EXECUTION_TIMEOUT_SECS
}

fn default_node_timeout() -> f64 {
    DEFAULT_NODE_TIMEOUT_SECS
}

fn default_detection_window() -> usize {
    DEFAULT_REPETITIVE_HANDOFF_DETECTION_WINDOW
}

fn default_min_unique_agents() -> usize {
    DEFAULT_REPETITIVE_HANDOFF_MIN_UNIQUE_AGENTS
}

impl Default for OrchestratorBounds {
    fn default() -> Self {
        Self {
            max_handoffs: DEFAULT_MAX_HANDOFFS,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            execution_timeout_seconds: DEFAULT_EXECUTION_TIMEOUT_SECS,
            node_timeout_seconds: DEFAULT_NODE_TIMEOUT_SECS,
            repetitive_handoff_detection_window: DEFAULT_REPETITIVE_HANDOFF_DETECTION_WINDOW,
            repetitive_handoff_min_unique_agents: DEFAULT_REPETITIVE_HANDOFF_MIN_UNIQUE_AGENTS,
        }
    }
}

impl OrchestratorBounds {
    /// Saturates at `Duration::MAX` for values `validate` would reject.
    pub fn execution_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.execution_timeout_seconds).unwrap_or(Duration::MAX)
    }

    pub fn node_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.node_timeout_seconds).unwrap_or(Duration::MAX)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid =
            |reason: String| -> Result<(), ConfigError> { Err(ConfigError::InvalidBounds(reason)) };

        if self.max_handoffs < 1 {
            return invalid("maxHandoffs must be at least 1".to_string());
        }
        if self.max_iterations < 1 {
            return invalid("maxIterations must be at least 1".to_string());
        }
        for (field, seconds) in [
            ("executionTimeoutSeconds", self.execution_timeout_seconds),
            ("nodeTimeoutSeconds", self.node_timeout_seconds),
        ] {
            if !seconds.is_finite() || seconds <= 0.0 {
                return invalid(format!("{} must be greater than 0", field));
            }
            if Duration::try_from_secs_f64(seconds).is_err() {
                return invalid(format!("{} ({}) is too large", field, seconds));
            }
        }
        if self.node_timeout_seconds > self.execution_timeout_seconds {
            return invalid(format!(
                "nodeTimeoutSeconds ({}) must not exceed executionTimeoutSeconds ({})",
                self.node_timeout_seconds, self.execution_timeout_seconds
            ));
        }
        if self.repetitive_handoff_detection_window < 2 {
            return invalid("repetitiveHandoffDetectionWindow must be at least 2".to_string());
        }
        if self.repetitive_handoff_min_unique_agents < 2 {
            return invalid("repetitiveHandoffMinUniqueAgents must be at least 2".to_string());
        }
        if self.repetitive_handoff_detection_window <= self.repetitive_handoff_min_unique_agents {
            return invalid(format!(
                "repetitiveHandoffDetectionWindow ({}) must be greater than repetitiveHandoffMinUniqueAgents ({})",
                self.repetitive_handoff_detection_window,
                self.repetitive_handoff_min_unique_agents
            ));
        }

        Ok(())
    }
}

/// Points at an agent definition stored outside the swarm configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentReference {
    pub agent_name: String,
    pub endpoint_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwarmConfiguration {
    #[serde(default)]
    pub agents: Vec<AgentNode>,
    #[serde(default)]
    pub agent_references: Vec<AgentReference>,
    #[serde(deserialize_with = "deserialize_node_name")]
    pub entry_agent: NodeId,
    #[serde(default)]
    pub orchestrator: OrchestratorBounds,
    #[serde(default)]
    pub conversation_manager: ConversationManagerType,
}

impl SwarmConfiguration {
    pub fn new(agents: Vec<AgentNode>, entry_agent: &str) -> Self {
        Self {
            agents,
            agent_references: Vec::new(),
            entry_agent: sanitize_node_name(entry_agent),
            orchestrator: OrchestratorBounds::default(),
            conversation_manager: ConversationManagerType::default(),
        }
    }

    pub fn with_bounds(mut self, bounds: OrchestratorBounds) -> Self {
        self.orchestrator = bounds;
        self
    }

    pub fn with_conversation_manager(mut self, manager: ConversationManagerType) -> Self {
        self.conversation_manager = manager;
        self
    }

    pub fn needs_resolution(&self) -> bool {
        self.agents.is_empty() && !self.agent_references.is_empty()
    }

    pub fn node_names(&self) -> Vec<&str> {
        self.agents.iter().map(|a| a.name.as_str()).collect()
    }

    /// Every MCP server named by any agent, in first-seen order.
    pub fn mcp_servers(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.agents
            .iter()
            .flat_map(|a| a.mcp_servers.iter())
            .filter(|s| seen.insert(s.as_str()))
            .cloned()
            .collect()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.needs_resolution() {
            return Err(ConfigError::UnresolvedReferences(
                self.agent_references.len(),
            ));
        }
        if self.agents.is_empty() {
            return Err(ConfigError::EmptyNodeSet);
        }

        let mut seen = HashSet::new();
        let mut duplicates: Vec<NodeId> = Vec::new();
        for agent in &self.agents {
            if !seen.insert(agent.name.as_str()) && !duplicates.contains(&agent.name) {
                duplicates.push(agent.name.clone());
            }
        }
        if !duplicates.is_empty() {
            return Err(ConfigError::DuplicateNodes(duplicates));
        }

        if !seen.contains(self.entry_agent.as_str()) {
            return Err(ConfigError::EntryNodeMissing(self.entry_agent.clone()));
        }

        for agent in &self.agents {
            agent.validate()?;
        }

        self.orchestrator.validate()
    }
}
