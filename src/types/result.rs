use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ops::AddAssign;

use super::{HandoffRecord, NodeId, RunId, SwarmStatus};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        }
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, other: Self) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.total_tokens += other.total_tokens;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Completed,
    HandedOff,
    TimedOut,
    Failed,
}

/// Outcome of one node invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeResult {
    pub node_id: NodeId,
    /// Text produced by the node. For timed out or failed nodes this is
    /// whatever was streamed before the invocation was abandoned.
    pub result: String,
    pub status: NodeStatus,
    pub handoff_to: Option<NodeId>,
    pub usage: TokenUsage,
    pub latency_ms: u64,
    pub tool_calls: usize,
}

/// Terminal outcome of a swarm run. Produced for every run, including failed
/// and exhausted ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwarmResult {
    pub run_id: RunId,
    pub status: SwarmStatus,
    pub node_history: Vec<NodeId>,
    /// Latest result per node; earlier visits of the same node are only
    /// visible through `node_history`.
    pub results: HashMap<NodeId, NodeResult>,
    pub accumulated_usage: TokenUsage,
    pub execution_time_ms: u64,
    pub execution_count: usize,
    pub handoffs: Vec<HandoffRecord>,
    pub error: Option<String>,
}

impl SwarmResult {
    pub fn last_node(&self) -> Option<&NodeId> {
        self.node_history.last()
    }

    pub fn last_result(&self) -> Option<&NodeResult> {
        self.last_node().and_then(|node| self.results.get(node))
    }

    /// The last executed node's text, or an empty string when nothing ran.
    pub fn final_answer(&self) -> &str {
        self.last_result()
            .map(|r| r.result.as_str())
            .unwrap_or_default()
    }

    pub fn is_completed(&self) -> bool {
        self.status == SwarmStatus::Completed
    }

    pub fn handoff_count(&self) -> usize {
        self.handoffs.len()
    }
}
