pub mod handoff;
pub mod result;

pub use handoff::HandoffRecord;
pub use result::{NodeResult, NodeStatus, SwarmResult, TokenUsage};

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Agents are addressed by their sanitized name.
pub type NodeId = String;
pub type RunId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SwarmStatus {
    NotStarted,
    Running,
    Completed,
    Failed,
    MaxHandoffsExceeded,
    MaxIterationsExceeded,
    ExecutionTimeout,
    NodeTimeout,
    RepetitiveHandoffDetected,
}

/// Inputs to the run state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunEvent {
    Started,
    FinalAnswer,
    NodeFailed,
    HandoffLimitReached,
    IterationLimitReached,
    ExecutionDeadlinePassed,
    NodeDeadlinePassed,
    RepetitiveHandoff,
}

impl SwarmStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SwarmStatus::NotStarted => "NOT_STARTED",
            SwarmStatus::Running => "RUNNING",
            SwarmStatus::Completed => "COMPLETED",
            SwarmStatus::Failed => "FAILED",
            SwarmStatus::MaxHandoffsExceeded => "MAX_HANDOFFS_EXCEEDED",
            SwarmStatus::MaxIterationsExceeded => "MAX_ITERATIONS_EXCEEDED",
            SwarmStatus::ExecutionTimeout => "EXECUTION_TIMEOUT",
            SwarmStatus::NodeTimeout => "NODE_TIMEOUT",
            SwarmStatus::RepetitiveHandoffDetected => "REPETITIVE_HANDOFF_DETECTED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, SwarmStatus::NotStarted | SwarmStatus::Running)
    }

    /// Terminal states are absorbing: any event applied to them is rejected.
    pub fn transition(self, event: RunEvent) -> Result<SwarmStatus> {
        let next = match (self, event) {
            (SwarmStatus::NotStarted, RunEvent::Started) => SwarmStatus::Running,
            (SwarmStatus::Running, RunEvent::FinalAnswer) => SwarmStatus::Completed,
            (SwarmStatus::Running, RunEvent::NodeFailed) => SwarmStatus::Failed,
            (SwarmStatus::Running, RunEvent::HandoffLimitReached) => {
                SwarmStatus::MaxHandoffsExceeded
            }
            (SwarmStatus::Running, RunEvent::IterationLimitReached) => {
                SwarmStatus::MaxIterationsExceeded
            }
            (SwarmStatus::Running, RunEvent::ExecutionDeadlinePassed) => {
                SwarmStatus::ExecutionTimeout
            }
            (SwarmStatus::Running, RunEvent::NodeDeadlinePassed) => SwarmStatus::NodeTimeout,
            (SwarmStatus::Running, RunEvent::RepetitiveHandoff) => {
                SwarmStatus::RepetitiveHandoffDetected
            }
            _ => {
                return Err(anyhow!(
                    "Invalid swarm transition from {:?} with event {:?}",
                    self,
                    event
                ));
            }
        };

        Ok(next)
    }
}

impl std::fmt::Display for SwarmStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
