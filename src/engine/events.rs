use serde::Serialize;
use serde_json::Value;
use std::sync::Mutex;
use std::time::Duration;

use crate::types::{HandoffRecord, NodeId, NodeResult, NodeStatus, RunId, SwarmResult, SwarmStatus};

/// Everything a run produces, in production order. A run has exactly one
/// producer, so the channel order is the order tokens were generated in.
#[derive(Debug, Clone)]
pub enum SwarmEvent {
    RunStarted {
        run_id: RunId,
    },
    NodeStarted {
        node_id: NodeId,
        iteration: usize,
    },
    Token {
        node_id: NodeId,
        text: String,
    },
    ToolInvoked {
        node_id: NodeId,
        tool: String,
        input: Value,
        output: Value,
    },
    Handoff(HandoffRecord),
    NodeStopped(NodeResult),
    Finished(SwarmResult),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ObservabilityEvent {
    NodeEntered {
        run_id: RunId,
        node_id: NodeId,
        iteration: usize,
    },
    NodeExited {
        run_id: RunId,
        node_id: NodeId,
        status: NodeStatus,
        latency_ms: u64,
    },
    HandoffOccurred {
        run_id: RunId,
        from_node: NodeId,
        to_node: NodeId,
        message: Option<String>,
    },
    TimeoutReached {
        run_id: RunId,
        node_id: NodeId,
        status: SwarmStatus,
        #[serde(with = "duration_ms")]
        deadline: Duration,
    },
    TerminalStatus {
        run_id: RunId,
        status: SwarmStatus,
        error: Option<String>,
    },
}

mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}

/// Receives every state transition of a run. Called synchronously from the
/// orchestrator, so implementations must not block.
pub trait ObservabilitySink: Send + Sync {
    fn record(&self, event: &ObservabilityEvent);
}

/// Writes each event as one structured `log` record.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl ObservabilitySink for LogSink {
    fn record(&self, event: &ObservabilityEvent) {
        let payload = serde_json::to_string(event).unwrap_or_default();
        match event {
            ObservabilityEvent::TimeoutReached { .. } => log::warn!("swarm event {}", payload),
            ObservabilityEvent::TerminalStatus { status, .. }
                if *status != SwarmStatus::Completed =>
            {
                log::warn!("swarm event {}", payload)
            }
            ObservabilityEvent::NodeEntered { .. } | ObservabilityEvent::NodeExited { .. } => {
                log::debug!("swarm event {}", payload)
            }
            _ => log::info!("swarm event {}", payload),
        }
    }
}

/// Keeps every event in memory. Handy for assertions and diagnostics.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ObservabilityEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ObservabilityEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl ObservabilitySink for RecordingSink {
    fn record(&self, event: &ObservabilityEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}
