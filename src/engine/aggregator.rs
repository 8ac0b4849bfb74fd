use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use uuid::Uuid;

use super::events::SwarmEvent;
use crate::definitions::RETRIEVE_FROM_KB_PREFIX;
use crate::types::{NodeId, NodeResult, RunId, SwarmResult, SwarmStatus};

pub const REASONING_HEADER: &str = "# Intermediate Swarm node results";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenFrame {
    pub run_id: RunId,
    pub sequence_number: u64,
    pub value: String,
    pub node_id: NodeId,
    pub session_id: String,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalFrame {
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub references: Option<Vec<Value>>,
    pub status: SwarmStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub session_id: String,
    pub message_id: String,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
}

/// What the caller receives: token frames as they are produced, then one
/// final frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    Token(TokenFrame),
    Final(FinalFrame),
}

/// Turns the orchestrator's event stream into client frames.
///
/// Tokens pass straight through with a sequence number that restarts at
/// zero for every run. Node results are buffered so the final frame can
/// carry the earlier nodes' output as reasoning content.
#[derive(Debug, Clone)]
pub struct StreamAggregator {
    session_id: String,
    user_id: String,
    message_id: String,
    run_id: RunId,
    sequence: u64,
    visits: Vec<NodeResult>,
    references: Vec<Value>,
}

impl StreamAggregator {
    pub fn new(
        session_id: impl Into<String>,
        user_id: impl Into<String>,
        message_id: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            message_id: message_id.into(),
            run_id: Uuid::nil(),
            sequence: 0,
            visits: Vec::new(),
            references: Vec::new(),
        }
    }

    pub fn references(&self) -> &[Value] {
        &self.references
    }

    pub fn on_event(&mut self, event: SwarmEvent) -> Option<ClientEvent> {
        match event {
            SwarmEvent::RunStarted { run_id } => {
                self.run_id = run_id;
                self.sequence = 0;
                self.visits.clear();
                self.references.clear();
                None
            }
            SwarmEvent::Token { node_id, text } => {
                let frame = TokenFrame {
                    run_id: self.run_id,
                    sequence_number: self.sequence,
                    value: text,
                    node_id,
                    session_id: self.session_id.clone(),
                    user_id: self.user_id.clone(),
                    timestamp: Utc::now(),
                };
                self.sequence += 1;
                Some(ClientEvent::Token(frame))
            }
            SwarmEvent::ToolInvoked { tool, output, .. } => {
                if tool.starts_with(RETRIEVE_FROM_KB_PREFIX) {
                    if let Some(refs) = output.get("references").and_then(Value::as_array) {
                        log::debug!("Collected {} knowledge base references", refs.len());
                        self.references.extend(refs.iter().cloned());
                    }
                }
                None
            }
            SwarmEvent::NodeStopped(result) => {
                self.visits.push(result);
                None
            }
            SwarmEvent::NodeStarted { .. } | SwarmEvent::Handoff(_) => None,
            SwarmEvent::Finished(result) => Some(ClientEvent::Final(self.final_frame(&result))),
        }
    }

    fn reasoning_content(&self) -> Option<String> {
        let earlier = self.visits.len().checked_sub(1)?;
        if earlier == 0 {
            return None;
        }
        let mut sections = vec![REASONING_HEADER.to_string()];
        for (i, visit) in self.visits[..earlier].iter().enumerate() {
            sections.push(format!("## Agent {}", i + 1));
            sections.push(visit.result.clone());
        }
        Some(sections.join("\n\n"))
    }

    fn final_frame(&self, result: &SwarmResult) -> FinalFrame {
        FinalFrame {
            content: result.final_answer().trim().to_string(),
            reasoning_content: self.reasoning_content(),
            references: (!self.references.is_empty()).then(|| self.references.clone()),
            status: result.status,
            error: result.error.clone(),
            session_id: self.session_id.clone(),
            message_id: self.message_id.clone(),
            user_id: self.user_id.clone(),
            timestamp: Utc::now(),
        }
    }

    /// Drain `events` into `out` until the run finishes. Returns the run's
    /// result, or `None` if the producer went away without finishing.
    pub async fn forward(
        mut self,
        mut events: UnboundedReceiver<SwarmEvent>,
        out: mpsc::Sender<ClientEvent>,
    ) -> Option<SwarmResult> {
        let mut client_gone = false;
        while let Some(event) = events.recv().await {
            let finished = match &event {
                SwarmEvent::Finished(result) => Some(result.clone()),
                _ => None,
            };
            if let Some(frame) = self.on_event(event) {
                if !client_gone && out.send(frame).await.is_err() {
                    log::warn!("Client stream closed, discarding remaining frames");
                    client_gone = true;
                }
            }
            if finished.is_some() {
                return finished;
            }
        }
        None
    }

    pub fn into_stream(
        mut self,
        mut events: UnboundedReceiver<SwarmEvent>,
    ) -> impl Stream<Item = ClientEvent> {
        async_stream::stream! {
            while let Some(event) = events.recv().await {
                let done = matches!(event, SwarmEvent::Finished(_));
                if let Some(frame) = self.on_event(event) {
                    yield frame;
                }
                if done {
                    break;
                }
            }
        }
    }
}
