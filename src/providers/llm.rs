use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::definitions::ModelConfiguration;
use crate::error::AgentError;
use crate::types::{NodeId, TokenUsage};

/// Name of the capability every swarm node is offered for transferring control.
pub const HANDOFF_TOOL_NAME: &str = "handoff_to_agent";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    pub fn assistant_with_tools(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::plain(Role::Assistant, content)
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::plain(Role::Tool, content)
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

impl ToolSpec {
    pub fn handoff(peers: &[NodeId]) -> Self {
        Self {
            name: HANDOFF_TOOL_NAME.to_string(),
            description: "Transfer control to another agent in the swarm for specialized help."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "agent_name": {
                        "type": "string",
                        "enum": peers,
                        "description": "Name of the agent to hand off to"
                    },
                    "message": {
                        "type": "string",
                        "description": "Message explaining what needs to be done and why"
                    }
                },
                "required": ["agent_name", "message"]
            }),
        }
    }
}

/// Everything the model-invocation backend needs for one call.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub node_id: NodeId,
    pub system_prompt: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSpec>,
    pub model: ModelConfiguration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModelEvent {
    TextDelta(String),
    ToolUse(ToolCall),
    Usage(TokenUsage),
    Handoff {
        target: NodeId,
        message: Option<String>,
    },
    /// End of turn. A stream that ends without `Stop` is treated the same way.
    Stop,
}

pub type ModelStream = BoxStream<'static, Result<ModelEvent, AgentError>>;

/// Black-box inference capability. Transport-level retries belong to the
/// implementation; errors returned here end the node invocation.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn invoke(&self, request: ModelRequest) -> Result<ModelStream, AgentError>;
}

/// Build a stream out of an already-known sequence of events.
pub fn stream_of(events: Vec<ModelEvent>) -> ModelStream {
    stream::iter(events.into_iter().map(Ok)).boxed()
}

/// Drain a model stream and return the text it produced.
pub async fn collect_text(mut stream: ModelStream) -> Result<String, AgentError> {
    let mut text = String::new();
    while let Some(event) = stream.next().await {
        match event? {
            ModelEvent::TextDelta(delta) => text.push_str(&delta),
            ModelEvent::Stop => break,
            _ => {}
        }
    }
    Ok(text)
}
