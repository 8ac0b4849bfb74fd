use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use super::llm::{stream_of, ModelEvent, ModelProvider, ModelRequest, ModelStream, ToolCall};
use crate::error::AgentError;
use crate::types::{NodeId, TokenUsage};

/// One canned model turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScriptedTurn {
    Answer {
        text: String,
    },
    Handoff {
        to: String,
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        text: String,
    },
    ToolUse {
        name: String,
        #[serde(default)]
        input: Value,
    },
    Throttle {
        #[serde(default)]
        message: String,
    },
    Reject {
        #[serde(default)]
        message: String,
    },
    Overflow,
    /// Streams `text` and then never finishes.
    Hang {
        #[serde(default)]
        text: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptedStep {
    #[serde(flatten)]
    pub turn: ScriptedTurn,
    #[serde(default)]
    pub delay_ms: u64,
}

impl From<ScriptedTurn> for ScriptedStep {
    fn from(turn: ScriptedTurn) -> Self {
        Self { turn, delay_ms: 0 }
    }
}

#[derive(Debug, Default)]
struct NodeScript {
    steps: Vec<ScriptedStep>,
    cursor: usize,
}

impl NodeScript {
    /// The last step repeats once the script is exhausted.
    fn next_step(&mut self) -> Option<ScriptedStep> {
        let step = self
            .steps
            .get(self.cursor)
            .or_else(|| self.steps.last())
            .cloned();
        self.cursor += 1;
        step
    }
}

/// Replays per-node scripts instead of calling a model. Used by the CLI's
/// `--script` mode and by tests.
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    scripts: Mutex<HashMap<NodeId, NodeScript>>,
    requests: Mutex<Vec<ModelRequest>>,
    usage_per_turn: TokenUsage,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            usage_per_turn: TokenUsage::new(10, 5),
            ..Default::default()
        }
    }

    pub fn from_yaml(source: &str) -> Result<Self> {
        let scripts: HashMap<NodeId, Vec<ScriptedStep>> =
            serde_yaml::from_str(source).context("Failed to parse model script")?;
        let provider = Self::new();
        for (node, steps) in scripts {
            provider.script_steps(&node, steps);
        }
        Ok(provider)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read model script {}", path.display()))?;
        Self::from_yaml(&source)
    }

    pub fn script(self, node: &str, turns: Vec<ScriptedTurn>) -> Self {
        self.script_steps(node, turns.into_iter().map(ScriptedStep::from).collect());
        self
    }

    pub fn script_steps(&self, node: &str, steps: Vec<ScriptedStep>) {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts.insert(
                node.to_string(),
                NodeScript {
                    steps,
                    cursor: 0,
                },
            );
        }
    }

    /// Requests received so far, in call order.
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn request_count(&self, node: &str) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.node_id == node)
            .count()
    }

    fn next_step(&self, node: &str) -> Option<ScriptedStep> {
        let mut scripts = self.scripts.lock().ok()?;
        scripts.get_mut(node)?.next_step()
    }

    fn text_events(text: &str) -> Vec<ModelEvent> {
        text.split_inclusive(' ')
            .map(|chunk| ModelEvent::TextDelta(chunk.to_string()))
            .collect()
    }

    fn render(&self, turn: ScriptedTurn, call_index: usize) -> Result<ModelStream, AgentError> {
        let usage = ModelEvent::Usage(self.usage_per_turn);
        match turn {
            ScriptedTurn::Answer { text } => {
                let mut events = Self::text_events(&text);
                events.push(usage);
                events.push(ModelEvent::Stop);
                Ok(stream_of(events))
            }
            ScriptedTurn::Handoff { to, message, text } => {
                let mut events = Self::text_events(&text);
                events.push(usage);
                events.push(ModelEvent::Handoff {
                    target: to,
                    message,
                });
                Ok(stream_of(events))
            }
            ScriptedTurn::ToolUse { name, input } => Ok(stream_of(vec![
                usage,
                ModelEvent::ToolUse(ToolCall {
                    id: format!("call-{}", call_index),
                    name,
                    input,
                }),
                ModelEvent::Stop,
            ])),
            ScriptedTurn::Throttle { message } => Err(AgentError::Throttled(message)),
            ScriptedTurn::Reject { message } => Err(AgentError::Validation(message)),
            ScriptedTurn::Overflow => Err(AgentError::ContextWindowOverflow),
            ScriptedTurn::Hang { text } => {
                let head = stream::iter(Self::text_events(&text).into_iter().map(Ok));
                Ok(head.chain(stream::pending()).boxed())
            }
        }
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    async fn invoke(&self, request: ModelRequest) -> Result<ModelStream, AgentError> {
        let node = request.node_id.clone();
        let call_index = {
            let mut requests = self
                .requests
                .lock()
                .map_err(|_| AgentError::Transport("script state poisoned".to_string()))?;
            requests.push(request);
            requests.len()
        };

        let step = self
            .next_step(&node)
            .ok_or_else(|| AgentError::Validation(format!("no script for node '{}'", node)))?;

        if step.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(step.delay_ms)).await;
        }

        self.render(step.turn, call_index)
    }
}
