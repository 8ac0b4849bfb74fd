use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

use super::conversation::ConversationManager;
use super::events::SwarmEvent;
use crate::definitions::AgentNode;
use crate::error::AgentError;
use crate::providers::llm::{Message, ModelEvent, ModelProvider, ModelRequest, ToolCall, ToolSpec};
use crate::tools::{Tool, ToolContext};
use crate::types::{HandoffRecord, NodeId, TokenUsage};

/// Overflowed model calls are retried at most this many times after the
/// conversation manager shrank the history.
pub const MAX_OVERFLOW_RETRIES: usize = 3;

/// Configuration for agent execution
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Maximum tool calls per node invocation
    pub max_tool_calls: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self { max_tool_calls: 10 }
    }
}

/// What a node sees when it is invoked.
#[derive(Debug, Clone, Default)]
pub struct NodeInput {
    pub task: String,
    pub handoff: Option<HandoffRecord>,
    pub visited: Vec<NodeId>,
    /// Latest result of each previously visited node, in visit order.
    pub shared_knowledge: Vec<(NodeId, String)>,
    pub peers: Vec<NodeId>,
}

impl NodeInput {
    pub fn render(&self) -> String {
        let mut sections = Vec::new();

        if let Some(handoff) = &self.handoff {
            if let Some(message) = handoff.message.as_deref().filter(|m| !m.is_empty()) {
                sections.push(format!("Handoff Message: {}", message));
            }
        }

        sections.push(format!("User Request: {}", self.task));

        if !self.visited.is_empty() {
            sections.push(format!(
                "Previous agents who worked on this: {}",
                self.visited.join(" → ")
            ));
        }

        if !self.shared_knowledge.is_empty() {
            let knowledge: Vec<String> = self
                .shared_knowledge
                .iter()
                .map(|(node, text)| format!("• {}: {}", node, text))
                .collect();
            sections.push(format!(
                "Shared knowledge from previous agents:\n{}",
                knowledge.join("\n")
            ));
        }

        if !self.peers.is_empty() {
            let peers: Vec<String> = self
                .peers
                .iter()
                .map(|p| format!("Agent name: {}.", p))
                .collect();
            sections.push(format!(
                "Other agents available for collaboration:\n{}",
                peers.join("\n")
            ));
        }

        sections.push(
            "You have access to swarm coordination tools if you need help from other agents. \
             If you don't hand off to another agent, the swarm will consider the task complete."
                .to_string(),
        );

        sections.join("\n\n")
    }
}

/// Collects what a node produced. Lives outside the invocation future so
/// that partial output survives a timeout.
#[derive(Debug)]
pub struct NodeOutput {
    node_id: NodeId,
    events: UnboundedSender<SwarmEvent>,
    pub streamed: String,
    pub final_text: Option<String>,
    pub usage: TokenUsage,
    pub tool_calls: usize,
}

impl NodeOutput {
    pub fn new(node_id: NodeId, events: UnboundedSender<SwarmEvent>) -> Self {
        Self {
            node_id,
            events,
            streamed: String::new(),
            final_text: None,
            usage: TokenUsage::default(),
            tool_calls: 0,
        }
    }

    fn token(&mut self, text: String) {
        self.streamed.push_str(&text);
        // A closed receiver only means nobody is listening.
        let _ = self.events.send(SwarmEvent::Token {
            node_id: self.node_id.clone(),
            text,
        });
    }

    fn tool_invoked(&mut self, call: &ToolCall, output: serde_json::Value) {
        let _ = self.events.send(SwarmEvent::ToolInvoked {
            node_id: self.node_id.clone(),
            tool: call.name.clone(),
            input: call.input.clone(),
            output,
        });
    }

    /// Text the node's result reports: the last model turn when the node
    /// finished, otherwise everything streamed so far.
    pub fn result_text(&self) -> String {
        self.final_text
            .clone()
            .unwrap_or_else(|| self.streamed.clone())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AgentOutcome {
    Final,
    Handoff {
        target: String,
        message: Option<String>,
    },
}

/// One swarm node: a model, its tools and its conversation state.
pub struct Agent {
    node: AgentNode,
    provider: Arc<dyn ModelProvider>,
    tools: HashMap<String, Arc<dyn Tool>>,
    conversation: Box<dyn ConversationManager>,
    messages: Vec<Message>,
    config: ExecutorConfig,
}

impl Agent {
    pub fn new(
        node: AgentNode,
        provider: Arc<dyn ModelProvider>,
        tools: Vec<Arc<dyn Tool>>,
        conversation: Box<dyn ConversationManager>,
        config: ExecutorConfig,
    ) -> Self {
        let tools = tools
            .into_iter()
            .map(|tool| (tool.name().to_string(), tool))
            .collect();
        Self {
            node,
            provider,
            tools,
            conversation,
            messages: Vec::new(),
            config,
        }
    }

    pub fn name(&self) -> &NodeId {
        &self.node.name
    }

    pub fn node(&self) -> &AgentNode {
        &self.node
    }

    pub fn tool_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort();
        names
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Forget the conversation of a previous run.
    pub fn reset(&mut self) {
        self.messages.clear();
    }

    fn tool_specs(&self, handoff_targets: &[NodeId]) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self.tools.values().map(|tool| tool.spec()).collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs.push(ToolSpec::handoff(handoff_targets));
        specs
    }

    /// Run the model until it answers or hands off, executing the tools it
    /// asks for along the way.
    pub async fn invoke(
        &mut self,
        input: &NodeInput,
        handoff_targets: &[NodeId],
        context: &ToolContext,
        output: &mut NodeOutput,
    ) -> Result<AgentOutcome, AgentError> {
        self.messages.push(Message::user(input.render()));
        let tools = self.tool_specs(handoff_targets);
        let mut overflow_retries = 0;

        loop {
            self.conversation.apply(&mut self.messages);
            let request = ModelRequest {
                node_id: self.node.name.clone(),
                system_prompt: self.node.instructions.clone(),
                messages: self.messages.clone(),
                tools: tools.clone(),
                model: self.node.model_inference_parameters.clone(),
            };

            let mut stream = match self.provider.invoke(request).await {
                Err(AgentError::ContextWindowOverflow) if overflow_retries < MAX_OVERFLOW_RETRIES => {
                    overflow_retries += 1;
                    log::warn!(
                        "Context window overflow in agent '{}', reducing conversation (attempt {})",
                        self.node.name,
                        overflow_retries
                    );
                    self.conversation.reduce(&mut self.messages).await?;
                    continue;
                }
                other => other?,
            };

            let mut turn_text = String::new();
            let mut calls: Vec<ToolCall> = Vec::new();
            let mut handoff = None;

            while let Some(event) = stream.next().await {
                match event? {
                    ModelEvent::TextDelta(delta) => {
                        turn_text.push_str(&delta);
                        output.token(delta);
                    }
                    ModelEvent::ToolUse(call) => calls.push(call),
                    ModelEvent::Usage(usage) => output.usage += usage,
                    ModelEvent::Handoff { target, message } => {
                        handoff = Some(AgentOutcome::Handoff { target, message });
                        break;
                    }
                    ModelEvent::Stop => break,
                }
            }

            if let Some(outcome) = handoff {
                self.messages.push(Message::assistant(turn_text.clone()));
                output.final_text = Some(turn_text);
                return Ok(outcome);
            }

            if calls.is_empty() {
                self.messages.push(Message::assistant(turn_text.clone()));
                output.final_text = Some(turn_text);
                return Ok(AgentOutcome::Final);
            }

            self.messages
                .push(Message::assistant_with_tools(turn_text, calls.clone()));
            for call in calls {
                if output.tool_calls >= self.config.max_tool_calls {
                    return Err(AgentError::ToolLoopExceeded(self.config.max_tool_calls));
                }
                output.tool_calls += 1;

                let tool = self
                    .tools
                    .get(&call.name)
                    .ok_or_else(|| AgentError::UnknownTool(call.name.clone()))?;

                log::info!("Agent '{}' calling tool '{}'", self.node.name, call.name);
                let result = tool
                    .execute(call.input.clone(), context)
                    .await
                    .map_err(|source| AgentError::Tool {
                        tool: call.name.clone(),
                        source,
                    })?;

                output.tool_invoked(&call, result.output.clone());
                self.messages
                    .push(Message::tool_result(call.id.clone(), result.to_model_text()));
            }
        }
    }
}
