use async_trait::async_trait;
use std::sync::Arc;

use crate::definitions::{ConversationManagerType, ModelConfiguration};
use crate::error::AgentError;
use crate::providers::llm::{collect_text, Message, ModelProvider, ModelRequest, Role};
use crate::types::NodeId;

pub const DEFAULT_WINDOW_SIZE: usize = 40;
pub const DEFAULT_SUMMARY_RATIO: f64 = 0.3;
pub const DEFAULT_PRESERVE_RECENT_MESSAGES: usize = 10;

/// Suffix of the node id used for summarization calls, so they can be told
/// apart from the agent's own turns.
pub const SUMMARIZER_NODE_SUFFIX: &str = "::summarizer";

const SUMMARIZATION_PROMPT: &str = "You are a conversation summarizer. Provide a concise summary of the conversation history. Keep the key facts, decisions, tool results and open questions. Write it in the third person as bullet points.";

/// Keeps an agent's message history within the model's context window.
#[async_trait]
pub trait ConversationManager: Send + Sync {
    /// Called before every model request.
    fn apply(&self, messages: &mut Vec<Message>);

    /// Called after the model reported a context-window overflow. Must shrink
    /// `messages` or fail with `ContextWindowOverflow`.
    async fn reduce(&self, messages: &mut Vec<Message>) -> Result<(), AgentError>;
}

pub fn create_manager(
    kind: ConversationManagerType,
    provider: Arc<dyn ModelProvider>,
    node_id: &NodeId,
    model: &ModelConfiguration,
) -> Box<dyn ConversationManager> {
    match kind {
        ConversationManagerType::Null => Box::new(NullConversationManager),
        ConversationManagerType::SlidingWindow => {
            Box::new(SlidingWindowConversationManager::new(DEFAULT_WINDOW_SIZE))
        }
        ConversationManagerType::Summarizing => Box::new(SummarizingConversationManager::new(
            provider,
            format!("{}{}", node_id, SUMMARIZER_NODE_SUFFIX),
            model.clone(),
        )),
    }
}

/// First index at or after `from` where a user message starts, so the kept
/// tail never opens with a dangling tool result.
fn next_user_turn(messages: &[Message], from: usize) -> Option<usize> {
    (from..messages.len()).find(|&i| messages[i].role == Role::User)
}

/// Keeps everything. An overflow is fatal.
pub struct NullConversationManager;

#[async_trait]
impl ConversationManager for NullConversationManager {
    fn apply(&self, _messages: &mut Vec<Message>) {}

    async fn reduce(&self, _messages: &mut Vec<Message>) -> Result<(), AgentError> {
        Err(AgentError::ContextWindowOverflow)
    }
}

pub struct SlidingWindowConversationManager {
    window_size: usize,
}

impl SlidingWindowConversationManager {
    pub fn new(window_size: usize) -> Self {
        Self { window_size }
    }

    fn trim_from(messages: &mut Vec<Message>, from: usize) -> bool {
        match next_user_turn(messages, from) {
            Some(start) if start > 0 => {
                messages.drain(..start);
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl ConversationManager for SlidingWindowConversationManager {
    fn apply(&self, messages: &mut Vec<Message>) {
        if messages.len() > self.window_size {
            let excess = messages.len() - self.window_size;
            Self::trim_from(messages, excess);
        }
    }

    async fn reduce(&self, messages: &mut Vec<Message>) -> Result<(), AgentError> {
        let from = if messages.len() > self.window_size {
            messages.len() - self.window_size
        } else {
            1
        };
        if Self::trim_from(messages, from.max(1)) {
            log::debug!("Sliding window reduced conversation to {} messages", messages.len());
            Ok(())
        } else {
            Err(AgentError::ContextWindowOverflow)
        }
    }
}

/// Replaces the oldest part of the conversation with a model-written summary.
pub struct SummarizingConversationManager {
    provider: Arc<dyn ModelProvider>,
    summarizer_id: NodeId,
    model: ModelConfiguration,
    summary_ratio: f64,
    preserve_recent_messages: usize,
}

impl SummarizingConversationManager {
    pub fn new(provider: Arc<dyn ModelProvider>, summarizer_id: NodeId, model: ModelConfiguration) -> Self {
        Self {
            provider,
            summarizer_id,
            model,
            summary_ratio: DEFAULT_SUMMARY_RATIO,
            preserve_recent_messages: DEFAULT_PRESERVE_RECENT_MESSAGES,
        }
    }

    pub fn with_limits(mut self, summary_ratio: f64, preserve_recent_messages: usize) -> Self {
        self.summary_ratio = summary_ratio.clamp(0.1, 0.8);
        self.preserve_recent_messages = preserve_recent_messages;
        self
    }

    /// How many leading messages to fold into the summary, or `None` when
    /// too little history exists.
    fn split_point(&self, messages: &[Message]) -> Option<usize> {
        let len = messages.len();
        if len <= self.preserve_recent_messages {
            return None;
        }
        let by_ratio = ((len as f64) * self.summary_ratio) as usize;
        let count = by_ratio.max(1).min(len - self.preserve_recent_messages);
        next_user_turn(messages, count).or(Some(count)).filter(|&split| {
            split <= len - self.preserve_recent_messages
                && messages.get(split).map(|m| m.role != Role::Tool).unwrap_or(false)
        })
    }
}

#[async_trait]
impl ConversationManager for SummarizingConversationManager {
    fn apply(&self, _messages: &mut Vec<Message>) {}

    async fn reduce(&self, messages: &mut Vec<Message>) -> Result<(), AgentError> {
        let split = self
            .split_point(messages)
            .ok_or(AgentError::ContextWindowOverflow)?;

        let mut to_summarize: Vec<Message> = messages[..split].to_vec();
        to_summarize.push(Message::user(
            "Please summarize this conversation.".to_string(),
        ));

        let request = ModelRequest {
            node_id: self.summarizer_id.clone(),
            system_prompt: SUMMARIZATION_PROMPT.to_string(),
            messages: to_summarize,
            tools: Vec::new(),
            model: self.model.clone(),
        };
        let stream = self.provider.invoke(request).await?;
        let summary = collect_text(stream).await?;

        messages.splice(
            ..split,
            std::iter::once(Message::user(format!(
                "Summary of the earlier conversation:\n{}",
                summary
            ))),
        );
        log::info!(
            "Summarized {} messages, conversation now has {} messages",
            split,
            messages.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::scripted::{ScriptedProvider, ScriptedTurn};

    fn conversation(turns: usize) -> Vec<Message> {
        let mut messages = Vec::new();
        for i in 0..turns {
            messages.push(Message::user(format!("question {}", i)));
            messages.push(Message::assistant(format!("answer {}", i)));
        }
        messages
    }

    #[test]
    fn test_sliding_window_keeps_recent_messages() {
        let manager = SlidingWindowConversationManager::new(4);
        let mut messages = conversation(5);

        manager.apply(&mut messages);

        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].content, "question 3");
    }

    #[test]
    fn test_sliding_window_starts_at_user_turn() {
        let manager = SlidingWindowConversationManager::new(3);
        let mut messages = conversation(3);

        manager.apply(&mut messages);

        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].content, "question 2");
    }

    #[tokio::test]
    async fn test_sliding_window_reduce_until_exhausted() {
        let manager = SlidingWindowConversationManager::new(40);
        let mut messages = conversation(2);

        manager.reduce(&mut messages).await.unwrap();
        assert_eq!(messages.len(), 2);

        let err = manager.reduce(&mut messages).await.unwrap_err();
        assert!(matches!(err, AgentError::ContextWindowOverflow));
    }

    #[tokio::test]
    async fn test_null_manager_never_reduces() {
        let mut messages = conversation(30);
        manager_is_fatal(&NullConversationManager, &mut messages).await;
        assert_eq!(messages.len(), 60);
    }

    async fn manager_is_fatal(manager: &dyn ConversationManager, messages: &mut Vec<Message>) {
        manager.apply(messages);
        assert!(manager.reduce(messages).await.is_err());
    }

    #[tokio::test]
    async fn test_summarizing_replaces_oldest_messages() {
        let provider = Arc::new(ScriptedProvider::new().script(
            "writer::summarizer",
            vec![ScriptedTurn::Answer {
                text: "- user asked many questions".to_string(),
            }],
        ));
        let manager = SummarizingConversationManager::new(
            provider.clone(),
            "writer::summarizer".to_string(),
            ModelConfiguration::new("m"),
        );
        let mut messages = conversation(10);

        manager.reduce(&mut messages).await.unwrap();

        // 30% of 20 messages is 6, which lands on a user turn.
        assert_eq!(messages.len(), 15);
        assert!(messages[0].content.contains("user asked many questions"));
        assert_eq!(messages[1].content, "question 3");
        assert_eq!(provider.request_count("writer::summarizer"), 1);
    }

    #[tokio::test]
    async fn test_summarizing_needs_enough_history() {
        let provider = Arc::new(ScriptedProvider::new());
        let manager = SummarizingConversationManager::new(
            provider,
            "writer::summarizer".to_string(),
            ModelConfiguration::new("m"),
        );
        let mut messages = conversation(5);

        assert!(matches!(
            manager.reduce(&mut messages).await,
            Err(AgentError::ContextWindowOverflow)
        ));
    }
}
