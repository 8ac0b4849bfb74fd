use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::NodeId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandoffRecord {
    pub from_node: NodeId,
    pub to_node: NodeId,
    pub timestamp: DateTime<Utc>,
    pub message: Option<String>,
}

impl HandoffRecord {
    pub fn new(from_node: impl Into<NodeId>, to_node: impl Into<NodeId>) -> Self {
        Self {
            from_node: from_node.into(),
            to_node: to_node.into(),
            timestamp: Utc::now(),
            message: None,
        }
    }

    pub fn with_message(mut self, message: Option<String>) -> Self {
        self.message = message;
        self
    }

    pub fn is_self_handoff(&self) -> bool {
        self.from_node == self.to_node
    }
}
