pub mod builtin;
pub mod mcp;
pub mod runtime;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ToolError;
use crate::providers::ToolSpec;
use crate::types::NodeId;

pub use mcp::{McpClientManager, McpConnection, McpConnector, McpToolDescriptor};
pub use runtime::{ToolFactory, ToolRegistry};

/// Who is calling a tool. Passed through to every execution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolContext {
    pub node_id: NodeId,
    pub user_id: String,
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub success: bool,
    pub output: Value,
}

impl ToolResult {
    pub fn ok(output: Value) -> Self {
        Self {
            success: true,
            output,
        }
    }

    /// Text handed back to the model.
    pub fn to_model_text(&self) -> String {
        match &self.output {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> Value;

    async fn execute(&self, params: Value, context: &ToolContext) -> Result<ToolResult, ToolError>;

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.parameters_schema(),
        }
    }
}
