use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::{Tool, ToolContext, ToolResult};
use crate::error::ToolError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub input_schema: Value,
}

/// An open session with one tool server.
#[async_trait]
pub trait McpConnection: Send + Sync {
    fn is_active(&self) -> bool;
    async fn list_tools(&self) -> Result<Vec<McpToolDescriptor>, ToolError>;
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, ToolError>;
    async fn close(&self) -> Result<(), ToolError>;
}

/// Opens connections to named tool servers.
#[async_trait]
pub trait McpConnector: Send + Sync {
    async fn connect(&self, server: &str) -> Result<Arc<dyn McpConnection>, ToolError>;
}

/// Owns the tool-server connections of one session.
///
/// Opening is idempotent: an active connection for a server is reused, and
/// the connection map stays locked while a connection is being opened so two
/// concurrent initializations never open the same server twice.
pub struct McpClientManager {
    connector: Arc<dyn McpConnector>,
    connections: Mutex<HashMap<String, Arc<dyn McpConnection>>>,
}

impl McpClientManager {
    pub fn new(connector: Arc<dyn McpConnector>) -> Self {
        Self {
            connector,
            connections: Mutex::new(HashMap::new()),
        }
    }

    pub async fn init(&self, servers: &[String]) -> Result<(), ToolError> {
        let mut connections = self.connections.lock().await;
        for server in servers {
            if let Some(existing) = connections.get(server) {
                if existing.is_active() {
                    log::info!(
                        "MCP client for {} already exists with active session, reusing.",
                        server
                    );
                    continue;
                }
            }

            let connection = self.connector.connect(server).await.map_err(|e| {
                log::error!("Failed to open connection to MCP server {}: {}", server, e);
                e
            })?;
            log::info!("Opened connection to MCP server {}", server);
            connections.insert(server.clone(), connection);
        }
        Ok(())
    }

    /// Tools of the given servers, named `<server>_<tool>`. Connections are
    /// opened on demand.
    pub async fn load_tools(&self, servers: &[String]) -> Result<Vec<Arc<dyn Tool>>, ToolError> {
        self.init(servers).await?;

        let connections = self.connections.lock().await;
        let mut tools: Vec<Arc<dyn Tool>> = Vec::new();
        for server in servers {
            let Some(connection) = connections.get(server) else {
                continue;
            };
            for descriptor in connection.list_tools().await? {
                tools.push(Arc::new(McpTool {
                    qualified_name: format!("{}_{}", server, descriptor.name),
                    server: server.clone(),
                    descriptor,
                    connection: Arc::clone(connection),
                }));
            }
        }
        Ok(tools)
    }

    /// Close every connection. Close failures are logged, never returned.
    pub async fn cleanup(&self) {
        let mut connections = self.connections.lock().await;
        for (server, connection) in connections.drain() {
            match connection.close().await {
                Ok(()) => log::info!("Closed connection to MCP server {}", server),
                Err(e) => log::warn!("Failed to close MCP server {}: {}", server, e),
            }
        }
    }

    pub async fn open_servers(&self) -> Vec<String> {
        let connections = self.connections.lock().await;
        let mut servers: Vec<String> = connections.keys().cloned().collect();
        servers.sort();
        servers
    }
}

struct McpTool {
    qualified_name: String,
    server: String,
    descriptor: McpToolDescriptor,
    connection: Arc<dyn McpConnection>,
}

#[async_trait]
impl Tool for McpTool {
    fn name(&self) -> &str {
        &self.qualified_name
    }

    fn description(&self) -> &str {
        &self.descriptor.description
    }

    fn parameters_schema(&self) -> Value {
        self.descriptor.input_schema.clone()
    }

    async fn execute(&self, params: Value, _context: &ToolContext) -> Result<ToolResult, ToolError> {
        if !self.connection.is_active() {
            return Err(ToolError::Mcp {
                server: self.server.clone(),
                reason: "connection is closed".to_string(),
            });
        }
        let output = self
            .connection
            .call_tool(&self.descriptor.name, params)
            .await?;
        Ok(ToolResult::ok(output))
    }
}
