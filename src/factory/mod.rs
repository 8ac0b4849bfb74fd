use anyhow::{bail, Context, Result};
use std::sync::Arc;

use crate::definitions::SwarmConfiguration;
use crate::engine::conversation::create_manager;
use crate::engine::events::{LogSink, ObservabilitySink};
use crate::engine::{Agent, ExecutorConfig, NodeRegistry, Swarm};
use crate::providers::ModelProvider;
use crate::tools::{McpClientManager, ToolRegistry};

/// Turns a validated `SwarmConfiguration` into a ready `Swarm`.
///
/// Every agent shares the same model provider; tools are instantiated per
/// agent from the registry plus the MCP servers the agent names.
pub struct SwarmFactory {
    provider: Arc<dyn ModelProvider>,
    tools: Arc<ToolRegistry>,
    executor_config: ExecutorConfig,
    sink: Arc<dyn ObservabilitySink>,
}

impl SwarmFactory {
    pub fn new(provider: Arc<dyn ModelProvider>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            provider,
            tools,
            executor_config: ExecutorConfig::default(),
            sink: Arc::new(LogSink),
        }
    }

    pub fn with_executor_config(mut self, config: ExecutorConfig) -> Self {
        self.executor_config = config;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn ObservabilitySink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Check a configuration without building anything.
    pub fn validate(&self, config: &SwarmConfiguration) -> Result<()> {
        config.validate()?;
        self.tools.validate(config)?;
        Ok(())
    }

    pub async fn build(
        &self,
        config: &SwarmConfiguration,
        mcp: Option<&McpClientManager>,
    ) -> Result<Swarm> {
        self.validate(config)?;

        let mut agents = Vec::with_capacity(config.agents.len());
        for node in &config.agents {
            let mut tools = self.tools.build_tools(node)?;

            if !node.mcp_servers.is_empty() {
                let Some(manager) = mcp else {
                    bail!(
                        "agent '{}' uses MCP servers {:?} but no MCP connector is configured",
                        node.name,
                        node.mcp_servers
                    );
                };
                let mcp_tools = manager
                    .load_tools(&node.mcp_servers)
                    .await
                    .with_context(|| format!("loading MCP tools for agent '{}'", node.name))?;
                log::info!(
                    "Added {} MCP tools to agent '{}'",
                    mcp_tools.len(),
                    node.name
                );
                tools.extend(mcp_tools);
            }

            let conversation = create_manager(
                config.conversation_manager,
                self.provider.clone(),
                &node.name,
                &node.model_inference_parameters,
            );
            agents.push(Agent::new(
                node.clone(),
                self.provider.clone(),
                tools,
                conversation,
                self.executor_config.clone(),
            ));
        }

        let registry = NodeRegistry::new(agents, &config.entry_agent)?;
        log::info!(
            "Created swarm with agents: {:?}, entry '{}'",
            registry.names(),
            registry.entry()
        );

        Ok(Swarm::new(
            registry,
            config.orchestrator.clone(),
            self.sink.clone(),
        )?)
    }
}
