use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use super::builtin::{CurrentTimeTool, WeatherForecastTool};
use super::Tool;
use crate::definitions::{AgentNode, SwarmConfiguration, ToolKind};
use crate::error::{ConfigError, ToolError};

/// Builds a tool instance from the name and parameters an agent was
/// configured with. One factory per `ToolKind`.
pub trait ToolFactory: Send + Sync {
    fn kind(&self) -> ToolKind;

    fn create(&self, tool_name: &str, params: &Value) -> Result<Arc<dyn Tool>, ToolError>;

    fn validate(&self, tool_name: &str, params: &Value) -> Result<(), ToolError> {
        self.create(tool_name, params).map(|_| ())
    }
}

struct CurrentTimeFactory {
    default_timezone: String,
}

impl ToolFactory for CurrentTimeFactory {
    fn kind(&self) -> ToolKind {
        ToolKind::GetCurrentTime
    }

    fn create(&self, _tool_name: &str, params: &Value) -> Result<Arc<dyn Tool>, ToolError> {
        let timezone = params["timezone"]
            .as_str()
            .unwrap_or(&self.default_timezone);
        Ok(Arc::new(CurrentTimeTool::new(timezone)?))
    }
}

struct WeatherForecastFactory;

impl ToolFactory for WeatherForecastFactory {
    fn kind(&self) -> ToolKind {
        ToolKind::GetWeatherForecast
    }

    fn create(&self, _tool_name: &str, _params: &Value) -> Result<Arc<dyn Tool>, ToolError> {
        Ok(Arc::new(WeatherForecastTool))
    }
}

/// Closed mapping from tool kind to factory. Every tool an agent names is
/// checked against it before a swarm is built.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    factories: HashMap<ToolKind, Arc<dyn ToolFactory>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the tools that need no external service.
    pub fn with_builtins(default_timezone: impl Into<String>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(CurrentTimeFactory {
            default_timezone: default_timezone.into(),
        }));
        registry.register(Arc::new(WeatherForecastFactory));
        registry
    }

    pub fn register(&mut self, factory: Arc<dyn ToolFactory>) {
        self.factories.insert(factory.kind(), factory);
    }

    pub fn supports(&self, kind: ToolKind) -> bool {
        self.factories.contains_key(&kind)
    }

    fn factory_for(&self, node: &str, tool: &str) -> Result<&Arc<dyn ToolFactory>, ConfigError> {
        let kind = ToolKind::from_tool_name(tool).ok_or_else(|| ConfigError::UnknownTool {
            node: node.to_string(),
            tool: tool.to_string(),
        })?;
        self.factories
            .get(&kind)
            .ok_or_else(|| ConfigError::ToolUnavailable {
                node: node.to_string(),
                tool: tool.to_string(),
            })
    }

    /// Check every configured tool of every agent without building anything.
    pub fn validate(&self, config: &SwarmConfiguration) -> Result<(), ConfigError> {
        for agent in &config.agents {
            for tool in &agent.tools {
                let factory = self.factory_for(&agent.name, tool)?;
                if let Some(params) = agent.tool_parameters.get(tool) {
                    factory.validate(tool, params).map_err(|e| {
                        ConfigError::InvalidToolParameters {
                            node: agent.name.clone(),
                            tool: tool.clone(),
                            reason: e.to_string(),
                        }
                    })?;
                }
            }
        }
        Ok(())
    }

    /// Instantiate the tools of one agent. Tools without a parameter entry
    /// are skipped.
    pub fn build_tools(&self, node: &AgentNode) -> Result<Vec<Arc<dyn Tool>>, ConfigError> {
        let mut tools = Vec::with_capacity(node.tools.len());
        for tool_name in &node.tools {
            let factory = self.factory_for(&node.name, tool_name)?;
            let Some(params) = node.tool_parameters.get(tool_name) else {
                log::warn!(
                    "Tool '{}' not found in toolParameters for agent '{}', skipping",
                    tool_name,
                    node.name
                );
                continue;
            };

            let tool = factory
                .create(tool_name, params)
                .map_err(|e| ConfigError::InvalidToolParameters {
                    node: node.name.clone(),
                    tool: tool_name.clone(),
                    reason: e.to_string(),
                })?;
            log::info!("Added tool '{}' to agent '{}'", tool_name, node.name);
            tools.push(tool);
        }
        Ok(tools)
    }
}
