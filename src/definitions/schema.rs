use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::LazyLock;

use crate::error::ConfigError;
use crate::types::NodeId;

pub const RETRIEVE_FROM_KB_PREFIX: &str = "retrieve_from_kb";
pub const INVOKE_SUBAGENT_PREFIX: &str = "invoke_subagent";

/// Model ids that reject a `top_p` inference parameter.
const MODELS_WITHOUT_TOP_P: &[&str] = &["anthropic.claude-haiku-4-5-20251001-v1:0"];

static UNSAFE_NAME_CHARS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[^A-Za-z0-9_/\-]").unwrap_or_else(|e| panic!("invalid name pattern: {e}"))
});

/// Map an arbitrary agent name onto the identifier charset
/// (`A-Z a-z 0-9 _ - /`, alphanumeric first character).
pub fn sanitize_node_name(raw: &str) -> NodeId {
    let replaced = UNSAFE_NAME_CHARS.replace_all(raw.trim(), "_");
    match replaced.chars().next() {
        None => "agent".to_string(),
        Some(c) if c.is_ascii_alphanumeric() => replaced.into_owned(),
        Some(_) => format!("agent_{}", replaced),
    }
}

pub(crate) fn deserialize_node_name<'de, D>(deserializer: D) -> Result<NodeId, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Ok(sanitize_node_name(&raw))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceParameters {
    pub max_tokens: u32,
    pub temperature: f32,
    #[serde(default)]
    pub stop_sequences: Option<Vec<String>>,
    #[serde(default)]
    pub top_p: Option<f32>,
}

impl Default for InferenceParameters {
    fn default() -> Self {
        Self {
            max_tokens: 4096,
            temperature: default_temperature(),
            stop_sequences: None,
            top_p: None,
        }
    }
}

fn default_temperature() -> f32 {
    0.4
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelConfiguration {
    pub model_id: String,
    #[serde(default)]
    pub parameters: InferenceParameters,
}

impl ModelConfiguration {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            parameters: InferenceParameters::default(),
        }
    }

    pub fn supports_top_p(&self) -> bool {
        !MODELS_WITHOUT_TOP_P
            .iter()
            .any(|model| self.model_id.ends_with(model))
    }

    /// Parameters as they should be sent to the model.
    pub fn effective_parameters(&self) -> InferenceParameters {
        let mut params = self.parameters.clone();
        if !self.supports_top_p() {
            params.top_p = None;
        }
        params
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationManagerType {
    Null,
    SlidingWindow,
    Summarizing,
}

impl Default for ConversationManagerType {
    fn default() -> Self {
        ConversationManagerType::SlidingWindow
    }
}

/// The closed set of tool families an agent may be configured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    GetCurrentTime,
    GetWeatherForecast,
    RetrieveFromKb,
    InvokeSubagent,
}

impl ToolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolKind::GetCurrentTime => "get_current_time",
            ToolKind::GetWeatherForecast => "get_weather_forecast",
            ToolKind::RetrieveFromKb => RETRIEVE_FROM_KB_PREFIX,
            ToolKind::InvokeSubagent => INVOKE_SUBAGENT_PREFIX,
        }
    }

    /// Knowledge-base and sub-agent tools are configured once per target, so
    /// their names only share a prefix (`retrieve_from_kb_products`).
    pub fn from_tool_name(name: &str) -> Option<Self> {
        match name {
            "get_current_time" => Some(ToolKind::GetCurrentTime),
            "get_weather_forecast" => Some(ToolKind::GetWeatherForecast),
            n if n.starts_with(RETRIEVE_FROM_KB_PREFIX) => Some(ToolKind::RetrieveFromKb),
            n if n.starts_with(INVOKE_SUBAGENT_PREFIX) => Some(ToolKind::InvokeSubagent),
            _ => None,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ToolKind::GetCurrentTime => "Get the current date and time in the specified timezone. Helpful when user refers to relative time (yesterday, today, this year, now, etc.)",
            ToolKind::GetWeatherForecast => "Get the weather forecast for a city",
            ToolKind::RetrieveFromKb => "Retrieve relevant passages from a knowledge base",
            ToolKind::InvokeSubagent => "Invoke a sub-agent to handle specialized tasks or domain-specific queries that require dedicated processing",
        }
    }

    pub fn all() -> Vec<Self> {
        vec![
            ToolKind::GetCurrentTime,
            ToolKind::GetWeatherForecast,
            ToolKind::RetrieveFromKb,
            ToolKind::InvokeSubagent,
        ]
    }
}

/// One agent of the swarm graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentNode {
    #[serde(deserialize_with = "deserialize_node_name")]
    pub name: NodeId,
    pub instructions: String,
    pub model_inference_parameters: ModelConfiguration,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub tool_parameters: HashMap<String, Value>,
    #[serde(default)]
    pub mcp_servers: Vec<String>,
}

impl AgentNode {
    pub fn new(name: &str, instructions: impl Into<String>, model: ModelConfiguration) -> Self {
        Self {
            name: sanitize_node_name(name),
            instructions: instructions.into(),
            model_inference_parameters: model,
            tools: Vec::new(),
            tool_parameters: HashMap::new(),
            mcp_servers: Vec::new(),
        }
    }

    pub fn with_tool(mut self, tool: impl Into<String>, params: Value) -> Self {
        let tool = tool.into();
        self.tool_parameters.insert(tool.clone(), params);
        self.tools.push(tool);
        self
    }

    pub fn with_mcp_server(mut self, server: impl Into<String>) -> Self {
        self.mcp_servers.push(server.into());
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut orphaned: Vec<String> = self
            .tool_parameters
            .keys()
            .filter(|key| !self.tools.contains(key))
            .cloned()
            .collect();
        if !orphaned.is_empty() {
            orphaned.sort();
            return Err(ConfigError::ToolParametersMismatch {
                node: self.name.clone(),
                keys: orphaned,
            });
        }

        for tool in &self.tools {
            if ToolKind::from_tool_name(tool).is_none() {
                return Err(ConfigError::UnknownTool {
                    node: self.name.clone(),
                    tool: tool.clone(),
                });
            }
        }

        Ok(())
    }
}
