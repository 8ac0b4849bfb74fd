use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::definitions::SwarmConfiguration;
use crate::engine::ExecutorConfig;
use crate::providers::openai::DEFAULT_BASE_URL;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub log_level: String,
    pub log_format: LogFormat,
    pub default_time_zone: String,
    pub max_tool_calls: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            openai_base_url: DEFAULT_BASE_URL.to_string(),
            log_level: "info".to_string(),
            log_format: LogFormat::Json,
            default_time_zone: "UTC".to_string(),
            max_tool_calls: ExecutorConfig::default().max_tool_calls,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            openai_api_key: std::env::var("OPENAI_API_KEY").ok(),
            openai_base_url: std::env::var("OPENAI_BASE_URL")
                .unwrap_or(defaults.openai_base_url),
            log_level: std::env::var("ACA_LOG_LEVEL").unwrap_or(defaults.log_level),
            log_format: match std::env::var("ACA_LOG_FORMAT").as_deref() {
                Ok("compact") => LogFormat::Compact,
                _ => defaults.log_format,
            },
            default_time_zone: std::env::var("DEFAULT_TIME_ZONE")
                .unwrap_or(defaults.default_time_zone),
            max_tool_calls: std::env::var("ACA_MAX_TOOL_CALLS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_tool_calls),
        }
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            max_tool_calls: self.max_tool_calls,
        }
    }
}

/// Parse a swarm configuration, choosing the format by file extension.
pub fn parse_swarm_configuration(source: &str, extension: &str) -> Result<SwarmConfiguration> {
    let config = match extension {
        "yaml" | "yml" => serde_yaml::from_str(source)?,
        "json" => serde_json::from_str(source)?,
        "toml" => toml::from_str(source)?,
        other => bail!("unsupported configuration format '{}'", other),
    };
    Ok(config)
}

pub fn load_swarm_configuration(path: &Path) -> Result<SwarmConfiguration> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let config = parse_swarm_configuration(&source, &extension)
        .with_context(|| format!("parsing {}", path.display()))?;
    log::info!(
        "Loaded swarm configuration from {} with {} agents and {} references",
        path.display(),
        config.agents.len(),
        config.agent_references.len()
    );
    Ok(config)
}
