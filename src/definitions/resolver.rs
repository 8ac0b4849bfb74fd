use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::schema::{sanitize_node_name, AgentNode, ModelConfiguration};
use super::swarm::{AgentReference, SwarmConfiguration};
use crate::error::ConfigError;

/// A stored single-agent configuration, as published for one runtime version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfigurationRecord {
    #[serde(default)]
    pub instructions: String,
    pub model_inference_parameters: ModelConfiguration,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub tool_parameters: HashMap<String, Value>,
    #[serde(default)]
    pub mcp_servers: Vec<String>,
}

impl AgentConfigurationRecord {
    pub fn into_node(self, name: &str) -> AgentNode {
        AgentNode {
            name: sanitize_node_name(name),
            instructions: self.instructions,
            model_inference_parameters: self.model_inference_parameters,
            tools: self.tools,
            tool_parameters: self.tool_parameters,
            mcp_servers: self.mcp_servers,
        }
    }
}

/// Where agent definitions referenced by a swarm live.
#[async_trait]
pub trait AgentDefinitionStore: Send + Sync {
    /// Endpoint name to runtime version for an agent, `None` if the agent is unknown.
    async fn endpoint_versions(&self, agent_name: &str) -> Result<Option<HashMap<String, String>>>;

    async fn get_definition(
        &self,
        agent_name: &str,
        version: &str,
    ) -> Result<Option<AgentConfigurationRecord>>;
}

/// Replace `agentReferences` with concrete agent definitions and re-validate.
///
/// Configurations that already carry inline agents are validated and returned
/// unchanged.
pub async fn resolve_configuration(
    config: SwarmConfiguration,
    store: &dyn AgentDefinitionStore,
) -> Result<SwarmConfiguration> {
    if !config.needs_resolution() {
        config.validate()?;
        return Ok(config);
    }

    log::info!(
        "Loading {} referenced agents: {:?}",
        config.agent_references.len(),
        config
            .agent_references
            .iter()
            .map(|r| r.agent_name.as_str())
            .collect::<Vec<_>>()
    );

    let mut agents = Vec::with_capacity(config.agent_references.len());
    for reference in &config.agent_references {
        agents.push(resolve_reference(reference, store).await?);
    }

    let resolved = SwarmConfiguration {
        agents,
        agent_references: Vec::new(),
        ..config
    };
    resolved.validate()?;

    Ok(resolved)
}

async fn resolve_reference(
    reference: &AgentReference,
    store: &dyn AgentDefinitionStore,
) -> Result<AgentNode> {
    let failure = |reason: String| ConfigError::ReferenceResolution {
        agent: reference.agent_name.clone(),
        endpoint: reference.endpoint_name.clone(),
        reason,
    };

    let versions = store
        .endpoint_versions(&reference.agent_name)
        .await?
        .ok_or_else(|| failure("agent not found".to_string()))?;

    let version = versions.get(&reference.endpoint_name).ok_or_else(|| {
        let mut available: Vec<&String> = versions.keys().collect();
        available.sort();
        failure(format!("no such endpoint, available endpoints: {:?}", available))
    })?;

    log::info!(
        "Loading config for agent '{}' endpoint '{}' (version {})",
        reference.agent_name,
        reference.endpoint_name,
        version
    );

    let record = store
        .get_definition(&reference.agent_name, version)
        .await?
        .ok_or_else(|| failure(format!("version {} has no configuration", version)))?;

    let node = record.into_node(&reference.agent_name);
    log::info!(
        "Successfully loaded agent '{}' with {} tools",
        node.name,
        node.tools.len()
    );

    Ok(node)
}

#[derive(Clone, Default)]
pub struct InMemoryDefinitionStore {
    endpoints: Arc<RwLock<HashMap<String, HashMap<String, String>>>>,
    definitions: Arc<RwLock<HashMap<(String, String), AgentConfigurationRecord>>>,
}

impl InMemoryDefinitionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(
        &self,
        agent_name: &str,
        version: &str,
        record: AgentConfigurationRecord,
    ) -> Result<()> {
        let mut definitions = self
            .definitions
            .write()
            .map_err(|_| anyhow!("definition store lock poisoned"))?;
        definitions.insert((agent_name.to_string(), version.to_string()), record);
        Ok(())
    }

    pub fn point_endpoint(&self, agent_name: &str, endpoint: &str, version: &str) -> Result<()> {
        let mut endpoints = self
            .endpoints
            .write()
            .map_err(|_| anyhow!("definition store lock poisoned"))?;
        endpoints
            .entry(agent_name.to_string())
            .or_default()
            .insert(endpoint.to_string(), version.to_string());
        Ok(())
    }
}

#[async_trait]
impl AgentDefinitionStore for InMemoryDefinitionStore {
    async fn endpoint_versions(&self, agent_name: &str) -> Result<Option<HashMap<String, String>>> {
        let endpoints = self
            .endpoints
            .read()
            .map_err(|_| anyhow!("definition store lock poisoned"))?;
        Ok(endpoints.get(agent_name).cloned())
    }

    async fn get_definition(
        &self,
        agent_name: &str,
        version: &str,
    ) -> Result<Option<AgentConfigurationRecord>> {
        let definitions = self
            .definitions
            .read()
            .map_err(|_| anyhow!("definition store lock poisoned"))?;
        Ok(definitions
            .get(&(agent_name.to_string(), version.to_string()))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(instructions: &str) -> AgentConfigurationRecord {
        AgentConfigurationRecord {
            instructions: instructions.to_string(),
            model_inference_parameters: ModelConfiguration::new("us.amazon.nova-pro-v1:0"),
            tools: vec!["get_current_time".to_string()],
            tool_parameters: HashMap::from([("get_current_time".to_string(), json!({}))]),
            mcp_servers: vec![],
        }
    }

    fn reference(agent: &str, endpoint: &str) -> AgentReference {
        AgentReference {
            agent_name: agent.to_string(),
            endpoint_name: endpoint.to_string(),
        }
    }

    fn referencing_config(refs: Vec<AgentReference>, entry: &str) -> SwarmConfiguration {
        let mut config = SwarmConfiguration::new(vec![], entry);
        config.agent_references = refs;
        config
    }

    fn populated_store() -> InMemoryDefinitionStore {
        let store = InMemoryDefinitionStore::new();
        store.publish("researcher", "3", record("research v3")).unwrap();
        store.point_endpoint("researcher", "DEFAULT", "3").unwrap();
        store.publish("writer", "1", record("write v1")).unwrap();
        store.point_endpoint("writer", "prod", "1").unwrap();
        store
    }

    #[tokio::test]
    async fn test_references_resolved_into_agents() {
        let store = populated_store();
        let config = referencing_config(
            vec![reference("researcher", "DEFAULT"), reference("writer", "prod")],
            "researcher",
        );

        let resolved = resolve_configuration(config, &store).await.unwrap();

        assert!(resolved.agent_references.is_empty());
        assert_eq!(resolved.node_names(), vec!["researcher", "writer"]);
        assert_eq!(resolved.agents[0].instructions, "research v3");
    }

    #[tokio::test]
    async fn test_unknown_endpoint_fails() {
        let store = populated_store();
        let config = referencing_config(vec![reference("writer", "staging")], "writer");

        let err = resolve_configuration(config, &store).await.unwrap_err();
        let config_err = err.downcast_ref::<ConfigError>().unwrap();
        assert!(matches!(config_err, ConfigError::ReferenceResolution { .. }));
        assert!(err.to_string().contains("prod"));
    }

    #[tokio::test]
    async fn test_unknown_agent_fails() {
        let store = populated_store();
        let config = referencing_config(vec![reference("critic", "DEFAULT")], "critic");
        assert!(resolve_configuration(config, &store).await.is_err());
    }

    #[tokio::test]
    async fn test_entry_revalidated_after_resolution() {
        let store = populated_store();
        let config = referencing_config(vec![reference("writer", "prod")], "researcher");

        let err = resolve_configuration(config, &store).await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<ConfigError>(),
            Some(&ConfigError::EntryNodeMissing("researcher".to_string()))
        );
    }

    #[tokio::test]
    async fn test_duplicate_references_rejected_after_resolution() {
        let store = populated_store();
        let config = referencing_config(
            vec![reference("writer", "prod"), reference("writer", "prod")],
            "writer",
        );

        let err = resolve_configuration(config, &store).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::DuplicateNodes(_))
        ));
    }
}
