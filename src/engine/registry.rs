use std::collections::HashMap;

use super::agent::Agent;
use crate::definitions::sanitize_node_name;
use crate::error::ConfigError;
use crate::types::NodeId;

/// Agent name to agent instance, fixed for the lifetime of a swarm.
pub struct NodeRegistry {
    agents: HashMap<NodeId, Agent>,
    order: Vec<NodeId>,
    entry: NodeId,
}

impl NodeRegistry {
    pub fn new(agents: Vec<Agent>, entry: &str) -> Result<Self, ConfigError> {
        if agents.is_empty() {
            return Err(ConfigError::EmptyNodeSet);
        }

        let mut map = HashMap::with_capacity(agents.len());
        let mut order = Vec::with_capacity(agents.len());
        let mut duplicates = Vec::new();
        for agent in agents {
            let name = agent.name().clone();
            if map.contains_key(&name) {
                if !duplicates.contains(&name) {
                    duplicates.push(name);
                }
                continue;
            }
            order.push(name.clone());
            map.insert(name, agent);
        }
        if !duplicates.is_empty() {
            return Err(ConfigError::DuplicateNodes(duplicates));
        }

        let entry = sanitize_node_name(entry);
        if !map.contains_key(&entry) {
            return Err(ConfigError::EntryNodeMissing(entry));
        }

        Ok(Self {
            agents: map,
            order,
            entry,
        })
    }

    pub fn entry(&self) -> &NodeId {
        &self.entry
    }

    /// Node names in configuration order.
    pub fn names(&self) -> &[NodeId] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.agents.contains_key(name)
    }

    /// Map a handoff target as written by a model onto a registered node.
    pub fn resolve(&self, requested: &str) -> Option<NodeId> {
        if self.contains(requested) {
            return Some(requested.to_string());
        }
        let sanitized = sanitize_node_name(requested);
        self.contains(&sanitized).then_some(sanitized)
    }

    pub fn get(&self, name: &str) -> Option<&Agent> {
        self.agents.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Agent> {
        self.agents.get_mut(name)
    }

    /// Every node other than `name`, in configuration order.
    pub fn peers_of(&self, name: &str) -> Vec<NodeId> {
        self.order
            .iter()
            .filter(|n| n.as_str() != name)
            .cloned()
            .collect()
    }

    pub fn reset_all(&mut self) {
        for agent in self.agents.values_mut() {
            agent.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definitions::{AgentNode, ModelConfiguration};
    use crate::engine::agent::ExecutorConfig;
    use crate::engine::conversation::NullConversationManager;
    use crate::providers::scripted::ScriptedProvider;
    use std::sync::Arc;

    fn agent(name: &str) -> Agent {
        Agent::new(
            AgentNode::new(name, "x", ModelConfiguration::new("m")),
            Arc::new(ScriptedProvider::new()),
            vec![],
            Box::new(NullConversationManager),
            ExecutorConfig::default(),
        )
    }

    #[test]
    fn test_registry_lookup() {
        let registry = NodeRegistry::new(vec![agent("researcher"), agent("writer")], "researcher").unwrap();

        assert_eq!(registry.entry(), "researcher");
        assert_eq!(registry.len(), 2);
        assert!(registry.contains("writer"));
        assert_eq!(registry.peers_of("researcher"), vec!["writer"]);
    }

    #[test]
    fn test_resolve_sanitizes_requested_name() {
        let registry = NodeRegistry::new(vec![agent("research agent")], "research agent").unwrap();

        assert_eq!(registry.resolve("research agent"), Some("research_agent".to_string()));
        assert_eq!(registry.resolve("critic"), None);
    }

    #[test]
    fn test_missing_entry_rejected() {
        let err = NodeRegistry::new(vec![agent("writer")], "editor").err().unwrap();
        assert_eq!(err, ConfigError::EntryNodeMissing("editor".to_string()));
    }

    #[test]
    fn test_duplicates_rejected() {
        let err = NodeRegistry::new(vec![agent("writer"), agent("writer")], "writer")
            .err()
            .unwrap();
        assert_eq!(err, ConfigError::DuplicateNodes(vec!["writer".to_string()]));
    }
}
