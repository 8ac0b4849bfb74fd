pub mod resolver;
pub mod schema;
pub mod swarm;

pub use resolver::{
    resolve_configuration, AgentConfigurationRecord, AgentDefinitionStore,
    InMemoryDefinitionStore,
};
pub use schema::{
    sanitize_node_name, AgentNode, ConversationManagerType, InferenceParameters,
    ModelConfiguration, ToolKind, INVOKE_SUBAGENT_PREFIX, RETRIEVE_FROM_KB_PREFIX,
};
pub use swarm::{AgentReference, OrchestratorBounds, SwarmConfiguration};
