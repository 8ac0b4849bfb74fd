//! Loading swarm configurations from disk and rejecting bad ones before any
//! run starts.

use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

use aca_swarm::config::load_swarm_configuration;
use aca_swarm::definitions::{
    AgentNode, ConversationManagerType, ModelConfiguration, OrchestratorBounds, SwarmConfiguration,
};
use aca_swarm::error::ConfigError;
use aca_swarm::factory::SwarmFactory;
use aca_swarm::providers::ScriptedProvider;
use aca_swarm::tools::ToolRegistry;

fn write(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

fn factory() -> SwarmFactory {
    SwarmFactory::new(
        Arc::new(ScriptedProvider::new()),
        Arc::new(ToolRegistry::with_builtins("UTC")),
    )
}

fn node(name: &str) -> AgentNode {
    AgentNode::new(name, "Be helpful.", ModelConfiguration::new("gpt-4o-mini"))
}

async fn build_error(config: SwarmConfiguration) -> ConfigError {
    let err = factory().build(&config, None).await.err().unwrap();
    err.downcast_ref::<ConfigError>().cloned().unwrap()
}

#[test]
fn test_load_yaml_configuration() {
    let dir = TempDir::new().unwrap();
    let path = write(
        &dir,
        "swarm.yaml",
        r#"
entryAgent: research agent
conversationManager: summarizing
orchestrator:
  maxHandoffs: 4
  nodeTimeoutSeconds: 60
agents:
  - name: research agent
    instructions: Gather facts.
    modelInferenceParameters:
      modelId: gpt-4o-mini
      parameters:
        maxTokens: 1024
        temperature: 0.2
        topP: 0.9
    tools: [get_current_time]
    toolParameters:
      get_current_time:
        timezone: "+01:00"
  - name: writer
    instructions: Write the answer.
    modelInferenceParameters:
      modelId: gpt-4o-mini
"#,
    );

    let config = load_swarm_configuration(&path).unwrap();

    assert_eq!(config.entry_agent, "research_agent");
    assert_eq!(config.node_names(), vec!["research_agent", "writer"]);
    assert_eq!(config.conversation_manager, ConversationManagerType::Summarizing);
    assert_eq!(config.orchestrator.max_handoffs, 4);
    assert_eq!(config.orchestrator.node_timeout_seconds, 60.0);
    assert_eq!(config.orchestrator.max_iterations, 20);
    assert_eq!(config.agents[0].model_inference_parameters.parameters.top_p, Some(0.9));
    assert!(config.validate().is_ok());
}

#[test]
fn test_load_json_configuration() {
    let dir = TempDir::new().unwrap();
    let path = write(
        &dir,
        "swarm.json",
        &json!({
            "entryAgent": "solo",
            "agents": [{
                "name": "solo",
                "instructions": "Answer.",
                "modelInferenceParameters": {"modelId": "gpt-4o-mini"},
                "mcpServers": ["github"]
            }]
        })
        .to_string(),
    );

    let config = load_swarm_configuration(&path).unwrap();

    assert_eq!(config.mcp_servers(), vec!["github"]);
    assert_eq!(config.orchestrator, OrchestratorBounds::default());
}

#[test]
fn test_load_toml_configuration() {
    let dir = TempDir::new().unwrap();
    let path = write(
        &dir,
        "swarm.toml",
        r#"
entryAgent = "solo"

[orchestrator]
maxIterations = 3

[[agents]]
name = "solo"
instructions = "Answer."

[agents.modelInferenceParameters]
modelId = "gpt-4o-mini"
"#,
    );

    let config = load_swarm_configuration(&path).unwrap();

    assert_eq!(config.orchestrator.max_iterations, 3);
    assert_eq!(config.agents.len(), 1);
}

#[test]
fn test_load_reports_missing_file() {
    let err = load_swarm_configuration(std::path::Path::new("/nonexistent/swarm.yaml")).unwrap_err();
    assert!(format!("{:#}", err).contains("reading /nonexistent/swarm.yaml"));
}

#[tokio::test]
async fn test_missing_entry_fails_at_build_time() {
    let config = SwarmConfiguration::new(vec![node("writer")], "editor");

    assert_eq!(
        build_error(config).await,
        ConfigError::EntryNodeMissing("editor".to_string())
    );
}

#[tokio::test]
async fn test_duplicate_agents_rejected() {
    let config = SwarmConfiguration::new(vec![node("writer"), node("writer")], "writer");

    assert_eq!(
        build_error(config).await,
        ConfigError::DuplicateNodes(vec!["writer".to_string()])
    );
}

#[tokio::test]
async fn test_invalid_bounds_rejected() {
    let config = SwarmConfiguration::new(vec![node("solo")], "solo").with_bounds(OrchestratorBounds {
        node_timeout_seconds: 1000.0,
        ..Default::default()
    });

    assert!(matches!(build_error(config).await, ConfigError::InvalidBounds(_)));
}

#[tokio::test]
async fn test_oversized_timeout_rejected_before_run() {
    let config = SwarmConfiguration::new(vec![node("solo")], "solo").with_bounds(OrchestratorBounds {
        execution_timeout_seconds: 1e30,
        node_timeout_seconds: 1e30,
        ..Default::default()
    });

    assert!(matches!(build_error(config).await, ConfigError::InvalidBounds(_)));
}

#[tokio::test]
async fn test_orphaned_tool_parameters_rejected() {
    let mut agent = node("solo");
    agent
        .tool_parameters
        .insert("get_current_time".to_string(), json!({}));
    let config = SwarmConfiguration::new(vec![agent], "solo");

    assert!(matches!(
        build_error(config).await,
        ConfigError::ToolParametersMismatch { .. }
    ));
}

#[tokio::test]
async fn test_unavailable_tool_kind_rejected() {
    let config = SwarmConfiguration::new(
        vec![node("solo").with_tool("retrieve_from_kb_docs", json!({}))],
        "solo",
    );

    assert_eq!(
        build_error(config).await,
        ConfigError::ToolUnavailable {
            node: "solo".to_string(),
            tool: "retrieve_from_kb_docs".to_string(),
        }
    );
}

#[tokio::test]
async fn test_named_timezone_accepted() {
    let config = SwarmConfiguration::new(
        vec![node("solo").with_tool("get_current_time", json!({"timezone": "America/New_York"}))],
        "solo",
    );

    assert!(factory().build(&config, None).await.is_ok());
}

#[tokio::test]
async fn test_bad_tool_parameters_rejected() {
    let config = SwarmConfiguration::new(
        vec![node("solo").with_tool("get_current_time", json!({"timezone": "Mars/Olympus"}))],
        "solo",
    );

    assert!(matches!(
        build_error(config).await,
        ConfigError::InvalidToolParameters { .. }
    ));
}
