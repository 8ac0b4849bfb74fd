use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::load_swarm_configuration;
use crate::definitions::{resolve_configuration, AgentDefinitionStore, SwarmConfiguration};
use crate::engine::{ClientEvent, RunRequest, StreamAggregator, Swarm};
use crate::factory::SwarmFactory;
use crate::tools::{McpClientManager, McpConnector};
use crate::types::SwarmResult;

/// Where a session's swarm configuration comes from.
#[async_trait]
pub trait ConfigurationSource: Send + Sync {
    async fn load(&self) -> Result<SwarmConfiguration>;
}

pub struct FileConfigurationSource {
    path: PathBuf,
}

impl FileConfigurationSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ConfigurationSource for FileConfigurationSource {
    async fn load(&self) -> Result<SwarmConfiguration> {
        load_swarm_configuration(&self.path)
    }
}

pub struct StaticConfigurationSource {
    config: SwarmConfiguration,
}

impl StaticConfigurationSource {
    pub fn new(config: SwarmConfiguration) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ConfigurationSource for StaticConfigurationSource {
    async fn load(&self) -> Result<SwarmConfiguration> {
        Ok(self.config.clone())
    }
}

#[derive(Debug, Clone, Default)]
pub struct InvocationRequest {
    pub message: String,
    pub user_id: String,
    pub session_id: String,
    pub message_id: Option<String>,
    pub is_heartbeat: bool,
}

impl InvocationRequest {
    pub fn new(message: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            session_id: session_id.into(),
            ..Default::default()
        }
    }

    pub fn heartbeat(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            is_heartbeat: true,
            ..Default::default()
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }
}

/// Per-session swarm cache owned by the request-handling layer.
///
/// The swarm is built on the first request of a session and reused while
/// the session id stays the same. A new session id closes the old swarm's
/// MCP connections before anything is rebuilt, and a failed build closes
/// whatever it opened.
pub struct SessionContext {
    factory: SwarmFactory,
    source: Arc<dyn ConfigurationSource>,
    store: Option<Arc<dyn AgentDefinitionStore>>,
    mcp: Option<Arc<McpClientManager>>,
    current_session: Option<String>,
    swarm: Option<Swarm>,
}

impl SessionContext {
    pub fn new(factory: SwarmFactory, source: Arc<dyn ConfigurationSource>) -> Self {
        Self {
            factory,
            source,
            store: None,
            mcp: None,
            current_session: None,
            swarm: None,
        }
    }

    pub fn with_definition_store(mut self, store: Arc<dyn AgentDefinitionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_mcp_connector(mut self, connector: Arc<dyn McpConnector>) -> Self {
        self.mcp = Some(Arc::new(McpClientManager::new(connector)));
        self
    }

    pub fn current_session(&self) -> Option<&str> {
        self.current_session.as_deref()
    }

    pub fn has_swarm(&self) -> bool {
        self.swarm.is_some()
    }

    pub fn mcp(&self) -> Option<&Arc<McpClientManager>> {
        self.mcp.as_ref()
    }

    async fn load_configuration(&self) -> Result<SwarmConfiguration> {
        let config = self
            .source
            .load()
            .await
            .context("loading swarm configuration")?;
        match &self.store {
            Some(store) => resolve_configuration(config, store.as_ref()).await,
            None => {
                config.validate()?;
                Ok(config)
            }
        }
    }

    async fn build_swarm(&self) -> Result<Swarm> {
        let config = self.load_configuration().await?;
        self.factory.build(&config, self.mcp.as_deref()).await
    }

    async fn release_connections(&self) {
        if let Some(mcp) = &self.mcp {
            mcp.cleanup().await;
        }
    }

    /// Make sure a swarm exists for `session_id`, rebuilding it when the
    /// session changed.
    pub async fn ensure_swarm(&mut self, session_id: &str) -> Result<&mut Swarm> {
        if self.current_session.as_deref() != Some(session_id) {
            if let Some(previous) = self.current_session.take() {
                log::info!(
                    "Session changed from {} to {}, discarding cached swarm",
                    previous,
                    session_id
                );
            }
            self.swarm = None;
            self.release_connections().await;
        }

        let swarm = match self.swarm.take() {
            Some(swarm) => swarm,
            None => match self.build_swarm().await {
                Ok(swarm) => {
                    log::info!("Initialized swarm for session {}", session_id);
                    swarm
                }
                Err(e) => {
                    log::error!("Failed to initialize swarm for session {}: {:#}", session_id, e);
                    self.release_connections().await;
                    return Err(e);
                }
            },
        };
        self.current_session = Some(session_id.to_string());
        Ok(self.swarm.insert(swarm))
    }

    /// Handle one request. Client frames are written to `out` while the run
    /// progresses; heartbeats only initialize the swarm and return `None`.
    pub async fn invoke(
        &mut self,
        request: InvocationRequest,
        out: mpsc::Sender<ClientEvent>,
    ) -> Result<Option<SwarmResult>> {
        let swarm = self.ensure_swarm(&request.session_id).await?;

        if request.is_heartbeat {
            log::debug!("Heartbeat for session {}", request.session_id);
            return Ok(None);
        }

        let message_id = request
            .message_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let aggregator =
            StreamAggregator::new(&request.session_id, &request.user_id, message_id);
        let run = RunRequest {
            message: request.message,
            user_id: request.user_id,
            session_id: request.session_id,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let (result, _) = tokio::join!(swarm.run(run, tx), aggregator.forward(rx, out));

        Ok(Some(result))
    }

    /// Drop the cached swarm and close its connections.
    pub async fn shutdown(&mut self) {
        self.swarm = None;
        self.current_session = None;
        self.release_connections().await;
    }
}
