pub mod config;
pub mod definitions;
pub mod engine;
pub mod error;
pub mod factory;
pub mod providers;
pub mod session;
pub mod tools;
pub mod types;

pub use config::Config;
pub use definitions::{OrchestratorBounds, SwarmConfiguration};
pub use engine::{ClientEvent, RunRequest, StreamAggregator, Swarm, SwarmEvent};
pub use error::{AgentError, ConfigError, ToolError};
pub use factory::SwarmFactory;
pub use session::{InvocationRequest, SessionContext};
pub use types::*;
