pub mod agent;
pub mod aggregator;
pub mod conversation;
pub mod events;
pub mod history;
pub mod orchestrator;
pub mod registry;

pub use agent::{Agent, AgentOutcome, ExecutorConfig, NodeInput, NodeOutput};
pub use aggregator::{ClientEvent, FinalFrame, StreamAggregator, TokenFrame};
pub use conversation::{create_manager, ConversationManager};
pub use events::{LogSink, ObservabilityEvent, ObservabilitySink, RecordingSink, SwarmEvent};
pub use history::HandoffHistory;
pub use orchestrator::{RunRequest, Swarm};
pub use registry::NodeRegistry;
