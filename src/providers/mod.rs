pub mod llm;
pub mod openai;
pub mod scripted;

pub use llm::{
    ModelEvent, ModelProvider, ModelRequest, ModelStream, Message, Role, ToolCall, ToolSpec,
    HANDOFF_TOOL_NAME,
};
pub use openai::OpenAICompatibleProvider;
pub use scripted::{ScriptedProvider, ScriptedStep, ScriptedTurn};
