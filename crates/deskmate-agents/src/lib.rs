pub mod agent_loop;
pub mod proactive;
pub mod prompt;
pub mod providers;
pub mod rotation;
pub mod supervisor;
pub mod tools;
pub mod window;

pub use agent_loop::{AgentLoop, LoopPhase, LoopSettings, TurnInputs, TurnState, next_phase};
pub use proactive::{NotificationFeed, StoreFeed};
pub use providers::{
    ChatMessage, ChatRole, ContentBlock, GeminiProvider, LlmProvider, LlmRequest, LlmResponse,
    MessagePart, ToolDefinition, Usage,
};
pub use rotation::{ActiveBinding, Credential, RotationSnapshot, RotationState};
pub use supervisor::{GeminiBinder, ModelBinder, Supervisor, TurnRequest, TurnResult, is_retryable};
pub use tools::{Tool, ToolContext, ToolOutput, ToolRegistry, workplace_registry};
