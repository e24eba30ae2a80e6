pub mod openai;
pub mod provider;

pub use openai::OpenAiProvider;
pub use provider::{
    deterministic_fallback_response, ChatRequest, ChatResponse, LlmProvider, Message,
    ProviderError, Role, ToolCall, ToolDefinition,
};
