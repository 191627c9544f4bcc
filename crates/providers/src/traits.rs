use cb_domain::error::Result;
use cb_domain::tool::{ToolCall, ToolDefinition};
use cb_domain::turn::ConversationTurn;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Chat request / response
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-tenant sampling knobs. `None` leaves the choice to the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GenerationOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub messages: Vec<ConversationTurn>,
    /// Empty means "use whatever the provider was built with".
    pub tools: Vec<ToolDefinition>,
    pub options: GenerationOptions,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// One assistant reply: text, tool calls, or both.
#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<Usage>,
    /// Model name echoed by the backend.
    pub model: String,
    pub finish_reason: Option<String>,
}

impl ChatResponse {
    pub fn to_turn(&self) -> ConversationTurn {
        ConversationTurn::assistant_with_tools(self.content.clone(), self.tool_calls.clone())
    }

    pub fn requests_tools(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Backend seams
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A chat backend holding exactly one credential. Tenants with several
/// keys get one instance per key behind [`crate::KeyRotatingClient`].
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse>;

    /// Short backend name used in errors and `llm.call` spans.
    fn provider_id(&self) -> &str;
}

/// Text to vector for similarity search. The same text must map to the
/// same vector for cosine ranking to be stable.
#[async_trait::async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}
