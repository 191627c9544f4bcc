pub mod auth;
pub mod embeddings;
pub mod openai_compat;
pub mod rotating;
pub mod round_robin;
pub mod traits;
pub(crate) mod util;

// Re-exports for convenience.
pub use auth::AuthRotator;
pub use embeddings::OpenAiEmbedder;
pub use openai_compat::{OpenAiCompatFactory, OpenAiCompatProvider};
pub use rotating::{KeyRotatingClient, ProviderFactory};
pub use round_robin::RoundRobin;
pub use util::resolve_keys;
pub use traits::{ChatRequest, ChatResponse, Embedder, GenerationOptions, LlmProvider, Usage};
