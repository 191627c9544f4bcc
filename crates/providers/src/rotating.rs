//! Multi-credential chat client.
//!
//! [`KeyRotatingClient`] spreads a tenant's chat traffic across all of its
//! credentials in strict round-robin order. It never retries on another
//! credential: a provider error is returned to the caller as-is.

use std::sync::Arc;

use cb_domain::error::{Error, Result};
use cb_domain::tenant::ApiKey;
use cb_domain::tool::ToolDefinition;
use cb_domain::turn::ConversationTurn;
use parking_lot::RwLock;

use crate::round_robin::RoundRobin;
use crate::traits::{ChatRequest, ChatResponse, GenerationOptions, LlmProvider};

/// Creates a provider bound to one credential and tool set.
pub trait ProviderFactory: Send + Sync {
    fn build(
        &self,
        credential: &ApiKey,
        model: &str,
        tools: &[ToolDefinition],
    ) -> Result<Arc<dyn LlmProvider>>;
}

pub struct KeyRotatingClient {
    model: String,
    credentials: Vec<ApiKey>,
    options: GenerationOptions,
    factory: Arc<dyn ProviderFactory>,
    /// One provider per credential, same order as `credentials`. Replaced
    /// wholesale by `bind_tools`.
    bound: RwLock<Arc<Vec<Arc<dyn LlmProvider>>>>,
    tools: RwLock<Arc<Vec<ToolDefinition>>>,
    rr: RoundRobin,
}

impl KeyRotatingClient {
    /// Build unbound providers for every non-empty credential.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] when no usable credential is supplied, or whatever
    /// the factory returns.
    pub fn new(
        credentials: Vec<ApiKey>,
        model: impl Into<String>,
        options: GenerationOptions,
        factory: Arc<dyn ProviderFactory>,
    ) -> Result<Self> {
        let credentials: Vec<ApiKey> = credentials.into_iter().filter(|k| !k.is_empty()).collect();
        if credentials.is_empty() {
            return Err(Error::Config(
                "KeyRotatingClient requires at least one credential".into(),
            ));
        }
        let model = model.into();
        let bound = build_all(factory.as_ref(), &credentials, &model, &[])?;
        Ok(Self {
            model,
            credentials,
            options,
            factory,
            bound: RwLock::new(Arc::new(bound)),
            tools: RwLock::new(Arc::new(Vec::new())),
            rr: RoundRobin::new(),
        })
    }

    /// Rebuild one provider per credential with `tools` bound, then swap the
    /// whole set in at once. On error the previous set stays in place.
    pub fn bind_tools(&self, tools: Vec<ToolDefinition>) -> Result<()> {
        let bound = build_all(self.factory.as_ref(), &self.credentials, &self.model, &tools)?;
        let tool_count = tools.len();
        *self.bound.write() = Arc::new(bound);
        *self.tools.write() = Arc::new(tools);
        tracing::debug!(
            model = %self.model,
            credentials = self.credentials.len(),
            tools = tool_count,
            "bound tools to all credentials"
        );
        Ok(())
    }

    /// One chat completion on the next credential in rotation.
    pub async fn generate(&self, messages: &[ConversationTurn]) -> Result<ChatResponse> {
        let bound = self.bound.read().clone();
        let idx = self.rr.next(bound.len());
        let provider = bound[idx].clone();

        let req = ChatRequest {
            messages: messages.to_vec(),
            tools: Vec::new(),
            options: self.options,
            model: Some(self.model.clone()),
        };

        tracing::debug!(
            credential = %self.credentials[idx],
            provider = provider.provider_id(),
            "dispatching chat request"
        );
        provider.chat(&req).await
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn credential_count(&self) -> usize {
        self.credentials.len()
    }

    pub fn bound_tools(&self) -> Arc<Vec<ToolDefinition>> {
        self.tools.read().clone()
    }
}

fn build_all(
    factory: &dyn ProviderFactory,
    credentials: &[ApiKey],
    model: &str,
    tools: &[ToolDefinition],
) -> Result<Vec<Arc<dyn LlmProvider>>> {
    credentials
        .iter()
        .map(|c| factory.build(c, model, tools))
        .collect()
}

// Manual Debug impl to avoid leaking key values.
impl std::fmt::Debug for KeyRotatingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyRotatingClient")
            .field("model", &self.model)
            .field("credential_count", &self.credentials.len())
            .field("tool_count", &self.tools.read().len())
            .finish()
    }
}
