//! Scripted model, embedder and engine harness shared by the engine tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;

use cb_domain::config::{Config, StoreKind};
use cb_domain::error::{Error, Result};
use cb_domain::message::Topic;
use cb_domain::tenant::{ApiKey, TenantConfig};
use cb_domain::tool::{ToolCall, ToolDefinition};
use cb_domain::turn::ConversationTurn;
use cb_engine::{Engine, EngineParts, StaticDomainSource, StaticTenantSource};
use cb_messages::InMemoryMessageStore;
use cb_providers::{ChatRequest, ChatResponse, Embedder, LlmProvider, ProviderFactory};
use cb_rag::{InMemoryVectorStore, Passage, Retriever};

// ── Scripted model ────────────────────────────────────────────────────

/// What the model does on one call.
pub enum Reply {
    Text(String),
    Tools(Vec<ToolCall>),
    Fail,
    /// Never answers; only cancellation gets the run out.
    Hang,
}

pub fn text(s: &str) -> Reply {
    Reply::Text(s.to_string())
}

pub fn call(id: &str, tool: &str, args: serde_json::Value) -> ToolCall {
    ToolCall {
        call_id: id.into(),
        tool_name: tool.into(),
        arguments: args,
    }
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub credential: String,
    pub messages: Vec<ConversationTurn>,
}

type Script = dyn Fn(usize, &ChatRequest) -> Reply + Send + Sync;

/// One model shared by every credential's provider. `script` gets the
/// zero-based call number across all credentials.
pub struct ScriptedModel {
    script: Box<Script>,
    calls: Mutex<Vec<RecordedCall>>,
    builds: AtomicUsize,
    bound: Mutex<Vec<Vec<String>>>,
}

impl ScriptedModel {
    pub fn new(script: impl Fn(usize, &ChatRequest) -> Reply + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            script: Box::new(script),
            calls: Mutex::new(Vec::new()),
            builds: AtomicUsize::new(0),
            bound: Mutex::new(Vec::new()),
        })
    }

    /// Replies with the given steps in order, then plain text forever.
    pub fn sequence(steps: Vec<Reply>) -> Arc<Self> {
        let steps = Mutex::new(steps.into_iter().collect::<std::collections::VecDeque<_>>());
        Self::new(move |_, _| steps.lock().pop_front().unwrap_or_else(|| text("done")))
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Provider instances the factory has built.
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    /// Tool names of every provider built with a non-empty tool set.
    pub fn bound_tool_sets(&self) -> Vec<Vec<String>> {
        self.bound.lock().clone()
    }
}

struct ScriptedProvider {
    credential: String,
    model: Arc<ScriptedModel>,
}

#[async_trait::async_trait]
impl LlmProvider for ScriptedProvider {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse> {
        let n = {
            let mut calls = self.model.calls.lock();
            calls.push(RecordedCall {
                credential: self.credential.clone(),
                messages: req.messages.clone(),
            });
            calls.len() - 1
        };
        match (self.model.script)(n, req) {
            Reply::Text(content) => Ok(ChatResponse {
                content,
                model: "scripted".into(),
                finish_reason: Some("stop".into()),
                ..Default::default()
            }),
            Reply::Tools(tool_calls) => Ok(ChatResponse {
                tool_calls,
                model: "scripted".into(),
                finish_reason: Some("tool_calls".into()),
                ..Default::default()
            }),
            Reply::Fail => Err(Error::Provider {
                provider: "scripted".into(),
                message: "upstream 500".into(),
            }),
            Reply::Hang => std::future::pending().await,
        }
    }

    fn provider_id(&self) -> &str {
        "scripted"
    }
}

pub struct ScriptedFactory(pub Arc<ScriptedModel>);

impl ProviderFactory for ScriptedFactory {
    fn build(
        &self,
        credential: &ApiKey,
        _model: &str,
        tools: &[ToolDefinition],
    ) -> Result<Arc<dyn LlmProvider>> {
        self.0.builds.fetch_add(1, Ordering::SeqCst);
        if !tools.is_empty() {
            self.0
                .bound
                .lock()
                .push(tools.iter().map(|t| t.name.clone()).collect());
        }
        Ok(Arc::new(ScriptedProvider {
            credential: credential.expose().to_string(),
            model: self.0.clone(),
        }))
    }
}

// ── Embedder ──────────────────────────────────────────────────────────

/// Same vector for every text, so searches return passages in insertion
/// order. Can be switched to fail.
#[derive(Default)]
pub struct UnitEmbedder {
    pub fail: AtomicBool,
}

#[async_trait::async_trait]
impl Embedder for UnitEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Embedding("embedding service down".into()));
        }
        Ok(vec![1.0, 0.0])
    }
}

// ── Fixtures ──────────────────────────────────────────────────────────

pub fn tenant(id: &str, tools: &[&str], keys: &[&str]) -> TenantConfig {
    serde_json::from_value(json!({
        "chatbot_id": id,
        "system_prompt": "You are the assistant for {{chatbot_id}}.",
        "model_name": "gpt-test",
        "tool_names": tools,
        "api_keys": keys,
    }))
    .unwrap()
}

/// Defaults suited to tests: memory store, fast flushes, no refresher.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.persistence.store = StoreKind::Memory;
    config.persistence.flush_interval_ms = 10;
    config.access.refresh_interval_secs = 0;
    config.topics.catalog.insert(
        "bot-1".into(),
        vec![
            Topic {
                id: "t-billing".into(),
                name: "Billing".into(),
            },
            Topic {
                id: "t-other".into(),
                name: "Other".into(),
            },
        ],
    );
    config
}

pub struct Harness {
    pub engine: Engine,
    pub model: Arc<ScriptedModel>,
    pub tenants: Arc<StaticTenantSource>,
    pub messages: Arc<InMemoryMessageStore>,
    pub embedder: Arc<UnitEmbedder>,
}

pub struct HarnessBuilder {
    config: Config,
    tenants: Vec<TenantConfig>,
    docs: Vec<(String, String, Option<String>)>,
    domains: Vec<cb_domain::tenant::DomainAccessEntry>,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            config: test_config(),
            tenants: Vec::new(),
            docs: Vec::new(),
            domains: Vec::new(),
        }
    }

    pub fn config(mut self, f: impl FnOnce(&mut Config)) -> Self {
        f(&mut self.config);
        self
    }

    pub fn tenant(mut self, t: TenantConfig) -> Self {
        self.tenants.push(t);
        self
    }

    pub fn doc(mut self, tenant: &str, text: &str, citation: Option<&str>) -> Self {
        self.docs
            .push((tenant.into(), text.into(), citation.map(String::from)));
        self
    }

    pub fn domain(mut self, key: &str, chatbot_id: &str, domain: &str) -> Self {
        self.domains.push(cb_domain::tenant::DomainAccessEntry {
            api_key: ApiKey::new(key),
            chatbot_id: chatbot_id.into(),
            allowed_domain: domain.into(),
        });
        self
    }

    pub async fn start(self, model: Arc<ScriptedModel>) -> Harness {
        let embedder = Arc::new(UnitEmbedder::default());
        let retriever = Retriever::new(embedder.clone(), Arc::new(InMemoryVectorStore::new()));
        for (tenant, text, citation) in self.docs {
            retriever
                .index(&tenant, Passage { text, citation })
                .await
                .unwrap();
        }

        let tenants = Arc::new(StaticTenantSource::new(self.tenants));
        let messages = Arc::new(InMemoryMessageStore::new());
        let engine = Engine::start(
            &self.config,
            EngineParts {
                tenants: tenants.clone(),
                factory: Arc::new(ScriptedFactory(model.clone())),
                retriever: Some(retriever),
                http: reqwest::Client::new(),
                messages: messages.clone(),
                domains: Arc::new(StaticDomainSource::new(self.domains)),
            },
        )
        .await
        .unwrap();

        Harness {
            engine,
            model,
            tenants,
            messages,
            embedder,
        }
    }
}
