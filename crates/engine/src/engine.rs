//! The service facade request handlers talk to.
//!
//! Wires the graph cache, tenant source, tool registry, retriever, message
//! pipeline and domain index together, and owns their lifecycle.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use cb_domain::config::{AgentConfig, Config, RetrievalConfig};
use cb_domain::error::{Error, Result};
use cb_domain::message::{ChannelMetadata, Feedback, MessageRecord};
use cb_domain::trace::TraceEvent;
use cb_domain::turn::{last_user_content, ConversationTurn, Role};
use cb_messages::{MessagePipeline, MessageStore, PipelineStats, TopicTagger};
use cb_providers::ProviderFactory;
use cb_rag::Retriever;
use cb_tools::{citations_from_passages, ToolRegistry};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::access::{spawn_refresher, DomainAccessIndex, DomainAccessSource};
use crate::cache::GraphCache;
use crate::cancel::CancelMap;
use crate::graph::{AgentOutput, CompiledGraph};
use crate::tenants::TenantSource;

/// External collaborators the engine is assembled from.
pub struct EngineParts {
    pub tenants: Arc<dyn TenantSource>,
    pub factory: Arc<dyn ProviderFactory>,
    pub retriever: Option<Retriever>,
    pub http: reqwest::Client,
    pub messages: Arc<dyn MessageStore>,
    pub domains: Arc<dyn DomainAccessSource>,
}

/// One user message plus the conversation so far.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeRequest {
    pub tenant_id: String,
    pub unique_client_id: String,
    #[serde(default)]
    pub history: Vec<ConversationTurn>,
    pub message: String,
    #[serde(default = "ChannelMetadata::widget")]
    pub metadata: ChannelMetadata,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExchangeReply {
    pub content: String,
    pub citations: Vec<String>,
    pub tool_call_count: usize,
    pub steps: usize,
    pub user_message_uid: Uuid,
    pub assistant_message_uid: Uuid,
}

pub struct Engine {
    tenants: Arc<dyn TenantSource>,
    factory: Arc<dyn ProviderFactory>,
    registry: ToolRegistry,
    retriever: Option<Retriever>,
    cache: GraphCache<CompiledGraph>,
    pipeline: MessagePipeline,
    access: Arc<DomainAccessIndex>,
    requests: CancelMap,
    agent: AgentConfig,
    retrieval: RetrievalConfig,
    background: CancellationToken,
    refresher: Mutex<Option<JoinHandle<()>>>,
}

impl Engine {
    /// Start the persistence worker, load the domain index and, if
    /// configured, the periodic index refresher.
    pub async fn start(config: &Config, parts: EngineParts) -> Result<Self> {
        let registry = ToolRegistry::new(parts.retriever.clone(), parts.http, config.actions.clone());
        let pipeline = MessagePipeline::start(
            &config.persistence,
            parts.messages,
            TopicTagger::new(&config.topics),
        );

        let access = Arc::new(DomainAccessIndex::new());
        if let Err(e) = access.refresh_from(parts.domains.as_ref()).await {
            tracing::warn!(error = %e, "initial domain access load failed, starting with empty index");
        }

        let background = CancellationToken::new();
        let refresher = match config.access.refresh_interval_secs {
            0 => None,
            secs => Some(spawn_refresher(
                access.clone(),
                parts.domains,
                Duration::from_secs(secs),
                background.clone(),
            )),
        };

        tracing::info!(
            retrieval = parts.retriever.is_some(),
            max_steps = config.agent.max_steps,
            domains = access.domain_count(),
            "engine started"
        );

        Ok(Self {
            tenants: parts.tenants,
            factory: parts.factory,
            registry,
            retriever: parts.retriever,
            cache: GraphCache::new(),
            pipeline,
            access,
            requests: CancelMap::new(),
            agent: config.agent.clone(),
            retrieval: config.retrieval.clone(),
            background,
            refresher: Mutex::new(refresher),
        })
    }

    /// The tenant's compiled graph, built on first use.
    pub async fn graph(&self, tenant_id: &str) -> Result<Arc<CompiledGraph>> {
        self.cache
            .get_or_build(tenant_id, || async {
                let started = Instant::now();
                let config = self.tenants.get_config(tenant_id).await?;
                let graph = CompiledGraph::build(&config, &self.registry, self.factory.clone(), &self.agent)?;
                TraceEvent::GraphBuilt {
                    tenant_id: tenant_id.to_owned(),
                    tools: graph.tool_names().len(),
                    credentials: graph.credential_count(),
                    duration_ms: started.elapsed().as_millis() as u64,
                }
                .emit();
                Ok(graph)
            })
            .await
    }

    /// Run the agent over `turns` (history ending with the new user turn)
    /// and return the final answer with its citations.
    ///
    /// When no citation came out of tool calls and the tenant has retrieval
    /// enabled, one best-effort retrieval pass over the last user turn
    /// supplies them. That pass never fails the request.
    pub async fn run_agent(
        &self,
        tenant_id: &str,
        turns: Vec<ConversationTurn>,
        cancel: &CancellationToken,
    ) -> Result<AgentOutput> {
        let graph = self.graph(tenant_id).await?;
        let query = last_user_content(&turns).map(str::to_owned);
        let mut out = graph.run(turns, cancel).await.inspect_err(|e| {
            tracing::warn!(tenant_id, error = %e, kind = ?e.kind(), "agent run failed");
        })?;

        if out.citations.is_empty() && self.agent.fallback_citations && graph.rag_enabled() {
            if let Some(query) = query {
                out.citations = self.fallback_citations(tenant_id, &query, cancel).await;
            }
        }
        Ok(out)
    }

    async fn fallback_citations(&self, tenant_id: &str, query: &str, cancel: &CancellationToken) -> Vec<String> {
        let Some(retriever) = &self.retriever else {
            return Vec::new();
        };
        let result = tokio::select! {
            _ = cancel.cancelled() => return Vec::new(),
            r = retriever.retrieve(tenant_id, query, self.retrieval.fallback_top_k) => r,
        };
        match result {
            Ok(passages) => {
                let mut seen = HashSet::new();
                let citations: Vec<String> = citations_from_passages(&passages)
                    .into_iter()
                    .filter(|c| seen.insert(c.clone()))
                    .collect();
                TraceEvent::FallbackCitations {
                    tenant_id: tenant_id.to_owned(),
                    citations: citations.len(),
                    error: None,
                }
                .emit();
                citations
            }
            Err(e) => {
                tracing::warn!(tenant_id, error = %e, "fallback citation retrieval failed");
                TraceEvent::FallbackCitations {
                    tenant_id: tenant_id.to_owned(),
                    citations: 0,
                    error: Some(e.to_string()),
                }
                .emit();
                Vec::new()
            }
        }
    }

    /// Run one exchange and queue the user and assistant turns for
    /// persistence. Nothing is queued when the run fails.
    pub async fn exchange(&self, request: ExchangeRequest, cancel: &CancellationToken) -> Result<ExchangeReply> {
        if request.message.trim().is_empty() {
            return Err(Error::InvalidInput("message is empty".into()));
        }
        let ExchangeRequest {
            tenant_id,
            unique_client_id,
            mut history,
            message,
            metadata,
        } = request;

        history.push(ConversationTurn::user(message.clone()));
        let out = self.run_agent(&tenant_id, history, cancel).await?;

        let user = MessageRecord::new(
            unique_client_id.clone(),
            tenant_id.clone(),
            Role::User,
            message,
            Vec::new(),
            metadata.clone(),
        );
        let assistant = MessageRecord::new(
            unique_client_id,
            tenant_id,
            Role::Assistant,
            out.content.clone(),
            out.citations.clone(),
            metadata,
        );
        let reply = ExchangeReply {
            content: out.content,
            citations: out.citations,
            tool_call_count: out.tool_call_count,
            steps: out.steps,
            user_message_uid: user.message_uid,
            assistant_message_uid: assistant.message_uid,
        };
        self.pipeline.enqueue(user);
        self.pipeline.enqueue(assistant);
        Ok(reply)
    }

    pub async fn update_feedback(
        &self,
        chatbot_id: &str,
        message_uid: Uuid,
        feedback: Feedback,
        comment: Option<String>,
    ) -> Result<()> {
        self.pipeline
            .update_feedback(chatbot_id, message_uid, feedback, comment)
            .await
    }

    /// Chatbot a widget key may use from `origin`.
    pub fn authorize(&self, api_key: &str, origin: &str) -> Option<String> {
        self.access.authorize(api_key, origin)
    }

    /// Drop a tenant's compiled graph after its config changed.
    pub fn invalidate(&self, tenant_id: &str) -> bool {
        self.cache.invalidate(tenant_id)
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn cached_graphs(&self) -> usize {
        self.cache.len()
    }

    pub fn graph_builds(&self) -> u64 {
        self.cache.builds()
    }

    /// In-flight request registry used by transports for cancellation.
    pub fn requests(&self) -> &CancelMap {
        &self.requests
    }

    pub fn pipeline_stats(&self) -> PipelineStats {
        self.pipeline.stats()
    }

    /// Cancel in-flight runs, stop the refresher and drain the pipeline.
    pub async fn shutdown(&self) {
        self.requests.cancel_all();
        self.background.cancel();
        let refresher = self.refresher.lock().take();
        if let Some(handle) = refresher {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "domain refresher task failed");
            }
        }
        self.pipeline.shutdown().await;
        tracing::info!("engine stopped");
    }
}
