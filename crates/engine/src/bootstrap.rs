//! Engine construction from a [`Config`], shared by `serve` and `ask`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use cb_domain::config::{Config, ConfigSeverity, StoreKind};
use cb_messages::{InMemoryMessageStore, JsonlMessageStore, MessageStore};
use cb_providers::{resolve_keys, AuthRotator, OpenAiCompatFactory, OpenAiEmbedder};
use cb_rag::{InMemoryVectorStore, Passage, Retriever};

use crate::access::StaticDomainSource;
use crate::engine::{Engine, EngineParts};
use crate::tenants::StaticTenantSource;

/// Validate config, initialize every subsystem and start the engine.
pub async fn build_engine(config: &Config) -> anyhow::Result<Engine> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    let timeout = Duration::from_millis(config.llm.request_timeout_ms);

    // ── Chat provider factory ────────────────────────────────────────
    let factory = Arc::new(
        OpenAiCompatFactory::new(&config.llm.base_url, timeout)
            .context("initializing chat provider")?,
    );
    tracing::info!(base_url = %config.llm.base_url, "chat provider ready");

    // ── Retrieval ────────────────────────────────────────────────────
    let retriever = build_retriever(config, timeout).await?;

    // ── Message store ────────────────────────────────────────────────
    let messages: Arc<dyn MessageStore> = match config.persistence.store {
        StoreKind::Jsonl => Arc::new(
            JsonlMessageStore::new(&config.persistence.path)
                .context("initializing message store")?,
        ),
        StoreKind::Memory => Arc::new(InMemoryMessageStore::new()),
    };
    tracing::info!(
        store = ?config.persistence.store,
        batch_size = config.persistence.batch_size,
        "message store ready"
    );

    // ── Tenants + domain grants ──────────────────────────────────────
    let tenants = Arc::new(StaticTenantSource::new(config.tenants.clone()));
    tracing::info!(tenants = tenants.ids().len(), "tenant source ready");
    let domains = Arc::new(StaticDomainSource::new(config.domains.clone()));

    let http = reqwest::Client::builder()
        .build()
        .context("building http client for custom actions")?;

    let engine = Engine::start(
        config,
        EngineParts {
            tenants,
            factory,
            retriever,
            http,
            messages,
            domains,
        },
    )
    .await
    .context("starting engine")?;
    Ok(engine)
}

/// The shared retriever, or `None` when no embedding key is configured.
/// Seed documents are indexed before returning; a document that fails to
/// embed is logged and skipped.
async fn build_retriever(config: &Config, timeout: Duration) -> anyhow::Result<Option<Retriever>> {
    let emb = &config.llm.embedding;
    let keys = match resolve_keys(&emb.key_envs, emb.key.as_deref()) {
        Ok(keys) => keys,
        Err(e) => {
            tracing::warn!(error = %e, "no embedding keys, retrieval disabled");
            return Ok(None);
        }
    };

    let auth = AuthRotator::new(keys, Duration::from_secs(emb.cooldown_secs))
        .context("initializing embedding key rotation")?;
    let base_url = emb.base_url.as_deref().unwrap_or(&config.llm.base_url);
    let embedder = OpenAiEmbedder::new(base_url, emb.model.clone(), auth, timeout)
        .context("initializing embedder")?;

    let retriever = Retriever::new(Arc::new(embedder), Arc::new(InMemoryVectorStore::new()))
        .with_max_passage_chars(config.retrieval.max_passage_chars);

    let mut indexed = 0usize;
    for doc in &config.documents {
        let passage = Passage {
            text: doc.text.clone(),
            citation: doc.citation.clone(),
        };
        match retriever.index(&doc.tenant_id, passage).await {
            Ok(()) => indexed += 1,
            Err(e) => tracing::warn!(tenant_id = %doc.tenant_id, error = %e, "seed document not indexed"),
        }
    }
    tracing::info!(model = %emb.model, indexed, "retriever ready");
    Ok(Some(retriever))
}
