//! Resolves a tenant's configured tool set into callable tools.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use cb_domain::config::ActionsConfig;
use cb_domain::tenant::{TenantConfig, RAG_TOOL_NAME};
use cb_rag::Retriever;

use crate::http_action::HttpActionTool;
use crate::rag::RetrievalTool;
use crate::tool::InvokableTool;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ToolRegistry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Shared tool-building context: the retriever and one HTTP client for
/// every custom action across all tenants.
pub struct ToolRegistry {
    retriever: Option<Retriever>,
    client: reqwest::Client,
    actions: ActionsConfig,
}

impl ToolRegistry {
    pub fn new(retriever: Option<Retriever>, client: reqwest::Client, actions: ActionsConfig) -> Self {
        Self {
            retriever,
            client,
            actions,
        }
    }

    /// Build the ordered tool list for one tenant: the retrieval tool first
    /// (when `rag` is configured), then custom actions in config order.
    ///
    /// A custom action that fails to build is logged and skipped; the
    /// others are still registered. Names must be unique.
    pub fn resolve(&self, config: &TenantConfig) -> Vec<Arc<dyn InvokableTool>> {
        let mut tools: Vec<Arc<dyn InvokableTool>> = Vec::new();
        let mut names: HashSet<String> = HashSet::new();

        for name in &config.tool_names {
            if name == RAG_TOOL_NAME {
                continue;
            }
            tracing::warn!(
                chatbot_id = %config.chatbot_id,
                tool = %name,
                "configured tool has no implementation, skipping"
            );
        }

        if config.rag_enabled() {
            match &self.retriever {
                Some(_) if config.top_k == 0 => tracing::warn!(
                    chatbot_id = %config.chatbot_id,
                    "rag configured with top_k = 0, skipping"
                ),
                Some(retriever) => {
                    tools.push(Arc::new(RetrievalTool::new(
                        retriever.clone(),
                        config.chatbot_id.clone(),
                        config.top_k as usize,
                    )));
                    names.insert(RAG_TOOL_NAME.to_string());
                }
                None => tracing::warn!(
                    chatbot_id = %config.chatbot_id,
                    "rag configured but no retriever available, skipping"
                ),
            }
        }

        let default_timeout = Duration::from_secs(self.actions.default_timeout_secs);
        for spec in &config.custom_actions {
            if names.contains(&spec.name) {
                tracing::warn!(
                    chatbot_id = %config.chatbot_id,
                    action_id = %spec.id,
                    name = %spec.name,
                    "duplicate tool name, skipping custom action"
                );
                continue;
            }
            match HttpActionTool::new(
                spec.clone(),
                self.client.clone(),
                default_timeout,
                self.actions.max_response_bytes,
            ) {
                Ok(tool) => {
                    names.insert(spec.name.clone());
                    tools.push(Arc::new(tool));
                }
                Err(e) => tracing::warn!(
                    chatbot_id = %config.chatbot_id,
                    action_id = %spec.id,
                    error = %e,
                    "invalid custom action, skipping"
                ),
            }
        }

        tracing::debug!(
            chatbot_id = %config.chatbot_id,
            tools = tools.len(),
            "resolved tenant tools"
        );
        tools
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cb_domain::error::Result;
    use cb_domain::tenant::{ActionAuth, ActionSpec, HttpMethod};
    use cb_providers::Embedder;
    use cb_rag::InMemoryVectorStore;
    use std::collections::{BTreeMap, BTreeSet};

    struct NullEmbedder;

    #[async_trait::async_trait]
    impl Embedder for NullEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![1.0])
        }
    }

    fn action(id: &str, name: &str, url: &str) -> ActionSpec {
        ActionSpec {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            method: HttpMethod::Get,
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
            auth: ActionAuth::None,
            parameters: Vec::new(),
            timeout_secs: None,
        }
    }

    fn tenant(tool_names: &[&str], actions: Vec<ActionSpec>) -> TenantConfig {
        TenantConfig {
            chatbot_id: "bot".into(),
            system_prompt: String::new(),
            model_name: "m".into(),
            temperature: 0.2,
            max_tokens: None,
            top_k: 5,
            tool_names: tool_names.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>(),
            custom_actions: actions,
            api_keys: Vec::new(),
        }
    }

    fn registry() -> ToolRegistry {
        let retriever = Retriever::new(Arc::new(NullEmbedder), Arc::new(InMemoryVectorStore::new()));
        ToolRegistry::new(Some(retriever), reqwest::Client::new(), ActionsConfig::default())
    }

    fn names(tools: &[Arc<dyn InvokableTool>]) -> Vec<String> {
        tools.iter().map(|t| t.name().to_string()).collect()
    }

    #[test]
    fn rag_first_then_actions_in_order() {
        let cfg = tenant(
            &["rag"],
            vec![
                action("1", "order_status", "https://x.example.com/a"),
                action("2", "create_ticket", "https://x.example.com/b"),
            ],
        );
        assert_eq!(
            names(&registry().resolve(&cfg)),
            vec!["rag", "order_status", "create_ticket"]
        );
    }

    #[test]
    fn bad_action_does_not_block_others() {
        let cfg = tenant(
            &[],
            vec![
                action("1", "bad name", "https://x.example.com/a"),
                action("2", "no_url", ""),
                action("3", "good", "https://x.example.com/{{nope}}"),
                action("4", "fine", "https://x.example.com/ok"),
            ],
        );
        assert_eq!(names(&registry().resolve(&cfg)), vec!["fine"]);
    }

    #[test]
    fn duplicate_names_are_skipped() {
        let cfg = tenant(
            &["rag"],
            vec![
                action("1", "rag", "https://x.example.com/a"),
                action("2", "dup", "https://x.example.com/b"),
                action("3", "dup", "https://x.example.com/c"),
            ],
        );
        assert_eq!(names(&registry().resolve(&cfg)), vec!["rag", "dup"]);
    }

    #[test]
    fn rag_without_retriever_is_skipped() {
        let reg = ToolRegistry::new(None, reqwest::Client::new(), ActionsConfig::default());
        let cfg = tenant(&["rag", "weather"], vec![]);
        assert!(reg.resolve(&cfg).is_empty());
    }

    #[test]
    fn zero_top_k_does_not_register_rag() {
        let mut cfg = tenant(&["rag"], vec![action("1", "order_status", "https://x.example.com/a")]);
        cfg.top_k = 0;
        assert_eq!(names(&registry().resolve(&cfg)), vec!["order_status"]);
    }
}
