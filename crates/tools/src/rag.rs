//! `rag` tool: knowledge-base search for the current tenant.

use cb_domain::tenant::RAG_TOOL_NAME;
use cb_domain::tool::{ToolDefinition, ToolOutput};
use cb_rag::{Passage, Retriever};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::tool::{InvokableTool, ToolKind};

/// Structured output of the retrieval tool.
#[derive(Debug, Serialize, Deserialize)]
struct RetrievalOutput {
    passages: Vec<Passage>,
}

pub struct RetrievalTool {
    definition: ToolDefinition,
    retriever: Retriever,
    tenant_id: String,
    top_k: usize,
}

impl RetrievalTool {
    pub fn new(retriever: Retriever, tenant_id: impl Into<String>, top_k: usize) -> Self {
        Self {
            definition: ToolDefinition {
                name: RAG_TOOL_NAME.into(),
                description: "Search the knowledge base for passages relevant to a question. \
                              Use it before answering questions about products, policies, or \
                              documentation."
                    .into(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "query": { "type": "string", "description": "What to search for" }
                    },
                    "required": ["query"]
                }),
            },
            retriever,
            tenant_id: tenant_id.into(),
            top_k,
        }
    }
}

#[async_trait::async_trait]
impl InvokableTool for RetrievalTool {
    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Retrieval
    }

    async fn invoke(&self, arguments: &Value) -> ToolOutput {
        let Some(query) = arguments
            .get("query")
            .and_then(|v| v.as_str())
            .filter(|q| !q.trim().is_empty())
        else {
            return ToolOutput::error("missing required argument 'query'");
        };

        match self.retriever.retrieve(&self.tenant_id, query, self.top_k).await {
            Ok(passages) => match serde_json::to_string(&RetrievalOutput { passages }) {
                Ok(content) => ToolOutput::ok(content),
                Err(e) => ToolOutput::error(format!("encode passages: {e}")),
            },
            Err(e) => {
                tracing::warn!(
                    tenant_id = %self.tenant_id,
                    error = %e,
                    "retrieval tool failed"
                );
                ToolOutput::error(e.to_string())
            }
        }
    }
}

/// Citation ids carried by a retrieval tool output, in passage order.
/// Anything unparseable yields nothing.
pub fn citations_from_output(content: &str) -> Vec<String> {
    serde_json::from_str::<RetrievalOutput>(content)
        .map(|out| out.passages.into_iter().filter_map(|p| p.citation).collect())
        .unwrap_or_default()
}

/// Citations for a set of passages, as the fallback path harvests them.
pub fn citations_from_passages(passages: &[Passage]) -> Vec<String> {
    passages.iter().filter_map(|p| p.citation.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cb_domain::error::{Error, Result};
    use cb_providers::Embedder;
    use cb_rag::InMemoryVectorStore;
    use std::sync::Arc;

    struct UnitEmbedder;

    #[async_trait::async_trait]
    impl Embedder for UnitEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![1.0, 0.0])
        }
    }

    struct DownEmbedder;

    #[async_trait::async_trait]
    impl Embedder for DownEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(Error::Embedding("down".into()))
        }
    }

    async fn seeded_tool() -> RetrievalTool {
        let retriever = Retriever::new(Arc::new(UnitEmbedder), Arc::new(InMemoryVectorStore::new()));
        for (text, cite) in [("refunds take 14 days", Some("doc-1")), ("no cite", None)] {
            retriever
                .index(
                    "bot",
                    Passage {
                        text: text.into(),
                        citation: cite.map(String::from),
                    },
                )
                .await
                .unwrap();
        }
        RetrievalTool::new(retriever, "bot", 5)
    }

    #[tokio::test]
    async fn output_carries_passages_and_citations() {
        let tool = seeded_tool().await;
        let out = tool.invoke(&json!({"query": "refunds"})).await;
        assert!(!out.is_error);
        assert_eq!(citations_from_output(&out.content), vec!["doc-1"]);
        let v: Value = serde_json::from_str(&out.content).unwrap();
        assert_eq!(v["passages"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn missing_query_is_error_output() {
        let tool = seeded_tool().await;
        let out = tool.invoke(&json!({})).await;
        assert!(out.is_error);
        assert!(citations_from_output(&out.content).is_empty());
    }

    #[tokio::test]
    async fn retrieval_failure_is_error_output() {
        let retriever = Retriever::new(Arc::new(DownEmbedder), Arc::new(InMemoryVectorStore::new()));
        let tool = RetrievalTool::new(retriever, "bot", 5);
        let out = tool.invoke(&json!({"query": "x"})).await;
        assert!(out.is_error);
        assert!(out.content.contains("down"));
    }

    #[test]
    fn garbage_has_no_citations() {
        assert!(citations_from_output("not json").is_empty());
        assert!(citations_from_output(r#"{"error":"x"}"#).is_empty());
    }
}
