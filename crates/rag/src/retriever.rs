use std::sync::Arc;

use cb_domain::error::{Error, Result};
use cb_providers::Embedder;

use crate::store::{Passage, VectorStore};

/// Embed a query, then search the tenant's slice of the vector store.
#[derive(Clone)]
pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    /// Passages longer than this are cut before reaching the model.
    max_passage_chars: usize,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<dyn VectorStore>) -> Self {
        Self {
            embedder,
            store,
            max_passage_chars: usize::MAX,
        }
    }

    pub fn with_max_passage_chars(mut self, max: usize) -> Self {
        self.max_passage_chars = max;
        self
    }

    /// Ranked passages for `query`, at most `top_k`, nearest first.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidInput`] for `top_k == 0`; [`Error::Retrieval`] when
    /// the embedder or the store fails.
    pub async fn retrieve(&self, tenant_id: &str, query: &str, top_k: usize) -> Result<Vec<Passage>> {
        if top_k == 0 {
            return Err(Error::InvalidInput("top_k must be greater than 0".into()));
        }

        let vector = self
            .embedder
            .embed(query)
            .await
            .map_err(|e| Error::Retrieval(format!("embedding failed: {e}")))?;

        let mut passages = self
            .store
            .search(tenant_id, &vector, top_k)
            .await
            .map_err(|e| Error::Retrieval(format!("vector search failed: {e}")))?;

        for p in &mut passages {
            truncate_chars(&mut p.text, self.max_passage_chars);
        }

        tracing::debug!(
            tenant_id = %tenant_id,
            top_k,
            hits = passages.len(),
            "retrieval complete"
        );
        Ok(passages)
    }

    /// Embed and store one passage for `tenant_id`.
    pub async fn index(&self, tenant_id: &str, passage: Passage) -> Result<()> {
        let vector = self.embedder.embed(&passage.text).await?;
        self.store.insert(tenant_id, passage, vector).await
    }
}

fn truncate_chars(text: &mut String, max: usize) {
    if let Some((idx, _)) = text.char_indices().nth(max) {
        text.truncate(idx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryVectorStore;

    /// Maps the first three letters to a 3-d vector.
    struct LetterEmbedder;

    #[async_trait::async_trait]
    impl Embedder for LetterEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            let t = text.to_lowercase();
            Ok(vec![
                t.matches('a').count() as f32 + 0.01,
                t.matches('b').count() as f32,
                t.matches('c').count() as f32,
            ])
        }
    }

    struct BrokenEmbedder;

    #[async_trait::async_trait]
    impl Embedder for BrokenEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(Error::Embedding("quota exhausted".into()))
        }
    }

    fn retriever(embedder: Arc<dyn Embedder>) -> Retriever {
        Retriever::new(embedder, Arc::new(InMemoryVectorStore::new()))
    }

    #[tokio::test]
    async fn zero_top_k_fails_fast() {
        let r = retriever(Arc::new(BrokenEmbedder));
        let err = r.retrieve("t", "q", 0).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn embed_failure_is_retrieval_error() {
        let r = retriever(Arc::new(BrokenEmbedder));
        let err = r.retrieve("t", "q", 3).await.unwrap_err();
        assert!(matches!(err, Error::Retrieval(_)));
        assert!(err.to_string().contains("quota exhausted"));
    }

    #[tokio::test]
    async fn indexed_passages_are_found_and_truncated() {
        let r = retriever(Arc::new(LetterEmbedder)).with_max_passage_chars(4);
        r.index(
            "t",
            Passage {
                text: "bbbbbb".into(),
                citation: Some("doc-b".into()),
            },
        )
        .await
        .unwrap();
        r.index(
            "t",
            Passage {
                text: "aaaaaa".into(),
                citation: Some("doc-a".into()),
            },
        )
        .await
        .unwrap();

        let hits = r.retrieve("t", "aaa", 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].citation.as_deref(), Some("doc-a"));
        assert_eq!(hits[0].text, "aaaa");
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let mut s = "héllo".to_string();
        truncate_chars(&mut s, 2);
        assert_eq!(s, "hé");
        let mut short = "hi".to_string();
        truncate_chars(&mut short, 10);
        assert_eq!(short, "hi");
    }
}
