//! Tenant-scoped vector storage.

use std::collections::HashMap;

use cb_domain::error::{Error, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// One retrieved chunk of text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citation: Option<String>,
}

/// Nearest-neighbour search, strictly scoped to one tenant.
#[async_trait::async_trait]
pub trait VectorStore: Send + Sync {
    /// Up to `top_k` passages for `tenant_id`, nearest first.
    async fn search(&self, tenant_id: &str, vector: &[f32], top_k: usize) -> Result<Vec<Passage>>;

    async fn insert(&self, tenant_id: &str, passage: Passage, vector: Vec<f32>) -> Result<()>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// InMemoryVectorStore
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Row {
    passage: Passage,
    vector: Vec<f32>,
}

/// Brute-force cosine store. Rows live in per-tenant vectors, so a search
/// can only ever see its own tenant's rows.
#[derive(Default)]
pub struct InMemoryVectorStore {
    tenants: RwLock<HashMap<String, Vec<Row>>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self, tenant_id: &str) -> usize {
        self.tenants.read().get(tenant_id).map_or(0, Vec::len)
    }

    pub fn is_empty(&self, tenant_id: &str) -> bool {
        self.len(tenant_id) == 0
    }
}

#[async_trait::async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn search(&self, tenant_id: &str, vector: &[f32], top_k: usize) -> Result<Vec<Passage>> {
        let tenants = self.tenants.read();
        let Some(rows) = tenants.get(tenant_id) else {
            return Ok(Vec::new());
        };

        let mut scored: Vec<(f32, &Row)> = rows
            .iter()
            .filter(|row| row.vector.len() == vector.len())
            .map(|row| (cosine_distance(vector, &row.vector), row))
            .collect();
        // Stable sort: equal distances keep insertion order.
        scored.sort_by(|a, b| a.0.total_cmp(&b.0));

        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(_, row)| row.passage.clone())
            .collect())
    }

    async fn insert(&self, tenant_id: &str, passage: Passage, vector: Vec<f32>) -> Result<()> {
        if vector.is_empty() {
            return Err(Error::InvalidInput("cannot index an empty vector".into()));
        }
        self.tenants
            .write()
            .entry(tenant_id.to_string())
            .or_default()
            .push(Row { passage, vector });
        Ok(())
    }
}

/// `1 - cos(a, b)`; a zero vector is maximally distant from everything.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut na = 0.0f32;
    let mut nb = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 1.0;
    }
    1.0 - dot / (na.sqrt() * nb.sqrt())
}
