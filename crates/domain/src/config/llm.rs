use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Model provider
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Where chat completions are sent. Credentials are per tenant
/// (`TenantConfig::api_keys`), not configured here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// OpenAI-compatible API root, e.g. `https://api.openai.com/v1`.
    #[serde(default = "d_base_url")]
    pub base_url: String,
    #[serde(default = "d_60000")]
    pub request_timeout_ms: u64,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: d_base_url(),
            request_timeout_ms: 60_000,
            embedding: EmbeddingConfig::default(),
        }
    }
}

/// Embedding endpoint used by the retriever. Service-wide; keys rotate
/// round-robin with a failure cooldown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Defaults to `llm.base_url` when unset.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "d_embedding_model")]
    pub model: String,
    /// Environment variable names, one per key, resolved at startup.
    #[serde(default)]
    pub key_envs: Vec<String>,
    /// Direct key (for config-only setups; prefer `key_envs`).
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default = "d_60")]
    pub cooldown_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            model: d_embedding_model(),
            key_envs: Vec::new(),
            key: None,
            cooldown_secs: 60,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn d_embedding_model() -> String {
    "text-embedding-3-small".into()
}
fn d_60000() -> u64 {
    60_000
}
fn d_60() -> u64 {
    60
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_section_parses() {
        let cfg: LlmConfig = toml::from_str(
            r#"
            base_url = "http://localhost:11434/v1"
            [embedding]
            key_envs = ["EMBED_KEY_A", "EMBED_KEY_B"]
            "#,
        )
        .unwrap();
        assert_eq!(cfg.base_url, "http://localhost:11434/v1");
        assert_eq!(cfg.embedding.key_envs.len(), 2);
        assert_eq!(cfg.embedding.model, "text-embedding-3-small");
        assert_eq!(cfg.request_timeout_ms, 60_000);
    }
}
