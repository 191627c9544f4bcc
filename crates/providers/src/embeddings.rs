//! OpenAI-compatible embeddings client with key rotation.

use std::time::Duration;

use cb_domain::error::{Error, Result};
use serde_json::Value;

use crate::auth::AuthRotator;
use crate::traits::Embedder;
use crate::util::{from_reqwest, normalize_base_url};

const PROVIDER_ID: &str = "openai_embeddings";

pub struct OpenAiEmbedder {
    base_url: String,
    model: String,
    auth: AuthRotator,
    client: reqwest::Client,
}

impl OpenAiEmbedder {
    pub fn new(
        base_url: &str,
        model: impl Into<String>,
        auth: AuthRotator,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(from_reqwest)?;
        Ok(Self {
            base_url: normalize_base_url(base_url),
            model: model.into(),
            auth,
            client,
        })
    }
}

impl std::fmt::Debug for OpenAiEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiEmbedder")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("auth", &self.auth)
            .finish()
    }
}

#[async_trait::async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/embeddings", self.base_url);
        let entry = self.auth.next_key();
        let body = serde_json::json!({ "model": self.model, "input": [text] });

        let resp = self
            .client
            .post(&url)
            .bearer_auth(entry.key.expose())
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Embedding(from_reqwest(e).to_string()))?;

        let status = resp.status();
        let resp_text = resp
            .text()
            .await
            .map_err(|e| Error::Embedding(from_reqwest(e).to_string()))?;

        if !status.is_success() {
            // Revoked or throttled keys sit out the cooldown; the error
            // still reaches the caller.
            if matches!(status.as_u16(), 401 | 403 | 429) {
                self.auth.mark_failed(entry.index);
            }
            return Err(Error::Embedding(format!(
                "{PROVIDER_ID}: HTTP {} - {}",
                status.as_u16(),
                resp_text
            )));
        }

        let resp_json: Value = serde_json::from_str(&resp_text)?;
        parse_embedding(&resp_json)
    }
}

fn parse_embedding(body: &Value) -> Result<Vec<f32>> {
    let embedding = body
        .get("data")
        .and_then(|d| d.as_array())
        .and_then(|a| a.first())
        .and_then(|item| item.get("embedding"))
        .and_then(|e| e.as_array())
        .ok_or_else(|| {
            Error::Embedding("missing 'data[0].embedding' in embeddings response".into())
        })?;

    let vector: Vec<f32> = embedding
        .iter()
        .filter_map(|v| v.as_f64().map(|f| f as f32))
        .collect();
    if vector.is_empty() {
        return Err(Error::Embedding("empty embedding vector".into()));
    }
    Ok(vector)
}
