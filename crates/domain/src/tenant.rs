//! Tenant (chatbot) configuration: prompt, model, credentials, and the
//! tool set a compiled agent graph is built from.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::template;

/// Configured tool name that enables the retrieval tool.
pub const RAG_TOOL_NAME: &str = "rag";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Credentials
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A secret credential. `Debug` and `Display` only ever show a short
/// SHA-256 fingerprint.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// First 8 hex chars of the SHA-256 of the secret.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.0.as_bytes());
        hex::encode(&digest[..4])
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ApiKey({})", self.fingerprint())
    }
}

impl fmt::Display for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "key:{}", self.fingerprint())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TenantConfig
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything needed to compile one tenant's agent graph. Immutable for the
/// lifetime of the compiled graph; a change requires invalidating it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantConfig {
    pub chatbot_id: String,
    #[serde(default)]
    pub system_prompt: String,
    pub model_name: String,
    #[serde(default = "d_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default = "d_top_k")]
    pub top_k: u32,
    #[serde(default)]
    pub tool_names: BTreeSet<String>,
    #[serde(default)]
    pub custom_actions: Vec<ActionSpec>,
    #[serde(default)]
    pub api_keys: Vec<ApiKey>,
}

impl TenantConfig {
    pub fn rag_enabled(&self) -> bool {
        self.tool_names.contains(RAG_TOOL_NAME)
    }

    /// Reject settings that would otherwise be silently repaired or only
    /// fail later: an id unusable as a file name, or a zero `top_k`.
    pub fn validate(&self) -> Result<()> {
        if !is_valid_chatbot_id(&self.chatbot_id) {
            return Err(Error::Config(format!(
                "chatbot_id '{}' must be 1-128 chars of [A-Za-z0-9_.-] and not start with '.'",
                self.chatbot_id
            )));
        }
        if self.top_k == 0 {
            return Err(Error::Config(format!(
                "tenant {}: top_k must be greater than 0",
                self.chatbot_id
            )));
        }
        Ok(())
    }
}

/// Chatbot ids name per-tenant message files, so they are limited to a
/// portable file-name alphabet.
pub fn is_valid_chatbot_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

fn d_temperature() -> f32 {
    0.2
}
fn d_top_k() -> u32 {
    5
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Custom HTTP actions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A tenant-defined HTTP call exposed to the model as a tool.
///
/// `url`, header values, and `body` are templates: `{{param}}` placeholders
/// are filled from the model's tool-call arguments at invocation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionSpec {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub method: HttpMethod,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub auth: ActionAuth,
    #[serde(default)]
    pub parameters: Vec<ActionParam>,
    /// Per-action timeout; falls back to the service default when unset.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

/// How an action authenticates against its endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ActionAuth {
    #[default]
    None,
    Bearer {
        token: ApiKey,
    },
    Header {
        name: String,
        value: ApiKey,
    },
    Basic {
        username: String,
        password: ApiKey,
    },
    Query {
        name: String,
        value: ApiKey,
    },
}

/// One argument the model supplies when calling an action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionParam {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: ParamType,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
    /// Raw JSON Schema fragment merged over the generated one, for shapes
    /// the typed fields cannot express.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    #[default]
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
}

impl ParamType {
    pub fn json_type(self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::Object => "object",
            ParamType::Array => "array",
        }
    }
}

impl ActionSpec {
    /// Check the spec is usable as a tool: a provider-safe name, a URL, and
    /// every template placeholder backed by a declared parameter.
    pub fn validate(&self) -> Result<()> {
        if !is_valid_tool_name(&self.name) {
            return Err(Error::Config(format!(
                "action {}: name '{}' must be 1-64 chars of [A-Za-z0-9_-]",
                self.id, self.name
            )));
        }
        if self.url.trim().is_empty() {
            return Err(Error::Config(format!("action {}: url is empty", self.id)));
        }

        let mut templates: Vec<&str> = vec![self.url.as_str()];
        templates.extend(self.headers.values().map(String::as_str));
        if let Some(body) = &self.body {
            templates.push(body.as_str());
        }
        for tpl in templates {
            for name in template::placeholders(tpl) {
                if !self.parameters.iter().any(|p| p.name == name) {
                    return Err(Error::Config(format!(
                        "action {}: placeholder '{{{{{name}}}}}' has no matching parameter",
                        self.id
                    )));
                }
            }
        }
        Ok(())
    }

    /// JSON Schema for the arguments object, as handed to the model.
    pub fn parameters_schema(&self) -> serde_json::Value {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for p in &self.parameters {
            let mut prop = serde_json::json!({
                "type": p.kind.json_type(),
                "description": p.description,
            });
            if let (Some(serde_json::Value::Object(extra)), Some(obj)) =
                (&p.schema, prop.as_object_mut())
            {
                for (k, v) in extra {
                    obj.insert(k.clone(), v.clone());
                }
            }
            properties.insert(p.name.clone(), prop);
            if p.required {
                required.push(serde_json::Value::String(p.name.clone()));
            }
        }
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

fn is_valid_tool_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Domain access
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Grants a widget API key access to a chatbot from one web domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainAccessEntry {
    pub api_key: ApiKey,
    pub chatbot_id: String,
    pub allowed_domain: String,
}
