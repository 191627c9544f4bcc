//! OpenAI-compatible chat adapter.
//!
//! Works with OpenAI, Ollama, vLLM, LM Studio, Together, and any other
//! endpoint that follows the OpenAI chat completions contract. One
//! instance is bound to exactly one credential and, optionally, a fixed
//! tool set.

use std::sync::Arc;
use std::time::Duration;

use cb_domain::error::{Error, Result};
use cb_domain::tenant::ApiKey;
use cb_domain::tool::{ToolCall, ToolDefinition};
use cb_domain::turn::{ConversationTurn, Role};
use serde_json::Value;

use crate::rotating::ProviderFactory;
use crate::traits::{ChatRequest, ChatResponse, LlmProvider, Usage};
use crate::util::{from_reqwest, normalize_base_url};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct OpenAiCompatProvider {
    id: String,
    base_url: String,
    api_key: ApiKey,
    default_model: String,
    /// Tools bound at construction; sent when the request carries none.
    tools: Vec<ToolDefinition>,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    pub fn new(
        base_url: &str,
        api_key: ApiKey,
        default_model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(from_reqwest)?;
        Ok(Self::with_client(base_url, api_key, default_model, client))
    }

    /// Share one connection pool across many bound instances.
    pub fn with_client(
        base_url: &str,
        api_key: ApiKey,
        default_model: impl Into<String>,
        client: reqwest::Client,
    ) -> Self {
        Self {
            id: format!("openai_compat:{}", api_key.fingerprint()),
            base_url: normalize_base_url(base_url),
            api_key,
            default_model: default_model.into(),
            tools: Vec::new(),
            client,
        }
    }

    pub fn bind_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    // ── Internal: build the JSON body ─────────────────────────────

    fn build_chat_body(&self, req: &ChatRequest) -> Value {
        let messages: Vec<Value> = req.messages.iter().map(msg_to_openai).collect();
        let model = req
            .model
            .clone()
            .unwrap_or_else(|| self.default_model.clone());

        let mut body = serde_json::json!({
            "model": model,
            "messages": messages,
        });

        let tools = if req.tools.is_empty() {
            &self.tools
        } else {
            &req.tools
        };
        if !tools.is_empty() {
            let tools: Vec<Value> = tools.iter().map(tool_to_openai).collect();
            body["tools"] = Value::Array(tools);
        }
        if let Some(temp) = req.options.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        if let Some(max) = req.options.max_tokens {
            body["max_tokens"] = serde_json::json!(max);
        }
        body
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Factory
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Builds one [`OpenAiCompatProvider`] per credential, all sharing a
/// single `reqwest::Client`.
#[derive(Clone)]
pub struct OpenAiCompatFactory {
    base_url: String,
    client: reqwest::Client,
}

impl OpenAiCompatFactory {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(from_reqwest)?;
        Ok(Self {
            base_url: normalize_base_url(base_url),
            client,
        })
    }
}

impl ProviderFactory for OpenAiCompatFactory {
    fn build(
        &self,
        credential: &ApiKey,
        model: &str,
        tools: &[ToolDefinition],
    ) -> Result<Arc<dyn LlmProvider>> {
        let provider = OpenAiCompatProvider::with_client(
            &self.base_url,
            credential.clone(),
            model,
            self.client.clone(),
        )
        .bind_tools(tools.to_vec());
        Ok(Arc::new(provider))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message serialization helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn msg_to_openai(msg: &ConversationTurn) -> Value {
    match msg.role {
        Role::Tool => tool_result_to_openai(msg),
        Role::Assistant => assistant_to_openai(msg),
        Role::System | Role::User => serde_json::json!({
            "role": msg.role.as_str(),
            "content": msg.content,
        }),
    }
}

fn assistant_to_openai(msg: &ConversationTurn) -> Value {
    let mut obj = serde_json::json!({"role": "assistant"});

    if msg.content.is_empty() && !msg.tool_calls.is_empty() {
        obj["content"] = Value::Null;
    } else {
        obj["content"] = Value::String(msg.content.clone());
    }
    if !msg.tool_calls.is_empty() {
        let calls: Vec<Value> = msg
            .tool_calls
            .iter()
            .map(|tc| {
                serde_json::json!({
                    "id": tc.call_id,
                    "type": "function",
                    "function": {
                        "name": tc.tool_name,
                        "arguments": tc.arguments.to_string(),
                    }
                })
            })
            .collect();
        obj["tool_calls"] = Value::Array(calls);
    }
    obj
}

fn tool_result_to_openai(msg: &ConversationTurn) -> Value {
    serde_json::json!({
        "role": "tool",
        "tool_call_id": msg.tool_call_id.as_deref().unwrap_or(""),
        "content": msg.content,
    })
}

fn tool_to_openai(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        }
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response deserialization helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_chat_response(provider: &str, body: &Value) -> Result<ChatResponse> {
    let choice = body
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .ok_or_else(|| Error::Provider {
            provider: provider.into(),
            message: "no choices in response".into(),
        })?;

    let message = choice.get("message").ok_or_else(|| Error::Provider {
        provider: provider.into(),
        message: "no message in choice".into(),
    })?;

    let content = message
        .get("content")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let finish_reason = choice
        .get("finish_reason")
        .and_then(|v| v.as_str())
        .map(String::from);

    let model = body
        .get("model")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string();

    Ok(ChatResponse {
        content,
        tool_calls: parse_openai_tool_calls(message),
        usage: body.get("usage").and_then(parse_openai_usage),
        model,
        finish_reason,
    })
}

fn parse_openai_tool_calls(message: &Value) -> Vec<ToolCall> {
    let arr = match message.get("tool_calls").and_then(|v| v.as_array()) {
        Some(a) => a,
        None => return Vec::new(),
    };
    arr.iter()
        .filter_map(|tc| {
            let call_id = tc.get("id")?.as_str()?.to_string();
            let func = tc.get("function")?;
            let tool_name = func.get("name")?.as_str()?.to_string();
            let arguments = match func.get("arguments") {
                Some(Value::String(s)) if !s.trim().is_empty() => {
                    // Malformed arguments reach the tool as a raw string so
                    // it can report the problem back to the model.
                    serde_json::from_str(s).unwrap_or_else(|_| Value::String(s.clone()))
                }
                Some(Value::Object(obj)) => Value::Object(obj.clone()),
                // Missing or blank arguments mean a call without arguments.
                _ => Value::Object(serde_json::Map::new()),
            };
            Some(ToolCall {
                call_id,
                tool_name,
                arguments,
            })
        })
        .collect()
}

fn parse_openai_usage(v: &Value) -> Option<Usage> {
    Some(Usage {
        prompt_tokens: v.get("prompt_tokens")?.as_u64()? as u32,
        completion_tokens: v.get("completion_tokens")?.as_u64()? as u32,
        total_tokens: v.get("total_tokens")?.as_u64()? as u32,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl LlmProvider for OpenAiCompatProvider {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_chat_body(req);

        tracing::debug!(provider = %self.id, url = %url, "openai_compat chat request");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(self.api_key.expose())
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        let resp_text = resp.text().await.map_err(from_reqwest)?;

        if !status.is_success() {
            return Err(Error::Provider {
                provider: self.id.clone(),
                message: format!("HTTP {} - {}", status.as_u16(), resp_text),
            });
        }

        let resp_json: Value = serde_json::from_str(&resp_text)?;
        parse_chat_response(&self.id, &resp_json)
    }

    fn provider_id(&self) -> &str {
        &self.id
    }
}
