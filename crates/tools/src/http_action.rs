//! Tenant-defined HTTP custom actions.
//!
//! Safety properties:
//! - Hard per-request timeout (action's own, else the service default)
//! - Response body capped at `max_response_bytes`; the rest is dropped
//! - URL placeholders are percent-encoded, body placeholders JSON-escaped

use std::time::Duration;

use cb_domain::error::Result;
use cb_domain::template;
use cb_domain::tenant::{ActionAuth, ActionSpec, HttpMethod};
use cb_domain::tool::{ToolDefinition, ToolOutput};
use futures_util::StreamExt;
use reqwest::header::CONTENT_TYPE;
use serde_json::{json, Map, Value};

use crate::tool::{InvokableTool, ToolKind};

pub struct HttpActionTool {
    spec: ActionSpec,
    definition: ToolDefinition,
    client: reqwest::Client,
    timeout: Duration,
    max_response_bytes: usize,
}

impl HttpActionTool {
    /// # Errors
    ///
    /// Whatever [`ActionSpec::validate`] rejects.
    pub fn new(
        spec: ActionSpec,
        client: reqwest::Client,
        default_timeout: Duration,
        max_response_bytes: usize,
    ) -> Result<Self> {
        spec.validate()?;
        let description = if spec.description.is_empty() {
            format!("Call the '{}' action.", spec.name)
        } else {
            spec.description.clone()
        };
        let definition = ToolDefinition {
            name: spec.name.clone(),
            description,
            parameters: spec.parameters_schema(),
        };
        let timeout = spec
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(default_timeout);
        Ok(Self {
            spec,
            definition,
            client,
            timeout,
            max_response_bytes,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Check arguments against the declared parameters.
    fn check_arguments(&self, arguments: &Value) -> std::result::Result<Map<String, Value>, String> {
        let args = match arguments {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            Value::String(raw) => return Err(format!("arguments are not valid JSON: {raw}")),
            other => return Err(format!("arguments must be a JSON object, got {other}")),
        };
        for p in self.spec.parameters.iter().filter(|p| p.required) {
            if matches!(args.get(&p.name), None | Some(Value::Null)) {
                return Err(format!("missing required argument '{}'", p.name));
            }
        }
        Ok(args)
    }

    fn build_request(&self, args: &Map<String, Value>) -> reqwest::RequestBuilder {
        let url = template::render(&self.spec.url, |name| {
            args.get(name)
                .map(|v| urlencoding::encode(&plain_value(v)).into_owned())
        });

        let method = match self.spec.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };

        let mut req = self.client.request(method, url).timeout(self.timeout);

        let mut has_content_type = false;
        for (name, value_tpl) in &self.spec.headers {
            let value = template::render(value_tpl, |n| args.get(n).map(plain_value));
            has_content_type |= name.eq_ignore_ascii_case("content-type");
            req = req.header(name.as_str(), value);
        }

        req = match &self.spec.auth {
            ActionAuth::None => req,
            ActionAuth::Bearer { token } => req.bearer_auth(token.expose()),
            ActionAuth::Header { name, value } => req.header(name.as_str(), value.expose()),
            ActionAuth::Basic { username, password } => {
                req.basic_auth(username, Some(password.expose()))
            }
            ActionAuth::Query { name, value } => req.query(&[(name.as_str(), value.expose())]),
        };

        if let Some(body_tpl) = &self.spec.body {
            let body = template::render(body_tpl, |n| args.get(n).map(json_escaped));
            if !has_content_type {
                req = req.header(CONTENT_TYPE, "application/json");
            }
            req = req.body(body);
        }
        req
    }

    async fn read_capped(&self, resp: reqwest::Response) -> std::result::Result<(Vec<u8>, bool), reqwest::Error> {
        let mut stream = resp.bytes_stream();
        let mut buf: Vec<u8> = Vec::new();
        let mut truncated = false;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            let room = self.max_response_bytes.saturating_sub(buf.len());
            if chunk.len() > room {
                buf.extend_from_slice(&chunk[..room]);
                truncated = true;
                break;
            }
            buf.extend_from_slice(&chunk);
        }
        Ok((buf, truncated))
    }
}

/// Template value for URLs and headers: strings verbatim, everything else
/// as compact JSON.
fn plain_value(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Template value for JSON bodies: safe inside a quoted string, and a
/// valid literal for non-string values.
fn json_escaped(v: &Value) -> String {
    match v {
        Value::String(s) => {
            let quoted = Value::String(s.clone()).to_string();
            quoted[1..quoted.len() - 1].to_string()
        }
        other => other.to_string(),
    }
}

#[async_trait::async_trait]
impl InvokableTool for HttpActionTool {
    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    fn kind(&self) -> ToolKind {
        ToolKind::HttpAction
    }

    async fn invoke(&self, arguments: &Value) -> ToolOutput {
        let args = match self.check_arguments(arguments) {
            Ok(args) => args,
            Err(msg) => return ToolOutput::error(msg),
        };

        let resp = match self.build_request(&args).send().await {
            Ok(resp) => resp,
            Err(e) if e.is_timeout() => {
                return ToolOutput::error(format!(
                    "action '{}' timed out after {}s",
                    self.spec.name,
                    self.timeout.as_secs()
                ));
            }
            Err(e) => {
                return ToolOutput::error(format!("action '{}' request failed: {e}", self.spec.name));
            }
        };

        let status = resp.status().as_u16();
        let (bytes, truncated) = match self.read_capped(resp).await {
            Ok(read) => read,
            Err(e) => {
                return ToolOutput::error(format!(
                    "action '{}' failed reading response: {e}",
                    self.spec.name
                ));
            }
        };

        let text = String::from_utf8_lossy(&bytes);
        let body = match serde_json::from_str::<Value>(&text) {
            Ok(v) if !truncated => v,
            _ => Value::String(text.into_owned()),
        };

        let mut output = json!({ "status": status, "body": body });
        if truncated {
            output["truncated"] = Value::Bool(true);
        }

        tracing::debug!(
            action = %self.spec.name,
            status,
            bytes = bytes.len(),
            truncated,
            "custom action completed"
        );

        ToolOutput {
            content: output.to_string(),
            is_error: status >= 400,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cb_domain::tenant::{ActionParam, ParamType};
    use std::collections::BTreeMap;

    fn spec() -> ActionSpec {
        ActionSpec {
            id: "a1".into(),
            name: "create_ticket".into(),
            description: String::new(),
            method: HttpMethod::Post,
            url: "https://desk.example.com/tickets?q={{subject}}".into(),
            headers: BTreeMap::from([("X-Priority".to_string(), "{{priority}}".to_string())]),
            body: Some(r#"{"subject":"{{subject}}","priority":{{priority}}}"#.into()),
            auth: ActionAuth::None,
            parameters: vec![
                ActionParam {
                    name: "subject".into(),
                    kind: ParamType::String,
                    description: String::new(),
                    required: true,
                    schema: None,
                },
                ActionParam {
                    name: "priority".into(),
                    kind: ParamType::Integer,
                    description: String::new(),
                    required: false,
                    schema: None,
                },
            ],
            timeout_secs: Some(5),
        }
    }

    fn tool() -> HttpActionTool {
        HttpActionTool::new(spec(), reqwest::Client::new(), Duration::from_secs(30), 1024).unwrap()
    }

    #[test]
    fn per_action_timeout_overrides_default() {
        assert_eq!(tool().timeout(), Duration::from_secs(5));
        let mut s = spec();
        s.timeout_secs = None;
        let t = HttpActionTool::new(s, reqwest::Client::new(), Duration::from_secs(30), 1024)
            .unwrap();
        assert_eq!(t.timeout(), Duration::from_secs(30));
    }

    #[test]
    fn definition_uses_generated_schema() {
        let t = tool();
        assert_eq!(t.definition().name, "create_ticket");
        assert_eq!(t.definition().parameters["required"][0], "subject");
        assert!(t.definition().description.contains("create_ticket"));
    }

    #[test]
    fn invalid_spec_is_rejected() {
        let mut s = spec();
        s.url = "https://x/{{missing}}".into();
        assert!(HttpActionTool::new(s, reqwest::Client::new(), Duration::from_secs(1), 10).is_err());
    }

    #[test]
    fn missing_required_argument_is_reported() {
        let t = tool();
        let err = t.check_arguments(&json!({"priority": 1})).unwrap_err();
        assert!(err.contains("subject"));
        assert!(t.check_arguments(&Value::String("{bad".into())).is_err());
        assert!(t.check_arguments(&Value::Null).is_err());
    }

    #[test]
    fn body_values_are_json_escaped() {
        assert_eq!(json_escaped(&json!("say \"hi\"")), r#"say \"hi\""#);
        assert_eq!(json_escaped(&json!(3)), "3");
        assert_eq!(plain_value(&json!("a b")), "a b");
        assert_eq!(plain_value(&json!(true)), "true");
    }

    #[test]
    fn request_substitutes_templates() {
        let t = tool();
        let args = json!({"subject": "refund please", "priority": 2});
        let req = t
            .build_request(args.as_object().unwrap())
            .build()
            .unwrap();
        assert_eq!(req.method(), reqwest::Method::POST);
        assert_eq!(req.url().query(), Some("q=refund%20please"));
        assert_eq!(req.headers()["x-priority"], "2");
        assert_eq!(req.headers()[CONTENT_TYPE], "application/json");
        let body = std::str::from_utf8(req.body().unwrap().as_bytes().unwrap()).unwrap();
        assert_eq!(body, r#"{"subject":"refund please","priority":2}"#);
    }

    #[test]
    fn auth_modes_apply() {
        let mut s = spec();
        s.auth = ActionAuth::Query {
            name: "api_key".into(),
            value: cb_domain::tenant::ApiKey::new("k1"),
        };
        let t = HttpActionTool::new(s, reqwest::Client::new(), Duration::from_secs(1), 10).unwrap();
        let args = json!({"subject": "x"});
        let req = t.build_request(args.as_object().unwrap()).build().unwrap();
        assert!(req.url().query().unwrap().contains("api_key=k1"));

        let mut s = spec();
        s.auth = ActionAuth::Bearer {
            token: cb_domain::tenant::ApiKey::new("tok"),
        };
        let t = HttpActionTool::new(s, reqwest::Client::new(), Duration::from_secs(1), 10).unwrap();
        let req = t.build_request(args.as_object().unwrap()).build().unwrap();
        assert_eq!(req.headers()["authorization"], "Bearer tok");
    }
}
