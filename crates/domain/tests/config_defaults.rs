use cb_domain::config::{Config, ConfigSeverity, StoreKind, UnknownToolPolicy};

#[test]
fn empty_file_yields_documented_defaults() {
    let config: Config = toml::from_str("").unwrap();
    assert_eq!(config.agent.max_steps, 10);
    assert_eq!(config.persistence.batch_size, 1000);
    assert_eq!(config.persistence.flush_interval_ms, 500);
    assert_eq!(config.topics.max_keywords, 4);
    assert_eq!(config.topics.fallback_name, "other");
    assert_eq!(config.actions.default_timeout_secs, 30);
    assert_eq!(config.access.refresh_interval_secs, 300);
    assert!(config.tenants.is_empty());
}

#[test]
fn full_file_parses() {
    let toml_str = r#"
[llm]
base_url = "http://localhost:8080/v1"

[llm.embedding]
key_envs = ["EMBED_KEY"]

[agent]
max_steps = 4
unknown_tool = "fail"

[persistence]
store = "memory"
batch_size = 50

[[tenants]]
chatbot_id = "bot-1"
model_name = "gpt-4o-mini"
system_prompt = "You help {{chatbot_id}} customers."
tool_names = ["rag"]
api_keys = ["sk-a", "sk-b"]

[[tenants.custom_actions]]
id = "act-1"
name = "order_status"
method = "GET"
url = "https://shop.example.com/orders/{{order_id}}"
auth = { mode = "bearer", token = "shop-token" }
parameters = [{ name = "order_id", type = "string", required = true }]

[[documents]]
tenant_id = "bot-1"
text = "Refunds are issued within 14 days."
citation = "doc-refunds"

[[domains]]
api_key = "widget-key"
chatbot_id = "bot-1"
allowed_domain = "shop.example.com"
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.agent.max_steps, 4);
    assert_eq!(config.agent.unknown_tool, UnknownToolPolicy::Fail);
    assert_eq!(config.persistence.store, StoreKind::Memory);
    assert_eq!(config.tenants[0].api_keys.len(), 2);
    assert_eq!(config.tenants[0].custom_actions[0].parameters.len(), 1);
    assert_eq!(config.documents[0].citation.as_deref(), Some("doc-refunds"));
    assert_eq!(config.domains[0].chatbot_id, "bot-1");

    let issues = config.validate();
    assert!(
        issues.iter().all(|i| i.severity != ConfigSeverity::Error),
        "unexpected errors: {issues:?}"
    );
}

#[test]
fn validate_flags_tenant_without_keys() {
    let toml_str = r#"
[[tenants]]
chatbot_id = "bot-1"
model_name = "gpt-4o-mini"
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    let issues = config.validate();
    assert!(issues
        .iter()
        .any(|i| i.severity == ConfigSeverity::Error && i.field == "tenants[0].api_keys"));
}

#[test]
fn validate_flags_zero_batch_and_duplicate_tenants() {
    let toml_str = r#"
[persistence]
batch_size = 0

[[tenants]]
chatbot_id = "bot-1"
model_name = "m"
api_keys = ["k"]

[[tenants]]
chatbot_id = "bot-1"
model_name = "m"
api_keys = ["k"]
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    let fields: Vec<String> = config.validate().into_iter().map(|i| i.field).collect();
    assert!(fields.contains(&"persistence.batch_size".to_string()));
    assert!(fields.contains(&"tenants[1].chatbot_id".to_string()));
}

#[test]
fn invalid_action_is_only_a_warning() {
    let toml_str = r#"
[[tenants]]
chatbot_id = "bot-1"
model_name = "m"
api_keys = ["k"]

[[tenants.custom_actions]]
id = "bad"
name = "has spaces"
url = "https://x.example.com"
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    let issue = config
        .validate()
        .into_iter()
        .find(|i| i.field == "tenants[0].custom_actions[0]")
        .unwrap();
    assert_eq!(issue.severity, ConfigSeverity::Warning);
    assert!(issue.to_string().starts_with("[WARN]"));
}

#[test]
fn validate_flags_file_unsafe_chatbot_id_and_zero_top_k() {
    let toml_str = r#"
[[tenants]]
chatbot_id = "acme corp"
model_name = "m"
api_keys = ["k"]

[[tenants]]
chatbot_id = "bot-2"
model_name = "m"
api_keys = ["k"]
top_k = 0
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    let errors: Vec<String> = config
        .validate()
        .into_iter()
        .filter(|i| i.severity == ConfigSeverity::Error)
        .map(|i| i.field)
        .collect();
    assert!(errors.contains(&"tenants[0].chatbot_id".to_string()));
    assert!(errors.contains(&"tenants[1].top_k".to_string()));
}
