use cb_domain::config::{Config, StoreKind};
use cb_engine::bootstrap::build_engine;

fn config_with_store(dir: &std::path::Path) -> Config {
    let mut config: Config = toml::from_str(
        r#"
        [agent]
        max_steps = 4

        [access]
        refresh_interval_secs = 0

        [[tenants]]
        chatbot_id = "bot-1"
        model_name = "gpt-4o-mini"
        api_keys = ["sk-test"]
        tool_names = ["rag"]

        [[domains]]
        api_key = "widget-key"
        chatbot_id = "bot-1"
        allowed_domain = "shop.example.com"
        "#,
    )
    .unwrap();
    config.persistence.store = StoreKind::Jsonl;
    config.persistence.path = dir.join("messages");
    config
}

#[tokio::test]
async fn builds_engine_from_config_without_embedding_keys() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_with_store(dir.path());

    let engine = build_engine(&config).await.unwrap();

    assert!(dir.path().join("messages").is_dir());
    assert_eq!(engine.authorize("widget-key", "https://shop.example.com").as_deref(), Some("bot-1"));

    // Retrieval is disabled without keys, so the rag tool is not bound.
    let graph = engine.graph("bot-1").await.unwrap();
    assert!(!graph.rag_enabled());
    assert!(graph.tool_names().is_empty());
    assert_eq!(graph.max_steps(), 4);

    engine.shutdown().await;
}

#[tokio::test]
async fn invalid_config_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_with_store(dir.path());
    config.agent.max_steps = 0;
    config.persistence.batch_size = 0;

    let err = match build_engine(&config).await {
        Ok(_) => panic!("invalid config accepted"),
        Err(e) => e,
    };
    assert!(err.to_string().contains("2 error(s)"));
}
