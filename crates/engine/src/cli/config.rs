use cb_domain::config::{Config, ConfigSeverity};

/// Keys whose values are credentials and never printed.
const SECRET_KEYS: &[&str] = &["api_keys", "api_key", "key", "token", "password"];

/// Print every validation issue. Returns false when any is an error.
pub fn validate(config: &Config, config_path: &str) -> bool {
    let issues = config.validate();

    if issues.is_empty() {
        println!("Config OK ({config_path})");
        return true;
    }

    let error_count = issues
        .iter()
        .filter(|e| e.severity == ConfigSeverity::Error)
        .count();
    let warning_count = issues.len() - error_count;

    for issue in &issues {
        println!("{issue}");
    }

    println!("\n{error_count} error(s), {warning_count} warning(s) in {config_path}");

    error_count == 0
}

/// Dump the resolved config (with all defaults filled in) as TOML, with
/// credentials masked.
pub fn show(config: &Config) -> anyhow::Result<()> {
    print!("{}", render(config)?);
    Ok(())
}

fn render(config: &Config) -> anyhow::Result<String> {
    let mut value = toml::Value::try_from(config)
        .map_err(|e| anyhow::anyhow!("serializing config: {e}"))?;
    redact(&mut value);
    toml::to_string_pretty(&value).map_err(|e| anyhow::anyhow!("serializing config: {e}"))
}

fn redact(value: &mut toml::Value) {
    match value {
        toml::Value::Table(table) => {
            for (key, v) in table.iter_mut() {
                if SECRET_KEYS.contains(&key.as_str()) {
                    mask(v);
                } else {
                    redact(v);
                }
            }
        }
        toml::Value::Array(items) => items.iter_mut().for_each(redact),
        _ => {}
    }
}

fn mask(value: &mut toml::Value) {
    match value {
        toml::Value::String(s) => *s = "***".into(),
        toml::Value::Array(items) => items.iter_mut().for_each(mask),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn show_masks_credentials() {
        let config: Config = toml::from_str(
            r#"
            [[tenants]]
            chatbot_id = "bot-1"
            model_name = "gpt-4o-mini"
            api_keys = ["sk-live-secret"]

            [[domains]]
            api_key = "widget-secret"
            chatbot_id = "bot-1"
            allowed_domain = "shop.example.com"
            "#,
        )
        .unwrap();
        let out = render(&config).unwrap();
        assert!(!out.contains("sk-live-secret"));
        assert!(!out.contains("widget-secret"));
        assert!(out.contains("bot-1"));
        assert!(out.contains("***"));
    }

    #[test]
    fn defaults_validate_cleanly_apart_from_warnings() {
        let config = Config::default();
        assert!(config
            .validate()
            .iter()
            .all(|i| i.severity == ConfigSeverity::Warning));
    }
}
