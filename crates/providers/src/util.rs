//! Shared utility functions for provider adapters.

use cb_domain::error::{Error, Result};
use cb_domain::tenant::ApiKey;

/// Convert a [`reqwest::Error`] into the domain [`Error`] type.
///
/// Timeout errors map to [`Error::Timeout`]; everything else maps to
/// [`Error::Http`].
pub(crate) fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}

/// Resolve embedding credentials.
///
/// Each entry of `key_envs` names an environment variable that must be set
/// and non-empty. A direct `key` is appended after them (plaintext, warned).
pub fn resolve_keys(key_envs: &[String], key: Option<&str>) -> Result<Vec<ApiKey>> {
    let mut keys = Vec::with_capacity(key_envs.len() + 1);
    for env_name in key_envs {
        match std::env::var(env_name) {
            Ok(val) if !val.is_empty() => keys.push(ApiKey::new(val)),
            _ => {
                return Err(Error::Config(format!(
                    "environment variable '{env_name}' not set or empty"
                )));
            }
        }
    }
    if let Some(key) = key.filter(|k| !k.is_empty()) {
        tracing::warn!(
            "embedding key loaded from plaintext config field 'key', prefer 'key_envs'"
        );
        keys.push(ApiKey::new(key));
    }
    if keys.is_empty() {
        return Err(Error::Config(
            "no embedding key configured: set 'llm.embedding.key_envs' or 'llm.embedding.key'"
                .into(),
        ));
    }
    Ok(keys)
}

/// Trim trailing slashes so `{base}/path` joins cleanly.
pub(crate) fn normalize_base_url(base_url: &str) -> String {
    base_url.trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_env_then_direct_key() {
        let var_name = "CB_TEST_RESOLVE_EMBED_KEY_4411";
        std::env::set_var(var_name, "env-secret");
        let keys = resolve_keys(&[var_name.to_string()], Some("direct")).unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].expose(), "env-secret");
        assert_eq!(keys[1].expose(), "direct");
        std::env::remove_var(var_name);
    }

    #[test]
    fn missing_env_var_is_config_error() {
        let err = resolve_keys(&["CB_TEST_NONEXISTENT_VAR_9123".into()], None).unwrap_err();
        assert!(err.to_string().contains("CB_TEST_NONEXISTENT_VAR_9123"));
        assert!(err.is_fatal_config());
    }

    #[test]
    fn nothing_configured_is_error() {
        assert!(resolve_keys(&[], None).is_err());
        assert!(resolve_keys(&[], Some("")).is_err());
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        assert_eq!(normalize_base_url("http://x/v1//"), "http://x/v1");
    }
}
