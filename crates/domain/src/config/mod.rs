mod agent;
mod llm;
mod observability;
mod persistence;

pub use agent::*;
pub use llm::*;
pub use observability::*;
pub use persistence::*;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::tenant::{is_valid_chatbot_id, DomainAccessEntry, TenantConfig};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub actions: ActionsConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub topics: TopicsConfig,
    #[serde(default)]
    pub access: AccessConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
    /// Inline tenant definitions served by the file-backed tenant source.
    #[serde(default)]
    pub tenants: Vec<TenantConfig>,
    /// Seed passages loaded into the in-memory vector store at startup.
    #[serde(default)]
    pub documents: Vec<SeedDocument>,
    /// Widget API key grants.
    #[serde(default)]
    pub domains: Vec<DomainAccessEntry>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Access index
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessConfig {
    /// How often the domain/API-key index is reloaded. 0 disables refresh.
    #[serde(default = "d_300")]
    pub refresh_interval_secs: u64,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 300,
        }
    }
}

fn d_300() -> u64 {
    300
}

/// One passage to index for a tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedDocument {
    pub tenant_id: String,
    pub text: String,
    #[serde(default)]
    pub citation: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl ConfigIssue {
    fn error(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Error,
            field: field.into(),
            message: message.into(),
        }
    }

    fn warning(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Warning,
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.llm.base_url.is_empty() {
            issues.push(ConfigIssue::error("llm.base_url", "base_url must not be empty"));
        }

        if self.agent.max_steps == 0 {
            issues.push(ConfigIssue::error(
                "agent.max_steps",
                "max_steps must be greater than 0",
            ));
        }

        if self.retrieval.fallback_top_k == 0 {
            issues.push(ConfigIssue::error(
                "retrieval.fallback_top_k",
                "fallback_top_k must be greater than 0",
            ));
        }

        if self.persistence.batch_size == 0 {
            issues.push(ConfigIssue::error(
                "persistence.batch_size",
                "batch_size must be greater than 0",
            ));
        }
        if self.persistence.flush_interval_ms == 0 {
            issues.push(ConfigIssue::error(
                "persistence.flush_interval_ms",
                "flush_interval_ms must be greater than 0",
            ));
        }
        if self.persistence.queue_capacity == 0 {
            issues.push(ConfigIssue::error(
                "persistence.queue_capacity",
                "queue_capacity must be greater than 0",
            ));
        }

        if !(0.0..=1.0).contains(&self.topics.threshold) {
            issues.push(ConfigIssue::error(
                "topics.threshold",
                "threshold must be within 0.0..=1.0",
            ));
        }

        if !(0.0..=1.0).contains(&self.observability.sample_rate) {
            issues.push(ConfigIssue::warning(
                "observability.sample_rate",
                "sample_rate outside 0.0..=1.0 is clamped",
            ));
        }

        if self.llm.embedding.key_envs.is_empty() && self.llm.embedding.key.is_none() {
            issues.push(ConfigIssue::warning(
                "llm.embedding.key_envs",
                "no embedding keys configured; retrieval will fail",
            ));
        }

        let mut seen = HashSet::new();
        for (i, tenant) in self.tenants.iter().enumerate() {
            let field = format!("tenants[{i}]");
            if !is_valid_chatbot_id(&tenant.chatbot_id) {
                issues.push(ConfigIssue::error(
                    format!("{field}.chatbot_id"),
                    format!(
                        "chatbot_id '{}' must be 1-128 chars of [A-Za-z0-9_.-] and not start with '.'",
                        tenant.chatbot_id
                    ),
                ));
            } else if !seen.insert(tenant.chatbot_id.as_str()) {
                issues.push(ConfigIssue::error(
                    format!("{field}.chatbot_id"),
                    format!("duplicate chatbot_id '{}'", tenant.chatbot_id),
                ));
            }
            if tenant.model_name.is_empty() {
                issues.push(ConfigIssue::error(
                    format!("{field}.model_name"),
                    "model_name must not be empty",
                ));
            }
            if tenant.api_keys.iter().all(|k| k.is_empty()) {
                issues.push(ConfigIssue::error(
                    format!("{field}.api_keys"),
                    "at least one api key is required",
                ));
            }
            if tenant.top_k == 0 {
                issues.push(ConfigIssue::error(
                    format!("{field}.top_k"),
                    "top_k must be greater than 0",
                ));
            }
            for (j, action) in tenant.custom_actions.iter().enumerate() {
                if let Err(e) = action.validate() {
                    // Invalid actions are skipped at resolve time, not fatal.
                    issues.push(ConfigIssue::warning(
                        format!("{field}.custom_actions[{j}]"),
                        e.to_string(),
                    ));
                }
            }
        }

        for (i, doc) in self.documents.iter().enumerate() {
            if !seen.contains(doc.tenant_id.as_str()) {
                issues.push(ConfigIssue::warning(
                    format!("documents[{i}].tenant_id"),
                    format!("unknown tenant '{}'", doc.tenant_id),
                ));
            }
        }

        for (i, entry) in self.domains.iter().enumerate() {
            if entry.allowed_domain.trim().is_empty() {
                issues.push(ConfigIssue::error(
                    format!("domains[{i}].allowed_domain"),
                    "allowed_domain must not be empty",
                ));
            }
        }

        issues
    }
}
