use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum MODEL_CALL steps per request.
    #[serde(default = "d_10")]
    pub max_steps: usize,
    /// What to do when the model calls a tool that is not in its set.
    #[serde(default)]
    pub unknown_tool: UnknownToolPolicy,
    /// Run one retrieval pass on the last user turn when the loop finished
    /// without collecting any citations.
    #[serde(default = "d_true")]
    pub fallback_citations: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: 10,
            unknown_tool: UnknownToolPolicy::default(),
            fallback_citations: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownToolPolicy {
    /// Answer the call with an error tool turn and keep looping.
    #[default]
    ErrorResult,
    /// Abort the request.
    Fail,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Retrieval
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// `top_k` for the fallback citation pass.
    #[serde(default = "d_5")]
    pub fallback_top_k: usize,
    /// Max characters of each passage handed to the model.
    #[serde(default = "d_2000")]
    pub max_passage_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            fallback_top_k: 5,
            max_passage_chars: 2_000,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Custom actions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionsConfig {
    #[serde(default = "d_30")]
    pub default_timeout_secs: u64,
    /// Response bodies longer than this are truncated before the model
    /// sees them.
    #[serde(default = "d_16384")]
    pub max_response_bytes: usize,
}

impl Default for ActionsConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: 30,
            max_response_bytes: 16_384,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_10() -> usize {
    10
}
fn d_5() -> usize {
    5
}
fn d_2000() -> usize {
    2_000
}
fn d_30() -> u64 {
    30
}
fn d_16384() -> usize {
    16_384
}
fn d_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let agent = AgentConfig::default();
        assert_eq!(agent.max_steps, 10);
        assert_eq!(agent.unknown_tool, UnknownToolPolicy::ErrorResult);
        assert!(agent.fallback_citations);
        assert_eq!(ActionsConfig::default().default_timeout_secs, 30);
    }

    #[test]
    fn unknown_tool_policy_parses() {
        let cfg: AgentConfig = toml::from_str(r#"unknown_tool = "fail""#).unwrap();
        assert_eq!(cfg.unknown_tool, UnknownToolPolicy::Fail);
        assert_eq!(cfg.max_steps, 10);
    }
}
