use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::message::Topic;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message persistence
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Flush once this many records are buffered.
    #[serde(default = "d_1000")]
    pub batch_size: usize,
    /// Flush whatever is buffered at least this often.
    #[serde(default = "d_500")]
    pub flush_interval_ms: u64,
    /// Bounded queue between request tasks and the writer. When full,
    /// callers fall back to a detached single-record insert.
    #[serde(default = "d_10000")]
    pub queue_capacity: usize,
    /// Delay before the single retry of a failed batch insert.
    #[serde(default = "d_100")]
    pub retry_backoff_ms: u64,
    #[serde(default)]
    pub store: StoreKind,
    /// Directory for the JSONL store.
    #[serde(default = "d_messages_dir")]
    pub path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            flush_interval_ms: 500,
            queue_capacity: 10_000,
            retry_backoff_ms: 100,
            store: StoreKind::default(),
            path: d_messages_dir(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    /// Append-only JSONL files, one per chatbot.
    #[default]
    Jsonl,
    /// Process memory only (tests, demos).
    Memory,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Topic tagging
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicsConfig {
    #[serde(default = "d_4")]
    pub max_keywords: usize,
    /// Best keyword/topic similarity must reach this to count as a match.
    #[serde(default = "d_threshold")]
    pub threshold: f64,
    /// Topic name used when nothing matches.
    #[serde(default = "d_other")]
    pub fallback_name: String,
    /// chatbot_id → topics.
    #[serde(default)]
    pub catalog: HashMap<String, Vec<Topic>>,
}

impl Default for TopicsConfig {
    fn default() -> Self {
        Self {
            max_keywords: 4,
            threshold: 0.3,
            fallback_name: d_other(),
            catalog: HashMap::new(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_1000() -> usize {
    1000
}
fn d_500() -> u64 {
    500
}
fn d_10000() -> usize {
    10_000
}
fn d_100() -> u64 {
    100
}
fn d_4() -> usize {
    4
}
fn d_threshold() -> f64 {
    0.3
}
fn d_other() -> String {
    "other".into()
}
fn d_messages_dir() -> PathBuf {
    PathBuf::from("./data/messages")
}
