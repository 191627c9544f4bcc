//! Append-only JSONL message log.
//!
//! Each chatbot gets `<chatbot_id>.jsonl` (one [`StoredMessage`] per line)
//! and `<chatbot_id>.feedback.jsonl` (one feedback event per line) under the
//! configured directory. File I/O runs on the blocking pool.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use cb_domain::error::{Error, Result};
use cb_domain::message::{Feedback, StoredMessage};
use cb_domain::tenant::is_valid_chatbot_id;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::store::MessageStore;

/// One line of a feedback file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackLine {
    pub message_uid: Uuid,
    pub feedback: Feedback,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub at: DateTime<Utc>,
}

pub struct JsonlMessageStore {
    base_dir: PathBuf,
}

impl JsonlMessageStore {
    /// Create the store, making sure `base_dir` exists.
    pub fn new(base_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(base_dir)?;
        Ok(Self {
            base_dir: base_dir.to_path_buf(),
        })
    }

    fn messages_path(&self, chatbot_id: &str) -> Result<PathBuf> {
        check_file_stem(chatbot_id)?;
        Ok(self.base_dir.join(format!("{chatbot_id}.jsonl")))
    }

    fn feedback_path(&self, chatbot_id: &str) -> Result<PathBuf> {
        check_file_stem(chatbot_id)?;
        Ok(self.base_dir.join(format!("{chatbot_id}.feedback.jsonl")))
    }

    /// Read back every stored message for a chatbot (blocking).
    pub fn read_messages(&self, chatbot_id: &str) -> Result<Vec<StoredMessage>> {
        read_jsonl(&self.messages_path(chatbot_id)?)
    }

    /// Read back every feedback event for a chatbot (blocking).
    pub fn read_feedback(&self, chatbot_id: &str) -> Result<Vec<FeedbackLine>> {
        read_jsonl(&self.feedback_path(chatbot_id)?)
    }
}

#[async_trait::async_trait]
impl MessageStore for JsonlMessageStore {
    /// Rows are grouped per chatbot file. A row whose chatbot id cannot
    /// name a file, or whose file cannot be written, is skipped without
    /// holding back the other groups; the outcome is then reported as
    /// [`Error::PartialBatch`].
    async fn insert_batch(&self, rows: &[StoredMessage]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let mut failures: BTreeSet<String> = BTreeSet::new();
        let mut per_file: BTreeMap<PathBuf, (String, Vec<Uuid>)> = BTreeMap::new();
        for row in rows {
            let path = match self.messages_path(&row.record.chatbot_id) {
                Ok(path) => path,
                Err(e) => {
                    tracing::warn!(
                        chatbot_id = %row.record.chatbot_id,
                        message_uid = %row.record.message_uid,
                        error = %e,
                        "skipping message row"
                    );
                    failures.insert(e.to_string());
                    continue;
                }
            };
            let (buf, uids) = per_file.entry(path).or_default();
            buf.push_str(&serde_json::to_string(row)?);
            buf.push('\n');
            uids.push(row.record.message_uid);
        }

        let (written, write_failures) = tokio::task::spawn_blocking(move || {
            let mut written = Vec::new();
            let mut failures = Vec::new();
            for (path, (buf, uids)) in per_file {
                match append(&path, &buf) {
                    Ok(()) => written.extend(uids),
                    Err(e) => {
                        tracing::warn!(path = %path.display(), rows = uids.len(), error = %e, "message file append failed");
                        failures.push(format!("{}: {e}", path.display()));
                    }
                }
            }
            (written, failures)
        })
        .await
        .map_err(|e| Error::Other(format!("spawn_blocking join: {e}")))?;
        failures.extend(write_failures);

        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::PartialBatch {
                written,
                message: failures.into_iter().collect::<Vec<_>>().join("; "),
            })
        }
    }

    async fn update_feedback(
        &self,
        chatbot_id: &str,
        message_uid: Uuid,
        feedback: Feedback,
        comment: Option<String>,
    ) -> Result<()> {
        let messages = self.messages_path(chatbot_id)?;
        let path = self.feedback_path(chatbot_id)?;
        let mut line = serde_json::to_string(&FeedbackLine {
            message_uid,
            feedback,
            comment,
            at: Utc::now(),
        })?;
        line.push('\n');
        let chatbot = chatbot_id.to_owned();

        tokio::task::spawn_blocking(move || {
            let known = read_jsonl::<StoredMessage>(&messages)?
                .iter()
                .any(|m| m.record.message_uid == message_uid);
            if !known {
                return Err(Error::InvalidInput(format!(
                    "no message {message_uid} for chatbot {chatbot}"
                )));
            }
            append(&path, &line)
        })
        .await
        .map_err(|e| Error::Other(format!("spawn_blocking join: {e}")))?
    }
}

/// Chatbot ids become file names; refuse anything that could escape the
/// base directory.
fn check_file_stem(chatbot_id: &str) -> Result<()> {
    if is_valid_chatbot_id(chatbot_id) {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!(
            "chatbot id '{chatbot_id}' is not usable as a file name"
        )))
    }
}

fn append(path: &Path, buf: &str) -> Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    file.write_all(buf.as_bytes())?;
    Ok(())
}

/// Missing file reads as empty. Malformed lines are skipped with a warning.
fn read_jsonl<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Vec<T>> {
    let file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(Error::Io(e)),
    };
    let mut out = Vec::new();
    for (i, line) in std::io::BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(v) => out.push(v),
            Err(e) => tracing::warn!(
                path = %path.display(),
                line = i + 1,
                error = %e,
                "skipping malformed jsonl line"
            ),
        }
    }
    Ok(out)
}
