use std::collections::HashMap;

use cb_domain::error::{Error, Result};
use cb_domain::message::{Feedback, StoredMessage};
use parking_lot::RwLock;
use uuid::Uuid;

/// Durable home of the message log.
#[async_trait::async_trait]
pub trait MessageStore: Send + Sync {
    /// Write a batch of rows. On error nothing was written, except with
    /// [`Error::PartialBatch`], which lists the rows that were; the pipeline
    /// then retries only the rest.
    async fn insert_batch(&self, rows: &[StoredMessage]) -> Result<()>;

    /// Attach end-user feedback to a previously stored message.
    async fn update_feedback(
        &self,
        chatbot_id: &str,
        message_uid: Uuid,
        feedback: Feedback,
        comment: Option<String>,
    ) -> Result<()>;
}

/// Feedback as stored against a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedbackEntry {
    pub feedback: Feedback,
    pub comment: Option<String>,
}

/// Process-local store. Used by `store = "memory"` and by tests.
#[derive(Default)]
pub struct InMemoryMessageStore {
    rows: RwLock<Vec<StoredMessage>>,
    feedback: RwLock<HashMap<Uuid, FeedbackEntry>>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> Vec<StoredMessage> {
        self.rows.read().clone()
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    pub fn feedback_for(&self, message_uid: Uuid) -> Option<FeedbackEntry> {
        self.feedback.read().get(&message_uid).cloned()
    }
}

#[async_trait::async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn insert_batch(&self, rows: &[StoredMessage]) -> Result<()> {
        self.rows.write().extend_from_slice(rows);
        Ok(())
    }

    async fn update_feedback(
        &self,
        chatbot_id: &str,
        message_uid: Uuid,
        feedback: Feedback,
        comment: Option<String>,
    ) -> Result<()> {
        let known = self
            .rows
            .read()
            .iter()
            .any(|r| r.record.message_uid == message_uid && r.record.chatbot_id == chatbot_id);
        if !known {
            return Err(Error::InvalidInput(format!(
                "no message {message_uid} for chatbot {chatbot_id}"
            )));
        }
        self.feedback
            .write()
            .insert(message_uid, FeedbackEntry { feedback, comment });
        Ok(())
    }
}
