//! Batched, non-blocking message persistence.
//!
//! `enqueue` is a bounded `try_send`; a single worker task owns the batch
//! buffer and flushes on size or on the interval tick, whichever comes
//! first. A failed flush is retried once for the rows the store did not
//! write, and whatever is still unwritten is then dropped.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use cb_domain::config::PersistenceConfig;
use cb_domain::message::{Feedback, MessageRecord, StoredMessage};
use cb_domain::trace::TraceEvent;
use cb_domain::turn::Role;
use cb_domain::{Error, Result};
use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use crate::store::MessageStore;
use crate::topics::TopicTagger;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stats
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
struct Counters {
    enqueued: AtomicU64,
    batches_flushed: AtomicU64,
    persisted: AtomicU64,
    retries: AtomicU64,
    dropped: AtomicU64,
    fallback_inserts: AtomicU64,
}

/// Point-in-time copy of the pipeline counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub enqueued: u64,
    pub batches_flushed: u64,
    pub persisted: u64,
    pub retries: u64,
    pub dropped: u64,
    pub fallback_inserts: u64,
}

impl Counters {
    fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            batches_flushed: self.batches_flushed.load(Ordering::Relaxed),
            persisted: self.persisted.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            fallback_inserts: self.fallback_inserts.load(Ordering::Relaxed),
        }
    }
}

fn bump(counter: &AtomicU64, n: usize) {
    counter.fetch_add(n as u64, Ordering::Relaxed);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pipeline
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Shared {
    store: Arc<dyn MessageStore>,
    tagger: TopicTagger,
    counters: Counters,
}

impl Shared {
    /// Derive the stored row. Only user turns get a topic.
    fn to_row(&self, record: MessageRecord) -> StoredMessage {
        let topic_id = match record.role {
            Role::User => self.tagger.tag(&record.chatbot_id, &record.content),
            _ => None,
        };
        StoredMessage {
            record,
            topic_id,
            persisted_at: Utc::now(),
        }
    }
}

pub struct MessagePipeline {
    tx: mpsc::Sender<MessageRecord>,
    shared: Arc<Shared>,
    shutdown: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
    fallbacks: TaskTracker,
}

impl MessagePipeline {
    /// Start the background worker. Must be called inside a tokio runtime.
    pub fn start(config: &PersistenceConfig, store: Arc<dyn MessageStore>, tagger: TopicTagger) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let shared = Arc::new(Shared {
            store,
            tagger,
            counters: Counters::default(),
        });
        let shutdown = CancellationToken::new();

        let worker = Worker {
            rx,
            shared: shared.clone(),
            batch_size: config.batch_size.max(1),
            flush_interval: Duration::from_millis(config.flush_interval_ms.max(1)),
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
            shutdown: shutdown.clone(),
        };
        let handle = tokio::spawn(worker.run());

        tracing::info!(
            batch_size = config.batch_size,
            flush_interval_ms = config.flush_interval_ms,
            queue_capacity = config.queue_capacity,
            "message pipeline started"
        );

        Self {
            tx,
            shared,
            shutdown,
            worker: Mutex::new(Some(handle)),
            fallbacks: TaskTracker::new(),
        }
    }

    /// Hand a record to the worker without waiting.
    ///
    /// When the queue is full the record is written by a detached
    /// single-row insert instead. After shutdown the record is dropped.
    pub fn enqueue(&self, record: MessageRecord) {
        bump(&self.shared.counters.enqueued, 1);
        match self.tx.try_send(record) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(record)) => self.fallback_insert(record),
            Err(mpsc::error::TrySendError::Closed(record)) => {
                bump(&self.shared.counters.dropped, 1);
                tracing::warn!(
                    message_uid = %record.message_uid,
                    "message pipeline closed, dropping record"
                );
            }
        }
    }

    fn fallback_insert(&self, record: MessageRecord) {
        bump(&self.shared.counters.fallback_inserts, 1);
        let shared = self.shared.clone();
        self.fallbacks.spawn(async move {
            let row = shared.to_row(record);
            match shared.store.insert_batch(std::slice::from_ref(&row)).await {
                Ok(()) => bump(&shared.counters.persisted, 1),
                Err(Error::PartialBatch { written, .. }) if written.contains(&row.record.message_uid) => {
                    bump(&shared.counters.persisted, 1)
                }
                Err(e) => {
                    bump(&shared.counters.dropped, 1);
                    tracing::warn!(
                        message_uid = %row.record.message_uid,
                        error = %e,
                        "fallback insert failed, record dropped"
                    );
                }
            }
        });
    }

    pub async fn update_feedback(
        &self,
        chatbot_id: &str,
        message_uid: Uuid,
        feedback: Feedback,
        comment: Option<String>,
    ) -> Result<()> {
        self.shared
            .store
            .update_feedback(chatbot_id, message_uid, feedback, comment)
            .await
    }

    pub fn stats(&self) -> PipelineStats {
        self.shared.counters.snapshot()
    }

    /// Stop accepting records, drain what is queued, do a final flush and
    /// wait for outstanding fallback inserts. Idempotent.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "message pipeline worker panicked");
            }
        }
        self.fallbacks.close();
        self.fallbacks.wait().await;
        let stats = self.stats();
        tracing::info!(
            persisted = stats.persisted,
            dropped = stats.dropped,
            "message pipeline stopped"
        );
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Worker
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Worker {
    rx: mpsc::Receiver<MessageRecord>,
    shared: Arc<Shared>,
    batch_size: usize,
    flush_interval: Duration,
    retry_backoff: Duration,
    shutdown: CancellationToken,
}

impl Worker {
    async fn run(mut self) {
        let mut buf: Vec<MessageRecord> = Vec::with_capacity(self.batch_size);
        let mut ticker = tokio::time::interval(self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                msg = self.rx.recv() => match msg {
                    Some(record) => {
                        buf.push(record);
                        if buf.len() >= self.batch_size {
                            self.flush(&mut buf).await;
                        }
                    }
                    None => break,
                },
                _ = ticker.tick() => {
                    if !buf.is_empty() {
                        self.flush(&mut buf).await;
                    }
                }
            }
        }

        // Drain whatever request tasks managed to queue before the close.
        self.rx.close();
        while let Some(record) = self.rx.recv().await {
            buf.push(record);
            if buf.len() >= self.batch_size {
                self.flush(&mut buf).await;
            }
        }
        if !buf.is_empty() {
            self.flush(&mut buf).await;
        }
    }

    async fn flush(&self, buf: &mut Vec<MessageRecord>) {
        let mut pending: Vec<StoredMessage> = buf.drain(..).map(|r| self.shared.to_row(r)).collect();
        let count = pending.len();
        let started = Instant::now();
        let counters = &self.shared.counters;

        let mut attempts = 0;
        let mut last_error = String::new();
        while attempts < 2 && !pending.is_empty() {
            if attempts > 0 {
                tracing::warn!(records = pending.len(), error = %last_error, "batch insert failed, retrying once");
                bump(&counters.retries, 1);
                tokio::time::sleep(self.retry_backoff).await;
            }
            attempts += 1;
            match self.shared.store.insert_batch(&pending).await {
                Ok(()) => {
                    bump(&counters.persisted, pending.len());
                    pending.clear();
                }
                Err(Error::PartialBatch { written, message }) => {
                    let written: HashSet<Uuid> = written.into_iter().collect();
                    let before = pending.len();
                    pending.retain(|row| !written.contains(&row.record.message_uid));
                    bump(&counters.persisted, before - pending.len());
                    last_error = message;
                }
                Err(e) => last_error = e.to_string(),
            }
        }

        if pending.is_empty() {
            bump(&counters.batches_flushed, 1);
            TraceEvent::BatchFlushed {
                records: count,
                attempts,
                duration_ms: started.elapsed().as_millis() as u64,
            }
            .emit();
        } else {
            bump(&counters.dropped, pending.len());
            tracing::error!(
                records = pending.len(),
                batch = count,
                error = %last_error,
                "batch insert failed twice, dropping unwritten rows"
            );
            TraceEvent::BatchDropped {
                records: pending.len(),
                error: last_error,
            }
            .emit();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryMessageStore;
    use cb_domain::config::TopicsConfig;
    use cb_domain::message::{ChannelMetadata, Topic};

    fn record(role: Role, content: &str) -> MessageRecord {
        MessageRecord::new("client", "bot", role, content, vec![], ChannelMetadata::widget())
    }

    #[tokio::test(start_paused = true)]
    async fn only_user_turns_are_tagged() {
        let mut topics = TopicsConfig::default();
        topics.catalog.insert(
            "bot".into(),
            vec![Topic {
                id: "t-billing".into(),
                name: "Billing".into(),
            }],
        );
        let store = Arc::new(InMemoryMessageStore::new());
        let pipeline = MessagePipeline::start(
            &PersistenceConfig::default(),
            store.clone(),
            TopicTagger::new(&topics),
        );

        pipeline.enqueue(record(Role::User, "question about billing"));
        pipeline.enqueue(record(Role::Assistant, "billing answer"));
        pipeline.shutdown().await;

        let rows = store.rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].topic_id.as_deref(), Some("t-billing"));
        assert_eq!(rows[1].topic_id, None);
    }

    #[tokio::test(start_paused = true)]
    async fn interval_flushes_partial_batch() {
        let store = Arc::new(InMemoryMessageStore::new());
        let pipeline = MessagePipeline::start(
            &PersistenceConfig::default(),
            store.clone(),
            TopicTagger::new(&TopicsConfig::default()),
        );

        pipeline.enqueue(record(Role::User, "hi"));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(store.is_empty());

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(store.len(), 1);
        assert_eq!(pipeline.stats().batches_flushed, 1);
        pipeline.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn enqueue_after_shutdown_is_dropped() {
        let store = Arc::new(InMemoryMessageStore::new());
        let pipeline = MessagePipeline::start(
            &PersistenceConfig::default(),
            store.clone(),
            TopicTagger::new(&TopicsConfig::default()),
        );
        pipeline.shutdown().await;
        pipeline.enqueue(record(Role::User, "late"));
        assert_eq!(pipeline.stats().dropped, 1);
        assert!(store.is_empty());
        // A second shutdown is a no-op.
        pipeline.shutdown().await;
    }
}
