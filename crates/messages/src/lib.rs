//! Message log persistence for chatcore.
//!
//! Request tasks hand finished turns to a [`MessagePipeline`], which batches
//! them on a single background worker, tags user turns with a topic, and
//! writes them through a [`MessageStore`]. Persistence is best-effort: the
//! request path never waits on, or sees errors from, the store.

pub mod jsonl;
pub mod pipeline;
pub mod store;
pub mod topics;

pub use jsonl::JsonlMessageStore;
pub use pipeline::{MessagePipeline, PipelineStats};
pub use store::{InMemoryMessageStore, MessageStore};
pub use topics::TopicTagger;
