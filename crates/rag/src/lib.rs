//! Retrieval-augmented generation: tenant-scoped vector search over
//! embedded passages.

pub mod retriever;
pub mod store;

pub use retriever::Retriever;
pub use store::{InMemoryVectorStore, Passage, VectorStore};
