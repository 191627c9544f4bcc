//! Tenant-scoped tools the agent loop can call: the retrieval tool and
//! tenant-defined HTTP custom actions.

pub mod http_action;
pub mod rag;
pub mod registry;
pub mod tool;

pub use http_action::HttpActionTool;
pub use rag::{citations_from_output, citations_from_passages, RetrievalTool};
pub use registry::ToolRegistry;
pub use tool::{InvokableTool, ToolKind};
