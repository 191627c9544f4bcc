//! Agent execution engine: per-tenant compiled graphs, the bounded
//! tool-calling loop, request cancellation, widget access control, and the
//! `chatcore` command line.

pub mod access;
pub mod bootstrap;
pub mod cache;
pub mod cancel;
pub mod cli;
pub mod engine;
pub mod graph;
pub mod tenants;

pub use access::{DomainAccessIndex, DomainAccessSource, StaticDomainSource};
pub use cache::GraphCache;
pub use cancel::CancelMap;
pub use engine::{Engine, EngineParts, ExchangeReply, ExchangeRequest};
pub use graph::{AgentOutput, CompiledGraph, ExecutionState};
pub use tenants::{StaticTenantSource, TenantSource};
