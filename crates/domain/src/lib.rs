//! Shared types for the chatcore agent engine: errors, conversation turns,
//! tool call shapes, tenant and message records, and service configuration.

pub mod config;
pub mod error;
pub mod message;
pub mod template;
pub mod tenant;
pub mod tool;
pub mod trace;
pub mod turn;

pub use error::{Error, ErrorKind, Result};
