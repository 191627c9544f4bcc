use cb_domain::tool::{ToolDefinition, ToolOutput};
use serde_json::Value;

/// What a tool does, as far as the agent loop cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    /// Read-only search; its output carries citations.
    Retrieval,
    /// Calls an external endpoint that may mutate state.
    HttpAction,
}

impl ToolKind {
    pub fn is_side_effecting(self) -> bool {
        matches!(self, ToolKind::HttpAction)
    }
}

/// A callable unit bound to one tenant.
///
/// Execution failures (bad arguments, HTTP errors, timeouts) come back as
/// an error [`ToolOutput`] so the model can react; they never abort the
/// loop.
#[async_trait::async_trait]
pub trait InvokableTool: Send + Sync {
    fn definition(&self) -> &ToolDefinition;

    fn kind(&self) -> ToolKind;

    async fn invoke(&self, arguments: &Value) -> ToolOutput;

    fn name(&self) -> &str {
        &self.definition().name
    }
}
