use serde::Serialize;

/// Structured trace events emitted across all chatcore crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    GraphBuilt {
        tenant_id: String,
        tools: usize,
        credentials: usize,
        duration_ms: u64,
    },
    GraphEvicted {
        tenant_id: String,
        reason: String,
    },
    LlmRequest {
        tenant_id: String,
        model: String,
        step: usize,
        duration_ms: u64,
        tool_calls: usize,
        prompt_tokens: Option<u32>,
        completion_tokens: Option<u32>,
    },
    ToolInvoked {
        tenant_id: String,
        tool: String,
        is_error: bool,
        duration_ms: u64,
    },
    BatchFlushed {
        records: usize,
        attempts: u32,
        duration_ms: u64,
    },
    BatchDropped {
        records: usize,
        error: String,
    },
    DomainIndexRefreshed {
        domains: usize,
        entries: usize,
    },
    FallbackCitations {
        tenant_id: String,
        citations: usize,
        error: Option<String>,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "cb_event");
    }
}
