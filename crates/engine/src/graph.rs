//! The per-tenant agent graph: PREPARE → MODEL_CALL ⇄ TOOL_CALL → DONE.
//!
//! [`CompiledGraph`] is built once per tenant and shared read-only across
//! requests. Everything a single run mutates lives in [`ExecutionState`],
//! created fresh for each call to [`CompiledGraph::run`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use cb_domain::config::{AgentConfig, UnknownToolPolicy};
use cb_domain::error::{Error, Result};
use cb_domain::template;
use cb_domain::tenant::TenantConfig;
use cb_domain::tool::{ToolCall, ToolOutput};
use cb_domain::trace::TraceEvent;
use cb_domain::turn::{ConversationTurn, Role};
use cb_providers::{GenerationOptions, KeyRotatingClient, ProviderFactory};
use cb_tools::{citations_from_output, InvokableTool, ToolKind, ToolRegistry};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Compiled graph
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct CompiledGraph {
    tenant_id: String,
    system_prompt: String,
    client: KeyRotatingClient,
    tools: Vec<Arc<dyn InvokableTool>>,
    by_name: HashMap<String, usize>,
    max_steps: usize,
    unknown_tool: UnknownToolPolicy,
    rag_enabled: bool,
}

impl CompiledGraph {
    /// Resolve the tenant's tools and bind them to every credential.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] when the tenant fails validation or has no usable
    /// credential, or whatever the provider factory reports.
    pub fn build(
        config: &TenantConfig,
        registry: &ToolRegistry,
        factory: Arc<dyn ProviderFactory>,
        agent: &AgentConfig,
    ) -> Result<Self> {
        config.validate()?;
        let tools = registry.resolve(config);
        let options = GenerationOptions {
            temperature: Some(config.temperature),
            max_tokens: config.max_tokens,
        };
        let client = KeyRotatingClient::new(
            config.api_keys.clone(),
            config.model_name.clone(),
            options,
            factory,
        )
        .map_err(|e| match e {
            Error::Config(msg) => Error::Config(format!("tenant {}: {msg}", config.chatbot_id)),
            other => other,
        })?;
        client.bind_tools(tools.iter().map(|t| t.definition().clone()).collect())?;

        let by_name = tools
            .iter()
            .enumerate()
            .map(|(i, t)| (t.name().to_string(), i))
            .collect();

        Ok(Self {
            tenant_id: config.chatbot_id.clone(),
            system_prompt: config.system_prompt.clone(),
            client,
            rag_enabled: tools.iter().any(|t| t.kind() == ToolKind::Retrieval),
            tools,
            by_name,
            max_steps: agent.max_steps.max(1),
            unknown_tool: agent.unknown_tool,
        })
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn credential_count(&self) -> usize {
        self.client.credential_count()
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    /// Whether a retrieval tool was actually registered.
    pub fn rag_enabled(&self) -> bool {
        self.rag_enabled
    }

    fn tool(&self, name: &str) -> Option<&Arc<dyn InvokableTool>> {
        self.by_name.get(name).map(|&i| &self.tools[i])
    }

    /// Run the loop over `turns` (history ending with the new user turn).
    ///
    /// Cancelling `cancel` aborts at the next model or tool await with
    /// [`Error::Cancelled`].
    pub async fn run(&self, turns: Vec<ConversationTurn>, cancel: &CancellationToken) -> Result<AgentOutput> {
        let span = tracing::info_span!(
            "agent.run",
            tenant_id = %self.tenant_id,
            steps = tracing::field::Empty,
            tool_calls = tracing::field::Empty,
        );
        let result = self.run_inner(turns, cancel).instrument(span.clone()).await;
        if let Ok(out) = &result {
            span.record("steps", out.steps);
            span.record("tool_calls", out.tool_call_count);
        }
        result
    }

    async fn run_inner(&self, turns: Vec<ConversationTurn>, cancel: &CancellationToken) -> Result<AgentOutput> {
        let mut state = ExecutionState::prepare(&self.tenant_id, self.render_system_prompt(), turns)?;

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            state.steps += 1;
            let reply = tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                reply = self.model_call(&state) => reply?,
            };
            state.messages.push(reply.clone());

            if !reply.requests_tools() {
                return Ok(state.finish(reply));
            }
            if state.steps >= self.max_steps {
                tracing::warn!(
                    tenant_id = %self.tenant_id,
                    max_steps = self.max_steps,
                    side_effecting_calls = state.side_effecting_calls,
                    "model still requesting tools at step limit"
                );
                return Err(Error::StepLimitExceeded {
                    max_steps: self.max_steps,
                    side_effecting_calls: state.side_effecting_calls,
                });
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                done = self.tool_calls(&mut state, &reply.tool_calls) => done?,
            }
        }
    }

    fn render_system_prompt(&self) -> String {
        let today = chrono::Utc::now().format("%Y-%m-%d").to_string();
        template::render(&self.system_prompt, |name| match name {
            "chatbot_id" => Some(self.tenant_id.clone()),
            "date" => Some(today.clone()),
            _ => None,
        })
    }

    // ── MODEL_CALL ───────────────────────────────────────────────────

    async fn model_call(&self, state: &ExecutionState) -> Result<ConversationTurn> {
        let span = tracing::info_span!(
            "llm.call",
            "otel.kind" = "CLIENT",
            model = %self.client.model(),
            step = state.steps,
            input_tokens = tracing::field::Empty,
            output_tokens = tracing::field::Empty,
        );
        let started = Instant::now();
        let response = self
            .client
            .generate(&state.messages)
            .instrument(span.clone())
            .await
            .inspect_err(|e| {
                tracing::warn!(
                    tenant_id = %self.tenant_id,
                    step = state.steps,
                    error = %e,
                    "model call failed"
                );
            })?;

        if let Some(u) = &response.usage {
            span.record("input_tokens", u.prompt_tokens);
            span.record("output_tokens", u.completion_tokens);
        }
        TraceEvent::LlmRequest {
            tenant_id: self.tenant_id.clone(),
            model: self.client.model().to_string(),
            step: state.steps,
            duration_ms: started.elapsed().as_millis() as u64,
            tool_calls: response.tool_calls.len(),
            prompt_tokens: response.usage.map(|u| u.prompt_tokens),
            completion_tokens: response.usage.map(|u| u.completion_tokens),
        }
        .emit();

        Ok(response.to_turn())
    }

    // ── TOOL_CALL ────────────────────────────────────────────────────

    /// Run every requested call concurrently, then append results and
    /// citations in request order.
    async fn tool_calls(&self, state: &mut ExecutionState, calls: &[ToolCall]) -> Result<()> {
        if self.unknown_tool == UnknownToolPolicy::Fail {
            if let Some(call) = calls.iter().find(|c| self.tool(&c.tool_name).is_none()) {
                return Err(Error::UnknownTool(call.tool_name.clone()));
            }
        }

        let futures: Vec<_> = calls
            .iter()
            .map(|call| {
                let span = tracing::info_span!(
                    "tool.call",
                    tool_name = %call.tool_name,
                    call_id = %call.call_id,
                );
                self.dispatch(call).instrument(span)
            })
            .collect();
        let outputs = futures_util::future::join_all(futures).await;

        for (call, (kind, output)) in calls.iter().zip(outputs) {
            state.tool_call_count += 1;
            if kind.is_some_and(ToolKind::is_side_effecting) {
                state.side_effecting_calls += 1;
            }
            if kind == Some(ToolKind::Retrieval) && !output.is_error {
                state.add_citations(citations_from_output(&output.content));
            }
            state.messages.push(ConversationTurn::tool_result(
                call.call_id.clone(),
                output.content,
                output.is_error,
            ));
        }
        Ok(())
    }

    async fn dispatch(&self, call: &ToolCall) -> (Option<ToolKind>, ToolOutput) {
        let Some(tool) = self.tool(&call.tool_name) else {
            tracing::warn!(
                tenant_id = %self.tenant_id,
                tool = %call.tool_name,
                "model requested unknown tool"
            );
            return (
                None,
                ToolOutput::error(format!("unknown tool '{}'", call.tool_name)),
            );
        };

        let started = Instant::now();
        let output = tool.invoke(&call.arguments).await;
        TraceEvent::ToolInvoked {
            tenant_id: self.tenant_id.clone(),
            tool: call.tool_name.clone(),
            is_error: output.is_error,
            duration_ms: started.elapsed().as_millis() as u64,
        }
        .emit();
        (Some(tool.kind()), output)
    }
}

impl std::fmt::Debug for CompiledGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledGraph")
            .field("tenant_id", &self.tenant_id)
            .field("tools", &self.tool_names())
            .field("client", &self.client)
            .field("max_steps", &self.max_steps)
            .finish()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Execution state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-run mutable state. Never shared between requests.
#[derive(Debug)]
pub struct ExecutionState {
    pub messages: Vec<ConversationTurn>,
    pub citations: Vec<String>,
    seen: HashSet<String>,
    pub tool_call_count: usize,
    pub side_effecting_calls: usize,
    pub steps: usize,
}

impl ExecutionState {
    /// PREPARE: one system turn first, then the caller's turns with any
    /// system turns of their own removed. The last turn must be the user's.
    pub fn prepare(tenant_id: &str, system_prompt: String, turns: Vec<ConversationTurn>) -> Result<Self> {
        match turns.last() {
            Some(t) if t.role == Role::User => {}
            _ => {
                return Err(Error::InvalidInput(
                    "conversation must end with a user turn".into(),
                ))
            }
        }

        let mut messages = Vec::with_capacity(turns.len() + 1);
        messages.push(ConversationTurn::system(system_prompt));
        let mut dropped = 0usize;
        for turn in turns {
            if turn.role == Role::System {
                dropped += 1;
            } else {
                messages.push(turn);
            }
        }
        if dropped > 0 {
            tracing::debug!(tenant_id, dropped, "dropped caller-supplied system turns");
        }

        Ok(Self {
            messages,
            citations: Vec::new(),
            seen: HashSet::new(),
            tool_call_count: 0,
            side_effecting_calls: 0,
            steps: 0,
        })
    }

    /// Merge citations, keeping first-seen order and dropping repeats.
    pub fn add_citations(&mut self, citations: impl IntoIterator<Item = String>) {
        for c in citations {
            if self.seen.insert(c.clone()) {
                self.citations.push(c);
            }
        }
    }

    fn finish(self, reply: ConversationTurn) -> AgentOutput {
        AgentOutput {
            content: reply.content,
            citations: self.citations,
            tool_call_count: self.tool_call_count,
            steps: self.steps,
        }
    }
}

/// What a successful run returns.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct AgentOutput {
    pub content: String,
    pub citations: Vec<String>,
    pub tool_call_count: usize,
    pub steps: usize,
}
