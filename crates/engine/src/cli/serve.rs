//! `chatcore serve`: JSON-lines request loop over stdin/stdout.
//!
//! Each input line is one request tagged by `op`; each gets exactly one
//! response line carrying the same `id`. Exchanges run concurrently, each
//! under its own cancellation token, so replies may arrive out of order.
//!
//! ```text
//! {"op":"exchange","id":"r1","tenant_id":"bot-1","unique_client_id":"c1","message":"hi"}
//! {"op":"cancel","id":"r2","target":"r1"}
//! {"op":"feedback","id":"r3","chatbot_id":"bot-1","message_uid":"…","feedback":"like"}
//! {"op":"authorize","id":"r4","api_key":"…","origin":"https://shop.example.com"}
//! {"op":"invalidate","id":"r5","tenant_id":"bot-1"}
//! {"op":"stats","id":"r6"}
//! ```

use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use cb_domain::config::Config;
use cb_domain::error::{Error, ErrorKind};
use cb_domain::message::Feedback;

use crate::bootstrap;
use crate::engine::{Engine, ExchangeRequest};

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ServeRequest {
    Exchange {
        id: String,
        #[serde(flatten)]
        request: ExchangeRequest,
    },
    Feedback {
        id: String,
        chatbot_id: String,
        message_uid: Uuid,
        feedback: Feedback,
        #[serde(default)]
        comment: Option<String>,
    },
    Authorize {
        id: String,
        api_key: String,
        origin: String,
    },
    /// Cancel the in-flight exchange whose id is `target`.
    Cancel { id: String, target: String },
    Invalidate { id: String, tenant_id: String },
    Stats { id: String },
}

#[derive(Debug, Serialize)]
struct Response<'a, T: Serialize> {
    id: Option<&'a str>,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorBody>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    kind: ErrorKind,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    side_effecting_calls: Option<usize>,
}

impl From<&Error> for ErrorBody {
    fn from(e: &Error) -> Self {
        let side_effecting_calls = match e {
            Error::StepLimitExceeded {
                side_effecting_calls,
                ..
            } => Some(*side_effecting_calls),
            _ => None,
        };
        Self {
            kind: e.kind(),
            message: e.to_string(),
            side_effecting_calls,
        }
    }
}

/// Boot the engine and serve stdin until EOF or a shutdown signal.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let engine = Arc::new(bootstrap::build_engine(&config).await?);
    serve(
        engine,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
        shutdown_signal(),
    )
    .await
}

/// Request loop. On EOF in-flight exchanges finish and are answered; on
/// `shutdown` they are cancelled. Either way the engine is shut down, which
/// drains the persistence pipeline, before this returns.
pub async fn serve<R, W, S>(engine: Arc<Engine>, input: R, output: W, shutdown: S) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
    S: Future<Output = ()>,
{
    let (tx, rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(write_lines(rx, output));
    let tasks = TaskTracker::new();

    let mut lines = input.lines();
    tokio::pin!(shutdown);
    let read_result = loop {
        let line = tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("shutdown signal received, cancelling in-flight requests");
                engine.requests().cancel_all();
                break Ok(());
            }
            line = lines.next_line() => line,
        };
        match line {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => dispatch(&engine, &tasks, &tx, &line),
            Ok(None) => {
                tracing::info!(in_flight = tasks.len(), "input closed, draining");
                break Ok(());
            }
            Err(e) => {
                engine.requests().cancel_all();
                break Err(e);
            }
        }
    };

    tasks.close();
    tasks.wait().await;
    engine.shutdown().await;

    drop(tx);
    writer.await.context("response writer task")??;
    read_result.context("reading requests")
}

fn dispatch(engine: &Arc<Engine>, tasks: &TaskTracker, tx: &mpsc::UnboundedSender<String>, line: &str) {
    let raw: serde_json::Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            send(tx, failure(None, &Error::Json(e)));
            return;
        }
    };
    let id = raw.get("id").and_then(|v| v.as_str()).map(str::to_owned);
    let request: ServeRequest = match serde_json::from_value(raw) {
        Ok(r) => r,
        Err(e) => {
            send(tx, failure(id.as_deref(), &Error::InvalidInput(e.to_string())));
            return;
        }
    };

    match request {
        ServeRequest::Exchange { id, request } => {
            let Some(cancel) = engine.requests().register(&id) else {
                let err = Error::InvalidInput(format!("request id '{id}' is already in flight"));
                send(tx, failure(Some(id.as_str()), &err));
                return;
            };
            let (engine, tx) = (engine.clone(), tx.clone());
            tasks.spawn(async move {
                let line = match engine.exchange(request, &cancel).await {
                    Ok(reply) => success(&id, reply),
                    Err(e) => failure(Some(id.as_str()), &e),
                };
                engine.requests().remove(&id);
                send(&tx, line);
            });
        }
        ServeRequest::Feedback {
            id,
            chatbot_id,
            message_uid,
            feedback,
            comment,
        } => {
            let (engine, tx) = (engine.clone(), tx.clone());
            tasks.spawn(async move {
                let line = match engine
                    .update_feedback(&chatbot_id, message_uid, feedback, comment)
                    .await
                {
                    Ok(()) => success(&id, serde_json::json!({ "updated": true })),
                    Err(e) => failure(Some(id.as_str()), &e),
                };
                send(&tx, line);
            });
        }
        ServeRequest::Authorize { id, api_key, origin } => {
            let chatbot_id = engine.authorize(&api_key, &origin);
            send(tx, success(&id, serde_json::json!({ "chatbot_id": chatbot_id })));
        }
        ServeRequest::Cancel { id, target } => {
            let cancelled = engine.requests().cancel(&target);
            send(tx, success(&id, serde_json::json!({ "cancelled": cancelled })));
        }
        ServeRequest::Invalidate { id, tenant_id } => {
            let invalidated = engine.invalidate(&tenant_id);
            send(tx, success(&id, serde_json::json!({ "invalidated": invalidated })));
        }
        ServeRequest::Stats { id } => {
            let stats = serde_json::json!({
                "pipeline": engine.pipeline_stats(),
                "cached_graphs": engine.cached_graphs(),
                "graph_builds": engine.graph_builds(),
                "in_flight": engine.requests().len(),
            });
            send(tx, success(&id, stats));
        }
    }
}

fn success<T: Serialize>(id: &str, result: T) -> Option<String> {
    encode(&Response {
        id: Some(id),
        ok: true,
        result: Some(result),
        error: None,
    })
}

fn failure(id: Option<&str>, e: &Error) -> Option<String> {
    encode(&Response::<()> {
        id,
        ok: false,
        result: None,
        error: Some(ErrorBody::from(e)),
    })
}

fn encode<T: Serialize>(response: &Response<'_, T>) -> Option<String> {
    match serde_json::to_string(response) {
        Ok(line) => Some(line),
        Err(e) => {
            tracing::error!(error = %e, id = ?response.id, "failed to encode response");
            None
        }
    }
}

fn send(tx: &mpsc::UnboundedSender<String>, line: Option<String>) {
    if let Some(line) = line {
        if tx.send(line).is_err() {
            tracing::warn!("response writer gone, dropping response");
        }
    }
}

async fn write_lines<W>(mut rx: mpsc::UnboundedReceiver<String>, mut output: W) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(mut line) = rx.recv().await {
        line.push('\n');
        output.write_all(line.as_bytes()).await?;
        output.flush().await?;
    }
    output.shutdown().await
}

/// Resolves on SIGINT, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => tracing::info!("received SIGINT, shutting down"),
                    _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to register SIGTERM handler");
                ctrl_c.await;
                tracing::info!("received SIGINT, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await;
        tracing::info!("received SIGINT, shutting down");
    }
}
