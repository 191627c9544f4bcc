//! `chatcore ask`: one exchange from the command line.

use std::path::Path;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use cb_domain::config::Config;
use cb_domain::message::ChannelMetadata;
use cb_domain::turn::ConversationTurn;

use crate::bootstrap;
use crate::engine::ExchangeRequest;

pub async fn run(
    config: Config,
    tenant: String,
    history: Option<&Path>,
    client_id: String,
    message: String,
    json_output: bool,
) -> anyhow::Result<()> {
    let history = match history {
        Some(path) => load_history(path)?,
        None => Vec::new(),
    };

    let engine = bootstrap::build_engine(&config).await?;

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let request = ExchangeRequest {
        tenant_id: tenant,
        unique_client_id: client_id,
        history,
        message,
        metadata: ChannelMetadata::widget(),
    };
    let result = engine.exchange(request, &cancel).await;

    // Flush persisted turns before reporting, success or not.
    engine.shutdown().await;

    let reply = result.context("exchange failed")?;
    if json_output {
        let json = serde_json::to_string_pretty(&reply)
            .map_err(|e| anyhow::anyhow!("serializing reply: {e}"))?;
        println!("{json}");
    } else {
        println!("{}", reply.content);
        if !reply.citations.is_empty() {
            eprintln!("\x1b[2msources: {}\x1b[0m", reply.citations.join(", "));
        }
    }
    Ok(())
}

fn load_history(path: &Path) -> anyhow::Result<Vec<ConversationTurn>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading history {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing history {}", path.display()))
}
