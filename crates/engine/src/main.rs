use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig as _;

use cb_domain::config::{LogFormat, ObservabilityConfig};
use cb_engine::cli::{self, Cli, Command, ConfigCommand};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve => {
            let (config, config_path) = cli::load_config()?;
            let tracer_provider = init_tracing(&config.observability);
            tracing::info!(config = %config_path, "chatcore starting");

            let result = cli::serve::run(config).await;

            if let Some(provider) = tracer_provider {
                if let Err(e) = provider.shutdown() {
                    tracing::warn!(error = ?e, "OpenTelemetry tracer provider shutdown failed");
                }
            }
            tracing::info!("shutdown complete");
            result
        }
        Command::Ask {
            tenant,
            history,
            client_id,
            json,
            message,
        } => {
            init_cli_tracing();
            let (config, _) = cli::load_config()?;
            cli::ask::run(config, tenant, history.as_deref(), client_id, message, json).await
        }
        Command::Config(ConfigCommand::Validate) => {
            let (config, config_path) = cli::load_config()?;
            if !cli::config::validate(&config, &config_path) {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Config(ConfigCommand::Show) => {
            let (config, _) = cli::load_config()?;
            cli::config::show(&config)
        }
        Command::Version => {
            println!("chatcore {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Stderr logs for `serve` in the configured format, plus an OTLP span
/// exporter when `observability.otlp_endpoint` is set. The returned
/// provider must be shut down on exit to flush pending spans.
fn init_tracing(obs: &ObservabilityConfig) -> Option<opentelemetry_sdk::trace::SdkTracerProvider> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,cb_engine=debug"));

    // stdout carries responses, so logs go to stderr.
    let (json_layer, compact_layer) = match obs.log_format {
        LogFormat::Json => (
            Some(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)),
            None,
        ),
        LogFormat::Compact => (
            None,
            Some(tracing_subscriber::fmt::layer().compact().with_writer(std::io::stderr)),
        ),
    };

    let tracer_provider = obs.export_endpoint().and_then(|endpoint| {
        match opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()
        {
            Ok(exporter) => {
                let resource = opentelemetry_sdk::Resource::builder()
                    .with_service_name(obs.service_name.clone())
                    .build();
                Some(
                    opentelemetry_sdk::trace::SdkTracerProvider::builder()
                        .with_batch_exporter(exporter)
                        .with_sampler(opentelemetry_sdk::trace::Sampler::TraceIdRatioBased(
                            obs.sampler_ratio(),
                        ))
                        .with_resource(resource)
                        .build(),
                )
            }
            Err(e) => {
                eprintln!("WARNING: OTLP exporter for {endpoint} failed: {e}; spans are not exported");
                None
            }
        }
    });

    let otel_layer = tracer_provider
        .as_ref()
        .map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer("chatcore")));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(compact_layer)
        .with(otel_layer)
        .init();

    tracer_provider
}

/// Compact stderr-only tracing for one-shot commands. Defaults to `warn`
/// so diagnostics do not pollute stdout.
fn init_cli_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .compact()
        .init();
}
