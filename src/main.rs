use std::sync::Arc;

use anyhow::Context;

use lead_outreach::api::{AppState, api_routes};
use lead_outreach::config::AppConfig;
use lead_outreach::pipeline::{DefaultProcessors, Orchestrator};
use lead_outreach::store::{LeadStore, LibSqlBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    let _ = rustls::crypto::ring::default_provider().install_default();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = AppConfig::from_env().context("invalid configuration")?;

    eprintln!("📬 Lead Outreach v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   API: http://0.0.0.0:{}", config.api_port);
    eprintln!("   Database: {}", config.database_path.display());
    eprintln!(
        "   Outreach: {}/min, {} retries, dry run {}",
        config.outreach.rate_limit_per_minute, config.outreach.max_retries, config.outreach.dry_run
    );
    eprintln!(
        "   Email: {}",
        if config.smtp.is_some() { "SMTP" } else { "disabled" }
    );
    eprintln!(
        "   AI enrichment: {}\n",
        config
            .llm
            .as_ref()
            .map_or("disabled (GROQ_API_KEY not set)", |l| l.model.as_str())
    );

    // ── Database ─────────────────────────────────────────────────────────
    let store: Arc<dyn LeadStore> = Arc::new(
        LibSqlBackend::new_local(&config.database_path)
            .await
            .with_context(|| {
                format!("failed to open database at {}", config.database_path.display())
            })?,
    );

    // ── Pipeline ─────────────────────────────────────────────────────────
    let processors = DefaultProcessors::from_config(&config)?;
    let orchestrator = Arc::new(Orchestrator::new(Arc::clone(&store), Arc::new(processors)));

    // ── HTTP ─────────────────────────────────────────────────────────────
    let app = api_routes(AppState {
        orchestrator,
        store,
        default_dry_run: config.outreach.dry_run,
    });

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.api_port))
        .await
        .with_context(|| format!("failed to bind port {}", config.api_port))?;
    tracing::info!(port = config.api_port, "API server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await?;

    Ok(())
}
