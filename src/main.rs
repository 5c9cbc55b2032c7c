use std::sync::Arc;
use std::time::Duration;

use jobtrail::config::PipelineConfig;
use jobtrail::fetch::ResendFetcher;
use jobtrail::llm::{LlmConfig, create_provider};
use jobtrail::notify::WsNotifierHub;
use jobtrail::pipeline::EmailPipeline;
use jobtrail::store::{Database, LibSqlBackend};
use jobtrail::webhook;

/// How often the retention sweep runs.
const SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let openai_key = std::env::var("OPENAI_API_KEY").unwrap_or_else(|_| {
        eprintln!("Error: OPENAI_API_KEY not set");
        eprintln!("  export OPENAI_API_KEY=sk-...");
        std::process::exit(1);
    });
    let resend_key = std::env::var("RESEND_API_KEY").unwrap_or_else(|_| {
        eprintln!("Error: RESEND_API_KEY not set");
        eprintln!("  export RESEND_API_KEY=re_...");
        std::process::exit(1);
    });

    let model =
        std::env::var("JOBTRAIL_PARSE_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
    let port: u16 = std::env::var("JOBTRAIL_PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse()
        .unwrap_or(8080);
    let db_path =
        std::env::var("JOBTRAIL_DB_PATH").unwrap_or_else(|_| "./data/jobtrail.db".to_string());

    let config = PipelineConfig::from_env();

    eprintln!("jobtrail v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {model}");
    eprintln!("   Webhook: http://0.0.0.0:{port}/webhook/inbound-email");
    eprintln!("   Notifications: ws://0.0.0.0:{port}/ws/notifications/{{account_id}}");
    eprintln!("   Database: {db_path}");

    let db: Arc<LibSqlBackend> = Arc::new(
        LibSqlBackend::new_local(std::path::Path::new(&db_path))
            .await
            .unwrap_or_else(|e| {
                eprintln!("Error: Failed to open database at {db_path}: {e}");
                std::process::exit(1);
            }),
    );

    let llm = create_provider(&LlmConfig {
        api_key: secrecy::SecretString::from(openai_key),
        model,
        base_url: None,
    });
    let fetcher = Arc::new(ResendFetcher::new(secrecy::SecretString::from(resend_key)));
    let hub = WsNotifierHub::new();

    let pipeline = Arc::new(EmailPipeline::new(
        db.clone(),
        fetcher,
        hub.clone(),
        llm,
        config.clone(),
    ));

    let _sweep_handle = spawn_retention_sweep(db.clone(), config);

    let app = webhook::routes(pipeline, hub);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await?;
    tracing::info!(port, "jobtrail listening");
    axum::serve(listener, app).await?;

    Ok(())
}

/// Periodically delete expired ledger rows and notifications. Storage
/// hygiene only; failures are logged and the sweep keeps running.
fn spawn_retention_sweep(
    db: Arc<dyn Database>,
    config: PipelineConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            match db.prune_processed_emails(config.ledger_retention).await {
                Ok(removed) if removed > 0 => {
                    tracing::info!(removed, "Pruned expired ledger entries");
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "Ledger retention sweep failed"),
            }
            match db.prune_notifications(config.notification_retention).await {
                Ok(removed) if removed > 0 => {
                    tracing::info!(removed, "Pruned expired notifications");
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "Notification retention sweep failed"),
            }
        }
    })
}
