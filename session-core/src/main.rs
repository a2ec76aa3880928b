use std::sync::Arc;

use session_core::bus::WsTransport;
use session_core::config::{self, Config, LogFormat};
use session_core::{InMemoryWorkspaceStore, Session, SqliteWorkspaceStore, WorkspaceStore};
use shared_types::topics::TASKGRAPH_EVENTS;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "session_core=debug,info".into());
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env before reading config; report the outcome once logging is up.
    let env_file = config::load_env_file();
    let config = Config::from_env()?;
    init_tracing(config.log_format);
    env_file.log();

    info!(
        kernel = %config.endpoint()?,
        principal = config.principal.as_deref().unwrap_or("<ephemeral>"),
        "desktop session starting"
    );

    let store: Arc<dyn WorkspaceStore> = match &config.principal {
        Some(_) => Arc::new(
            SqliteWorkspaceStore::connect(&config.database_url)
                .await
                .map_err(|e| anyhow::anyhow!("workspace store unavailable: {e}"))?,
        ),
        None => Arc::new(InMemoryWorkspaceStore::new()),
    };

    let session = Session::open(&config, Arc::new(WsTransport), store).await?;

    let mut states = session.bus().watch_state();
    let state_logger = tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            info!(state = %state, "kernel connection state");
        }
    });

    let taskgraph = session.bus().subscribe_pattern(TASKGRAPH_EVENTS, |payload, envelope| {
        info!(topic = %envelope.topic, payload = %payload, "task graph event");
    });

    if let Err(e) = session.connect().await {
        // Reconnect policy keeps trying in the background
        tracing::warn!(error = %e, "initial kernel connection failed");
    }

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");

    taskgraph.unsubscribe();
    let closed = session.close().await;
    state_logger.abort();
    closed?;
    Ok(())
}
