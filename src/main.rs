use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use qirust_serve::config::Config;
use qirust_serve::encoder::Encoder;
use qirust_serve::i18n::Catalog;
use qirust_serve::store::ArtifactStore;
use qirust_serve::sweeper::Sweeper;
use qirust_serve::web::{self, AppState};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = Config::parse();
    let policy = config.retention().context("invalid retention settings")?;

    let artifact_subdir = config.artifact_subdir().context("invalid artifact settings")?;
    let artifact_dir = config.artifact_dir()?;
    if !artifact_dir.is_dir() {
        bail!(
            "artifact directory {} does not exist; create it before starting",
            artifact_dir.display()
        );
    }

    let catalog = Catalog::load(
        &config.lang_dir(),
        &config.languages(),
        &config.default_language,
    )
    .context("failed to load translations")?;
    tracing::info!(
        languages = ?catalog.languages().collect::<Vec<_>>(),
        default = catalog.default_language(),
        "translations loaded"
    );

    let store = ArtifactStore::new(&config.static_dir, artifact_subdir);
    let state = Arc::new(AppState::new(Encoder::default(), store, catalog));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = Sweeper::new(artifact_dir, policy).spawn(shutdown_rx);

    let app = web::router(state, &config.static_dir, config.max_input_bytes);
    let addr = config.listen_addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "listening");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            tracing::info!("shutting down gracefully");
            let _ = shutdown_tx.send(true);
        })
        .await;

    // Also covers the error path: the sender is gone, so the sweeper stops.
    if let Err(err) = sweeper.await {
        tracing::error!(error = %err, "sweeper task panicked");
    }

    served.context("server error")
}
