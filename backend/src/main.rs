use std::net::SocketAddr;

use anyhow::Context;
use clap::Parser;
use tracing::{debug, info, warn};

mod config;
mod domain;
mod rest;
mod storage;

use config::Config;
use domain::CardService;
use rest::{create_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();
    let config = Config::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_filter().into()),
        )
        .init();

    info!("Setting up {:?} storage backend", config.backend);
    let store = storage::open_store(&config.store_config())
        .await
        .context("failed to open card storage")?;

    if config.skip_schema {
        info!("Skipping schema initialization");
    } else {
        store
            .ensure_schema()
            .await
            .context("failed to initialize card storage")?;
    }

    let cards = store.read_all().await.context("failed to read cards")?;
    info!("{} cards in {} storage", cards.len(), store.backend_name());
    for card in &cards {
        debug!(
            "ID: {}, Name: {}, Level: {}, Attribute: {}, Race: {}, Attack: {}, Defense: {}, Effect: {}",
            card.id, card.name, card.level, card.attribute, card.race, card.attack, card.defense, card.effect
        );
    }

    let app = create_router(AppState::new(CardService::new(store.clone())));

    let addr: SocketAddr = config
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", config.bind))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server is running on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down, closing {} storage", store.backend_name());
    if let Err(e) = store.close().await {
        warn!("Error closing storage: {}", e);
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
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
