//! apub-server entry point.

mod policy;

use std::sync::Arc;

use apub_common::{Config, init_tracing};
use apub_federation::handler::actor_iri;
use apub_federation::{
    Actor, ApClient, Collaborators, FederationEngine, JsonCodec, MemoryStore, router,
};
use tokio::signal;
use tracing::{info, warn};

use crate::policy::ConfigPolicy;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
///
/// On Unix systems, this listens for both SIGINT (Ctrl+C) and SIGTERM.
/// On Windows, this only listens for Ctrl+C.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received SIGINT, initiating graceful shutdown...");
        },
        () = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    init_tracing(&config.log)?;

    info!(url = %config.server.url, "Starting apub-server");

    let store = Arc::new(MemoryStore::new(config.server.url.clone()));
    for username in &config.server.actors {
        let actor = Actor::conventional(actor_iri(&config.server.url, username)?)?;
        store.register_local_actor(&actor).await?;
        info!(actor = %actor.id, "Registered local actor");
    }

    let client = Arc::new(ApClient::new(&config.delivery, &config.server.url)?);
    let engine = FederationEngine::new(
        Collaborators {
            capabilities: Arc::new(ConfigPolicy::new(&config.policy)),
            codec: Arc::new(JsonCodec),
            store,
            directory: client.clone(),
            transport: client,
        },
        config.server.url.clone(),
        config.federation.clone(),
    );

    let app = router(Arc::new(engine));
    let listener = tokio::net::TcpListener::bind(config.server.bind).await?;
    info!(addr = %config.server.bind, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}
