//! Management HTTP API over a running engine.

mod error;
mod handlers;
#[cfg(test)]
mod tests;

use axum::{
    Router,
    routing::{get, post, put},
};
use tower_http::trace::TraceLayer;
use tracing::info;

use meshgate_core::{Engine, EngineConfig};

use crate::error::CliError;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub engine: Engine,
}

/// create the management router with all endpoints.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/clients", get(handlers::list_clients))
        .route("/clients/{id}", get(handlers::get_client))
        .route("/clients/{id}/reach", get(handlers::get_reach))
        .route("/clients/{id}/targets", get(handlers::get_targets))
        .route("/clients/{id}/acl", put(handlers::put_acl))
        .route(
            "/clients/{id}/acl/{target}/toggle",
            post(handlers::toggle_rule),
        )
        .route("/clients/{id}/dns", put(handlers::put_dns))
        .route("/capabilities/bridge", put(handlers::put_bridge))
        .route("/sync", post(handlers::sync))
        .route("/apply", post(handlers::apply))
        .route("/apply/preview", get(handlers::preview))
        .route("/status", get(handlers::status))
        .route("/events/topology", post(handlers::topology_event))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the engine and serve the API until interrupted.
pub async fn serve(config: EngineConfig, listen: &str) -> Result<(), CliError> {
    let engine = Engine::new(config)?;
    engine.start().await?;

    let app = router(AppState {
        engine: engine.clone(),
    });
    let listener = tokio::net::TcpListener::bind(listen).await?;
    info!(addr = %listener.local_addr()?, "management api listening");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    engine.shutdown().await;
    served?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("shutdown requested");
}
