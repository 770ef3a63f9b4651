/**
 * SYMBION COLLECTOR - Point d'entrée du collecteur de télémétrie
 * 
 * RÔLE : Bootstrap : config, logs, annuaire clients, historique, serveur HTTP/WebSocket.
 * 
 * ARCHITECTURE : Agents -> (POST | WebSocket) -> ingestion -> cache dernier rapport + historique.
 * UTILITÉ : Source de vérité de l'état courant des machines pour le dashboard.
 */

use anyhow::{Context, Result};
use std::sync::Arc;
use symbion_collector::config::load_config;
use symbion_collector::store::{ClientDirectory, JsonlHistorySink};
use symbion_collector::{build_router, AppState};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Charger les variables d'environnement depuis .env (si présent)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = load_config().await;

    // collaborateurs : annuaire clients + historique
    let clients = ClientDirectory::load(&cfg.clients_file)
        .with_context(|| format!("failed to load clients from {}", cfg.clients_file.display()))?;
    let history = JsonlHistorySink::open(&cfg.history_file)
        .with_context(|| format!("failed to open history at {}", cfg.history_file.display()))?;

    let app_state = AppState::new(Arc::new(clients), Arc::new(history), cfg.stream.settings());
    let app = build_router(app_state);

    let listener = TcpListener::bind(cfg.listen)
        .await
        .with_context(|| format!("failed to bind {}", cfg.listen))?;
    info!("[collector] listening on http://{}", cfg.listen);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("[collector] stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("[collector] failed to listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
    info!("[collector] shutdown requested");
}
