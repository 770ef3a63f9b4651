/**
 * API REST COLLECTOR - Serveur HTTP du collecteur de télémétrie
 *
 * RÔLE :
 * Point d'entrée des agents (rapports one-shot et streaming) et des
 * dashboards (derniers rapports, connexions vivantes, santé).
 *
 * FONCTIONNEMENT :
 * - Serveur Axum, réponses JSON
 * - Erreurs d'ingestion : {"status":"error","error":...} + code 400/401/409/500
 * - Le streaming WebSocket est géré par `stream.rs`
 *
 * UTILITÉ DANS SYMBION :
 * 🎯 Agents : POST /api/clients/uploadReport, GET /api/clients/report (WebSocket)
 * 🎯 Dashboard : état courant de chaque machine, fraîcheur incluse
 * 🎯 Debug/administration : sessions streaming vivantes, fermeture forcée
 */

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use time::{Duration, OffsetDateTime};
use tracing::debug;

use crate::cache::SnapshotCache;
use crate::error::IngestError;
use crate::health::{CollectorHealth, HealthTracker};
use crate::ingest::Ingestor;
use crate::models::{decode_report, ClientId, NormalizedReport};
use crate::registry::{ConnectionInfo, ConnectionRegistry};
use crate::resolver::TokenResolver;
use crate::store::{ClientStore, HistorySink};
use crate::stream::{report_ws, StreamSettings};

#[derive(Clone)]
pub struct AppState {
    pub ingestor: Ingestor,
    pub registry: ConnectionRegistry,
    pub cache: SnapshotCache,
    pub health: HealthTracker,
    pub stream: StreamSettings,
}

impl AppState {
    pub fn new(clients: Arc<dyn ClientStore>, history: Arc<dyn HistorySink>, stream: StreamSettings) -> Self {
        let cache = SnapshotCache::new();
        let health = HealthTracker::new();
        let ingestor = Ingestor::new(TokenResolver::new(clients), cache.clone(), history, health.clone());
        Self {
            ingestor,
            registry: ConnectionRegistry::new(),
            cache,
            health,
            stream,
        }
    }
}

#[derive(Serialize)]
struct SnapshotView {
    client: ClientId,
    report: NormalizedReport,
    stale: bool,           // true si plus vieux que l'idle timeout
    age_seconds: i64,
}

fn to_view(client: ClientId, report: NormalizedReport, stale_after: Duration) -> SnapshotView {
    let age = OffsetDateTime::now_utc() - report.time;
    SnapshotView {
        client,
        stale: age > stale_after,
        age_seconds: age.whole_seconds().max(0),
        report,
    }
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/system/health", get(get_system_health))
        .route("/api/clients/uploadReport", post(upload_report))
        .route("/api/clients/report", get(report_ws))
        .route("/api/clients/latest", get(list_latest))
        .route("/api/clients/{id}/latest", get(get_latest))
        .route("/api/connections", get(list_connections))
        .route("/api/connections/{id}", delete(disconnect_client))
        .with_state(app_state)
}

// POST /api/clients/uploadReport (rapport one-shot)
async fn upload_report(State(app): State<AppState>, body: Bytes) -> Result<Json<Value>, IngestError> {
    let mut report = match decode_report(&body) {
        Ok(report) => report,
        Err(e) => {
            app.health.report_rejected();
            return Err(e);
        }
    };
    let Some(token) = report.take_token() else {
        app.health.report_rejected();
        return Err(IngestError::Unauthorized("Token not provided".into()));
    };

    let client = app.ingestor.accept(&token, report)?;
    debug!(client = %client, "one-shot report stored");
    Ok(Json(json!({ "status": "success" })))
}

// GET /api/clients/latest (liste)
async fn list_latest(State(app): State<AppState>) -> Json<Vec<SnapshotView>> {
    let stale_after = stale_after(&app);
    let list = app
        .cache
        .all()
        .into_iter()
        .map(|(client, report)| to_view(client, report, stale_after))
        .collect();
    Json(list)
}

// GET /api/clients/{id}/latest (détail)
async fn get_latest(
    State(app): State<AppState>,
    Path(id): Path<ClientId>,
) -> Result<Json<SnapshotView>, StatusCode> {
    let Some(report) = app.cache.get(&id) else { return Err(StatusCode::NOT_FOUND); };
    Ok(Json(to_view(id, report, stale_after(&app))))
}

// GET /api/connections (sessions streaming vivantes)
async fn list_connections(State(app): State<AppState>) -> Json<Vec<ConnectionInfo>> {
    Json(app.registry.connections())
}

// DELETE /api/connections/{id} (fermeture forcée de la session d'un client)
async fn disconnect_client(State(app): State<AppState>, Path(id): Path<ClientId>) -> StatusCode {
    if app.registry.disconnect(&id) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

// GET /api/system/health
async fn get_system_health(State(app): State<AppState>) -> Json<CollectorHealth> {
    Json(app.health.get_health(&app.registry, &app.cache))
}

fn stale_after(app: &AppState) -> Duration {
    Duration::try_from(app.stream.idle_timeout).unwrap_or(Duration::seconds(90))
}
