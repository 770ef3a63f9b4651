/**
 * STREAM - Ingestion des rapports en streaming (WebSocket)
 *
 * RÔLE :
 * Un agent garde une connexion ouverte et pousse un rapport JSON par message.
 * Le serveur n'envoie jamais de rapport, uniquement des frames d'erreur.
 *
 * MACHINE À ÉTATS :
 * Handshaking -> Authenticating -> Registering -> Active -> Closing -> Closed
 * - Handshaking   : requête non-upgrade = 400 "Require WebSocket upgrade"
 * - Authenticating: token en query `?token=`, sinon champ `token` du 1er message
 * - Registering   : une seule connexion vivante par token (sinon "Token already in use")
 * - Active        : décodage + ingestion de chaque message, ping périodique,
 *                   fermeture si rien reçu pendant `idle_timeout`
 * - Closing       : frame Close best-effort ; le guard du registre désenregistre
 *                   le token quelle que soit la cause de sortie
 */

use axum::body::Bytes;
use axum::extract::rejection::QueryRejection;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::IngestError;
use crate::http::AppState;
use crate::models::{decode_report, ClientId, Token};
use crate::registry::ConnectionHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSettings {
    /// Fermeture si aucune frame reçue pendant ce délai
    pub idle_timeout: Duration,
    /// Intervalle des pings serveur
    pub heartbeat_interval: Duration,
    /// Délai max d'une écriture sur le socket
    pub write_timeout: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(90),
            heartbeat_interval: Duration::from_secs(30),
            write_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StreamParams {
    pub token: Option<String>,
}

/// Cause de sortie de l'état Active
#[derive(Debug)]
enum CloseReason {
    PeerClosed,
    ReadFailed(String),
    WriteFailed(IngestError),
    Idle,
    Disconnected,
    /// Erreur à signaler à l'agent avant de fermer
    Rejected(IngestError),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::PeerClosed => f.write_str("peer closed"),
            CloseReason::ReadFailed(e) => write!(f, "read failed: {e}"),
            CloseReason::WriteFailed(e) => write!(f, "write failed: {e}"),
            CloseReason::Idle => f.write_str("idle timeout"),
            CloseReason::Disconnected => f.write_str("disconnected by admin"),
            CloseReason::Rejected(e) => write!(f, "rejected: {e}"),
        }
    }
}

// GET /api/clients/report (upgrade WebSocket)
pub async fn report_ws(
    State(app): State<AppState>,
    params: Result<Query<StreamParams>, QueryRejection>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let Query(params) = match params {
        Ok(params) => params,
        Err(rejection) => {
            debug!(reason = %rejection, "report stream with invalid query");
            return IngestError::BadRequest(format!("Invalid query: {}", rejection.body_text())).into_response();
        }
    };
    let ws = match upgrade {
        Ok(ws) => ws,
        Err(rejection) => {
            debug!(reason = %rejection, "report stream without websocket upgrade");
            return IngestError::BadRequest("Require WebSocket upgrade".into()).into_response();
        }
    };

    let token = params.token.filter(|t| !t.is_empty()).map(Token::new);
    ws.on_failed_upgrade(|e| warn!(error = %e, "websocket upgrade failed"))
        .on_upgrade(move |socket| run_session(socket, app, token))
}

async fn run_session(mut socket: WebSocket, app: AppState, query_token: Option<Token>) {
    let settings = app.stream;

    // Authenticating
    let token = match query_token {
        Some(token) => token,
        None => match read_auth_token(&mut socket, &settings).await {
            Ok(token) => token,
            Err(e) => return reject(socket, &settings, e).await,
        },
    };
    let client = match app.ingestor.resolver().resolve(&token) {
        Ok(client) => client,
        Err(e) => return reject(socket, &settings, e).await,
    };

    // Registering
    let handle = ConnectionHandle::new(client);
    let close_signal = handle.close_signal();
    let registration = match app.registry.register(token.clone(), handle) {
        Ok(registration) => registration,
        Err(e) => {
            warn!(client = %client, "streaming connection rejected, token already connected");
            return reject(socket, &settings, e).await;
        }
    };
    app.health.session_opened();
    info!(client = %client, conn = %registration.id(), "report stream active");

    // Active
    let reason = active(&mut socket, &app, &token, client, &close_signal).await;

    // Closing
    if let CloseReason::Rejected(e) = &reason {
        let _ = send_error(&mut socket, &settings, e).await;
    }
    if !matches!(reason, CloseReason::PeerClosed | CloseReason::WriteFailed(_)) {
        let _ = send_frame(&mut socket, &settings, Message::Close(None)).await;
    }
    info!(client = %client, conn = %registration.id(), reason = %reason, "report stream closed");
    drop(socket);
    drop(registration);
}

/// Boucle de l'état Active ; retourne la cause de sortie
async fn active(
    socket: &mut WebSocket,
    app: &AppState,
    token: &Token,
    client: ClientId,
    close_signal: &Notify,
) -> CloseReason {
    let settings = app.stream;
    let mut heartbeat = time::interval_at(Instant::now() + settings.heartbeat_interval, settings.heartbeat_interval);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_seen = Instant::now();

    loop {
        tokio::select! {
            _ = close_signal.notified() => return CloseReason::Disconnected,
            _ = time::sleep_until(last_seen + settings.idle_timeout) => return CloseReason::Idle,
            _ = heartbeat.tick() => {
                if let Err(e) = send_frame(socket, &settings, Message::Ping(Bytes::new())).await {
                    return CloseReason::WriteFailed(e);
                }
            }
            inbound = socket.recv() => {
                let message = match inbound {
                    None => return CloseReason::PeerClosed,
                    Some(Err(e)) => return CloseReason::ReadFailed(e.to_string()),
                    Some(Ok(message)) => message,
                };
                last_seen = Instant::now();

                let decoded = match message {
                    Message::Text(text) => decode_report(text.as_str().as_bytes()),
                    Message::Binary(data) => decode_report(&data),
                    Message::Ping(_) | Message::Pong(_) => continue,
                    Message::Close(_) => return CloseReason::PeerClosed,
                };
                let mut report = match decoded {
                    Ok(report) => report,
                    Err(e) => {
                        app.health.report_rejected();
                        return CloseReason::Rejected(e);
                    }
                };
                if report.take_token().is_some_and(|sent| &sent != token) {
                    app.health.report_rejected();
                    return CloseReason::Rejected(IngestError::Unauthorized("Token mismatch".into()));
                }

                match app.ingestor.accept(token, report) {
                    Ok(_) => {}
                    // panne de l'historique : on le signale mais la session continue
                    Err(e @ IngestError::Internal(_)) => {
                        if let Err(write_err) = send_error(socket, &settings, &e).await {
                            return CloseReason::WriteFailed(write_err);
                        }
                    }
                    Err(e) => {
                        debug!(client = %client, error = %e, "report refused on active stream");
                        return CloseReason::Rejected(e);
                    }
                }
            }
        }
    }
}

/// Lit le premier message et en extrait le token
async fn read_auth_token(socket: &mut WebSocket, settings: &StreamSettings) -> Result<Token, IngestError> {
    let deadline = Instant::now() + settings.idle_timeout;
    loop {
        let inbound = time::timeout_at(deadline, socket.recv())
            .await
            .map_err(|_| IngestError::Unauthorized("Token not provided".into()))?;
        let mut report = match inbound {
            None | Some(Ok(Message::Close(_))) => {
                return Err(IngestError::Transport("closed before authentication".into()))
            }
            Some(Err(e)) => return Err(IngestError::Transport(e.to_string())),
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(Message::Text(text))) => decode_report(text.as_str().as_bytes())?,
            Some(Ok(Message::Binary(data))) => decode_report(&data)?,
        };
        return report
            .take_token()
            .ok_or_else(|| IngestError::Unauthorized("Token not provided".into()));
    }
}

/// Refus avant l'état Active : frame d'erreur puis fermeture, aucun enregistrement
async fn reject(mut socket: WebSocket, settings: &StreamSettings, error: IngestError) {
    debug!(error = %error, "report stream refused");
    if matches!(error, IngestError::Transport(_)) {
        return;
    }
    if send_error(&mut socket, settings, &error).await.is_ok() {
        let _ = send_frame(&mut socket, settings, Message::Close(None)).await;
    }
}

async fn send_error(socket: &mut WebSocket, settings: &StreamSettings, error: &IngestError) -> Result<(), IngestError> {
    let payload = serde_json::to_string(&error.body())
        .map_err(|e| IngestError::Internal(e.to_string()))?;
    send_frame(socket, settings, Message::Text(payload.into())).await
}

async fn send_frame(socket: &mut WebSocket, settings: &StreamSettings, message: Message) -> Result<(), IngestError> {
    match time::timeout(settings.write_timeout, socket.send(message)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(IngestError::Transport(e.to_string())),
        Err(_) => Err(IngestError::Transport("write timed out".into())),
    }
}
