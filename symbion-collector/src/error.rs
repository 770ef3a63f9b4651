use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::store::StoreError;

/// Erreurs du protocole d'ingestion (one-shot et streaming)
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Payload illisible ou ne respectant pas le schéma d'un rapport
    #[error("{0}")]
    BadRequest(String),
    /// Token absent ou inconnu de l'annuaire clients
    #[error("{0}")]
    Unauthorized(String),
    /// Une connexion streaming est déjà vivante pour ce token
    #[error("Token already in use")]
    Conflict,
    /// Échec d'un collaborateur (annuaire, historique)
    #[error("{0}")]
    Internal(String),
    #[error("transport error: {0}")]
    Transport(String),
}

impl IngestError {
    pub fn status(&self) -> StatusCode {
        match self {
            IngestError::BadRequest(_) => StatusCode::BAD_REQUEST,
            IngestError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            IngestError::Conflict => StatusCode::CONFLICT,
            IngestError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            IngestError::Transport(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Corps JSON renvoyé à l'agent, en réponse HTTP comme en frame WebSocket
    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            status: "error",
            error: self.to_string(),
        }
    }
}

impl From<StoreError> for IngestError {
    fn from(e: StoreError) -> Self {
        IngestError::Internal(e.to_string())
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub status: &'static str,
    pub error: String,
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.body())).into_response()
    }
}
