use std::sync::Arc;
use tracing::error;

use crate::error::IngestError;
use crate::models::{ClientId, Token};
use crate::store::ClientStore;

/// Résolution token -> identité, partagée par les chemins one-shot et streaming
#[derive(Clone)]
pub struct TokenResolver {
    store: Arc<dyn ClientStore>,
}

impl TokenResolver {
    pub fn new(store: Arc<dyn ClientStore>) -> Self {
        Self { store }
    }

    pub fn resolve(&self, token: &Token) -> Result<ClientId, IngestError> {
        if token.is_empty() {
            return Err(IngestError::Unauthorized("Token not provided".into()));
        }
        match self.store.resolve(token) {
            Ok(Some(client)) => Ok(client),
            Ok(None) => Err(IngestError::Unauthorized("Invalid token".into())),
            Err(e) => {
                error!(error = %e, "client store lookup failed");
                Err(e.into())
            }
        }
    }
}
