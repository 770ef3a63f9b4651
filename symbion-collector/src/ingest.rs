use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::cache::SnapshotCache;
use crate::error::IngestError;
use crate::health::HealthTracker;
use crate::models::{ClientId, Report, Token};
use crate::resolver::TokenResolver;
use crate::store::HistorySink;

/// Étape d'acceptation commune aux deux chemins d'ingestion :
/// résolution du token, normalisation, historique puis snapshot.
#[derive(Clone)]
pub struct Ingestor {
    resolver: TokenResolver,
    cache: SnapshotCache,
    history: Arc<dyn HistorySink>,
    health: HealthTracker,
}

impl Ingestor {
    pub fn new(
        resolver: TokenResolver,
        cache: SnapshotCache,
        history: Arc<dyn HistorySink>,
        health: HealthTracker,
    ) -> Self {
        Self { resolver, cache, history, health }
    }

    pub fn resolver(&self) -> &TokenResolver {
        &self.resolver
    }

    /// Accepte un rapport déjà décodé pour `token`.
    /// Le snapshot n'est mis à jour qu'après l'écriture dans l'historique.
    pub fn accept(&self, token: &Token, report: Report) -> Result<ClientId, IngestError> {
        let result = self.store(token, report);
        match &result {
            Ok(_) => self.health.report_accepted(),
            Err(_) => self.health.report_rejected(),
        }
        result
    }

    fn store(&self, token: &Token, report: Report) -> Result<ClientId, IngestError> {
        let client = self.resolver.resolve(token)?;
        let normalized = report.normalize(OffsetDateTime::now_utc());

        if let Err(e) = self.history.persist(client, &normalized) {
            warn!(client = %client, error = %e, "history write failed, snapshot left unchanged");
            return Err(e.into());
        }
        self.cache.set(client, normalized);
        debug!(client = %client, "report accepted");
        Ok(client)
    }
}
