use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::models::{ClientId, NormalizedReport};

/// Dernier rapport normalisé par client, lu par le dashboard.
/// Last-writer-wins, pas d'expiration : la fraîcheur se lit dans `time`.
/// Un seul écrivain par rapport, lectures concurrentes côté dashboard.
#[derive(Clone)]
pub struct SnapshotCache {
    snapshots: Arc<RwLock<HashMap<ClientId, NormalizedReport>>>,
}

impl Default for SnapshotCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotCache {
    pub fn new() -> Self {
        Self {
            snapshots: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn set(&self, client: ClientId, report: NormalizedReport) {
        self.snapshots.write().insert(client, report);
    }

    pub fn get(&self, client: &ClientId) -> Option<NormalizedReport> {
        self.snapshots.read().get(client).cloned()
    }

    pub fn all(&self) -> Vec<(ClientId, NormalizedReport)> {
        self.snapshots
            .read()
            .iter()
            .map(|(id, report)| (*id, report.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.snapshots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
