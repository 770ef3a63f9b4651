/**
 * STORES - Collaborateurs externes du collecteur
 *
 * RÔLE :
 * Interfaces vers l'annuaire clients (token -> identité) et vers l'historique
 * durable des rapports. Le cœur d'ingestion ne connaît que ces traits.
 *
 * IMPLÉMENTATIONS :
 * - ClientDirectory : annuaire chargé depuis un fichier JSON (data/clients.json)
 * - JsonlHistorySink : une ligne JSON par rapport accepté (data/history.jsonl)
 * - MemoryHistory : historique en mémoire, pratique pour les tests
 */

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

use crate::models::{ClientId, NormalizedReport, Token};

/// Erreurs possibles des collaborateurs de stockage
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Recherche de l'identité d'un client à partir de son token
pub trait ClientStore: Send + Sync {
    fn resolve(&self, token: &Token) -> Result<Option<ClientId>, StoreError>;
}

/// Persistance durable de chaque rapport accepté
pub trait HistorySink: Send + Sync {
    fn persist(&self, client: ClientId, report: &NormalizedReport) -> Result<(), StoreError>;
}

/// Entrée du fichier clients
#[derive(Debug, Clone, Deserialize)]
pub struct ClientRecord {
    pub uuid: ClientId,
    pub token: Token,
    #[serde(default)]
    pub name: Option<String>,
}

/// Annuaire clients en mémoire
#[derive(Default)]
pub struct ClientDirectory {
    clients: RwLock<HashMap<Token, ClientId>>,
}

impl ClientDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Charge l'annuaire depuis un fichier JSON `[{uuid, token, name}]`.
    /// Fichier absent = annuaire vide.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let directory = Self::new();
        if !path.exists() {
            warn!(path = %path.display(), "no clients file, starting with an empty directory");
            return Ok(directory);
        }

        let content = fs::read_to_string(path)?;
        let records: Vec<ClientRecord> = serde_json::from_str(&content)?;
        for record in records {
            if record.token.is_empty() {
                warn!(client = %record.uuid, "skipping client with empty token");
                continue;
            }
            debug!(client = %record.uuid, name = record.name.as_deref().unwrap_or("-"), "client registered");
            directory.insert(record.token, record.uuid);
        }
        info!(path = %path.display(), clients = directory.len(), "client directory loaded");
        Ok(directory)
    }

    pub fn insert(&self, token: Token, client: ClientId) {
        self.clients.write().insert(token, client);
    }

    /// Révoque un token ; les sessions streaming en cours échoueront au prochain rapport
    #[cfg(test)]
    pub fn revoke(&self, token: &Token) -> bool {
        self.clients.write().remove(token).is_some()
    }

    pub fn len(&self) -> usize {
        self.clients.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ClientStore for ClientDirectory {
    fn resolve(&self, token: &Token) -> Result<Option<ClientId>, StoreError> {
        Ok(self.clients.read().get(token).copied())
    }
}

#[derive(Serialize)]
struct HistoryLine<'a> {
    client: ClientId,
    report: &'a NormalizedReport,
}

/// Historique append-only au format JSON lines
pub struct JsonlHistorySink {
    file: Mutex<File>,
}

impl JsonlHistorySink {
    pub fn open<P: Into<PathBuf>>(path: P) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        info!(path = %path.display(), "history sink opened");
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl HistorySink for JsonlHistorySink {
    fn persist(&self, client: ClientId, report: &NormalizedReport) -> Result<(), StoreError> {
        let mut line = serde_json::to_vec(&HistoryLine { client, report })?;
        line.push(b'\n');

        // une ligne complète par écriture, sous le verrou
        let mut file = self.file.lock();
        file.write_all(&line)?;
        file.flush()?;
        Ok(())
    }
}

/// Historique en mémoire, avec panne simulable
#[derive(Default)]
pub struct MemoryHistory {
    records: Mutex<Vec<(ClientId, NormalizedReport)>>,
    failing: AtomicBool,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    pub fn records(&self) -> Vec<(ClientId, NormalizedReport)> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl HistorySink for MemoryHistory {
    fn persist(&self, client: ClientId, report: &NormalizedReport) -> Result<(), StoreError> {
        if self.failing.load(Ordering::Relaxed) {
            return Err(StoreError::Unavailable("history store offline".into()));
        }
        self.records.lock().push((client, report.clone()));
        Ok(())
    }
}
