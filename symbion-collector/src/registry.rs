/**
 * CONNECTION REGISTRY - Sessions streaming vivantes, une seule par token
 *
 * RÔLE :
 * Garantit qu'un token ne pilote qu'une connexion WebSocket à la fois.
 *
 * FONCTIONNEMENT :
 * - `register` vérifie l'absence et insère sous un seul verrou
 * - Le `Registration` retourné désenregistre au drop, quel que soit le chemin
 *   de sortie de la session (erreur, fermeture, panic)
 * - Un guard ne retire jamais l'entrée d'une connexion plus récente
 * - `disconnect` permet à l'admin de fermer la session d'un client
 */

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::error::IngestError;
use crate::models::{ClientId, Token};

/// Vérification et insertion sous le même verrou, jamais tenu à travers un `.await`
type Connections = Arc<Mutex<HashMap<Token, ConnectionHandle>>>;

/// Entrée du registre pour une connexion vivante
#[derive(Debug)]
pub struct ConnectionHandle {
    id: Uuid,
    client: ClientId,
    connected_at: OffsetDateTime,
    close: Arc<Notify>,
}

impl ConnectionHandle {
    pub fn new(client: ClientId) -> Self {
        Self {
            id: Uuid::new_v4(),
            client,
            connected_at: OffsetDateTime::now_utc(),
            close: Arc::new(Notify::new()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Signal déclenché par `ConnectionRegistry::disconnect`
    pub fn close_signal(&self) -> Arc<Notify> {
        self.close.clone()
    }

    fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            connection_id: self.id,
            client: self.client,
            connected_at: self.connected_at,
        }
    }
}

/// Vue diagnostic d'une connexion (sans le token)
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub connection_id: Uuid,
    pub client: ClientId,
    #[serde(with = "time::serde::rfc3339")]
    pub connected_at: OffsetDateTime,
}

#[derive(Clone)]
pub struct ConnectionRegistry {
    connections: Connections,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Enregistre la connexion si aucune n'est vivante pour ce token
    pub fn register(&self, token: Token, handle: ConnectionHandle) -> Result<Registration, IngestError> {
        let mut connections = self.connections.lock();
        match connections.entry(token) {
            Entry::Occupied(_) => Err(IngestError::Conflict),
            Entry::Vacant(slot) => {
                let registration = Registration {
                    registry: self.clone(),
                    token: slot.key().clone(),
                    id: handle.id,
                };
                slot.insert(handle);
                Ok(registration)
            }
        }
    }

    /// Retire l'entrée du token ; sans effet si elle n'existe plus
    pub fn unregister(&self, token: &Token) -> bool {
        self.connections.lock().remove(token).is_some()
    }

    fn release(&self, token: &Token, id: Uuid) {
        let mut connections = self.connections.lock();
        if connections.get(token).is_some_and(|h| h.id == id) {
            connections.remove(token);
        }
    }

    /// Diagnostic uniquement : ne pas s'en servir pour décider d'un enregistrement
    pub fn is_registered(&self, token: &Token) -> bool {
        self.connections.lock().contains_key(token)
    }

    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn connections(&self) -> Vec<ConnectionInfo> {
        self.connections.lock().values().map(ConnectionHandle::info).collect()
    }

    /// Demande la fermeture de la session du client ; elle se désenregistre en sortant
    pub fn disconnect(&self, client: &ClientId) -> bool {
        let connections = self.connections.lock();
        let mut found = false;
        for handle in connections.values().filter(|h| &h.client == client) {
            handle.close.notify_one();
            found = true;
        }
        found
    }
}

/// Guard d'une connexion enregistrée ; désenregistre au drop
pub struct Registration {
    registry: ConnectionRegistry,
    token: Token,
    id: Uuid,
}

impl Registration {
    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.release(&self.token, self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    #[test]
    fn test_second_register_conflicts() {
        let registry = ConnectionRegistry::new();
        let token = Token::new("tok");
        let first = registry
            .register(token.clone(), ConnectionHandle::new(ClientId::new_v4()))
            .unwrap();
        let second = registry.register(token.clone(), ConnectionHandle::new(ClientId::new_v4()));
        assert!(matches!(second, Err(IngestError::Conflict)));
        assert_eq!(registry.len(), 1);

        // le rejet ne touche pas la connexion existante
        assert_eq!(registry.connections()[0].connection_id, first.id());
    }

    #[test]
    fn test_registration_drop_unregisters() {
        let registry = ConnectionRegistry::new();
        let token = Token::new("tok");
        {
            let _registration = registry
                .register(token.clone(), ConnectionHandle::new(ClientId::new_v4()))
                .unwrap();
            assert!(registry.is_registered(&token));
        }
        assert!(!registry.is_registered(&token));
        assert!(registry.register(token, ConnectionHandle::new(ClientId::new_v4())).is_ok());
    }

    #[test]
    fn test_stale_guard_keeps_newer_entry() {
        let registry = ConnectionRegistry::new();
        let token = Token::new("tok");
        let old = registry
            .register(token.clone(), ConnectionHandle::new(ClientId::new_v4()))
            .unwrap();
        assert!(registry.unregister(&token));
        let newer = registry
            .register(token.clone(), ConnectionHandle::new(ClientId::new_v4()))
            .unwrap();

        drop(old);
        assert!(registry.is_registered(&token));
        drop(newer);
        assert!(!registry.is_registered(&token));
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let token = Token::new("tok");
        assert!(!registry.unregister(&token));
        let registration = registry
            .register(token.clone(), ConnectionHandle::new(ClientId::new_v4()))
            .unwrap();
        assert!(registry.unregister(&token));
        assert!(!registry.unregister(&token));
        drop(registration);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_concurrent_register_single_winner() {
        let registry = ConnectionRegistry::new();
        let barrier = Arc::new(Barrier::new(16));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = registry.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    registry
                        .register(Token::new("shared"), ConnectionHandle::new(ClientId::new_v4()))
                        .ok()
                })
            })
            .collect();

        let winners: Vec<Registration> = handles
            .into_iter()
            .filter_map(|h| h.join().unwrap())
            .collect();
        assert_eq!(winners.len(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_signals_session() {
        let registry = ConnectionRegistry::new();
        let client = ClientId::new_v4();
        let handle = ConnectionHandle::new(client);
        let close = handle.close_signal();
        let _registration = registry.register(Token::new("tok"), handle).unwrap();

        assert!(registry.disconnect(&client));
        assert!(!registry.disconnect(&ClientId::new_v4()));
        tokio::time::timeout(std::time::Duration::from_secs(1), close.notified())
            .await
            .expect("close signal not delivered");
    }
}
