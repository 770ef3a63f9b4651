/**
 * MODELS - Rapports de télémétrie envoyés par les agents
 *
 * RÔLE :
 * Décodage typé des rapports (CPU, RAM, disque, réseau...) et normalisation
 * avant stockage : le token est retiré, l'horodatage serveur est ajouté.
 *
 * FONCTIONNEMENT :
 * - `decode_report` = unique point de validation du schéma (erreur BadRequest)
 * - Sections connues typées, champs inconnus conservés dans `extra`
 * - `NormalizedReport` n'a pas de champ token : impossible de le fuiter
 */

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::fmt;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::IngestError;

/// Credential opaque d'un agent. Jamais affiché ni sérialisé.
#[derive(Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(transparent)]
pub struct Token(String);

impl Token {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Token(***)")
    }
}

/// Identité stable d'un agent (UUID attribué à la création du client)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(pub Uuid);

impl ClientId {
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

// Les valeurs flottantes restent des `Number` : 37 doit ressortir 37, pas 37.0
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpuReport {
    pub usage: Number,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpuReport {
    pub usage: Number,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Occupation d'une ressource en octets (ram, swap, disque)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageReport {
    pub total: u64,
    pub used: u64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadReport {
    pub load1: Number,
    pub load5: Number,
    pub load15: Number,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Débits instantanés (octets/s) et cumuls depuis le boot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkReport {
    pub up: u64,
    pub down: u64,
    #[serde(rename = "totalUp")]
    pub total_up: u64,
    #[serde(rename = "totalDown")]
    pub total_down: u64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionsReport {
    pub tcp: u64,
    pub udp: u64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Contenu métrique d'un rapport, commun au rapport brut et normalisé
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<CpuReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu: Option<GpuReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ram: Option<UsageReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub swap: Option<UsageReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load: Option<LoadReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk: Option<UsageReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<NetworkReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connections: Option<ConnectionsReport>,
    /// Uptime en secondes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uptime: Option<u64>,
    /// Nombre de processus
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Métriques non modélisées, conservées telles quelles
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Rapport tel que reçu d'un agent, avant normalisation
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Report {
    #[serde(default)]
    pub token: Option<Token>,
    #[serde(flatten)]
    pub metrics: Metrics,
}

/// Rapport stocké dans le cache et transmis à l'historique
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedReport {
    #[serde(flatten)]
    pub metrics: Metrics,
    #[serde(with = "time::serde::rfc3339")]
    pub time: OffsetDateTime,
}

impl Report {
    /// Retire le token et horodate le rapport avec l'heure serveur
    pub fn normalize(self, now: OffsetDateTime) -> NormalizedReport {
        let mut metrics = self.metrics;
        // `time` est réservé à l'horodatage serveur
        metrics.extra.remove("time");
        NormalizedReport { metrics, time: now }
    }

    /// Token présent et non vide
    pub fn take_token(&mut self) -> Option<Token> {
        self.token.take().filter(|t| !t.is_empty())
    }
}

/// Décode un payload JSON en rapport typé
pub fn decode_report(payload: &[u8]) -> Result<Report, IngestError> {
    serde_json::from_slice(payload)
        .map_err(|e| IngestError::BadRequest(format!("Invalid report: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::macros::datetime;

    fn sample() -> Value {
        json!({
            "token": "tok-1",
            "cpu": { "usage": 12.5 },
            "ram": { "total": 8192, "used": 4096 },
            "load": { "load1": 0.5, "load5": 0.25, "load15": 0.75 },
            "network": { "up": 10, "down": 20, "totalUp": 1000, "totalDown": 2000 },
            "uptime": 3600,
            "process": 212,
            "battery": { "level": 80 }
        })
    }

    #[test]
    fn test_decode_typed_sections() {
        let report = decode_report(sample().to_string().as_bytes()).unwrap();
        assert_eq!(report.token, Some(Token::new("tok-1")));
        assert_eq!(report.metrics.cpu.as_ref().and_then(|c| c.usage.as_f64()), Some(12.5));
        assert_eq!(report.metrics.ram.as_ref().map(|r| r.used), Some(4096));
        assert_eq!(report.metrics.network.as_ref().map(|n| n.total_down), Some(2000));
        assert_eq!(report.metrics.process, Some(212));
        assert_eq!(report.metrics.extra.get("battery"), Some(&json!({ "level": 80 })));
        assert!(!report.metrics.extra.contains_key("token"));
    }

    #[test]
    fn test_decode_rejects_wrong_types() {
        let bad_cpu = json!({ "cpu": { "usage": "high" } }).to_string();
        assert!(matches!(decode_report(bad_cpu.as_bytes()), Err(IngestError::BadRequest(_))));

        let bad_token = json!({ "token": 42 }).to_string();
        assert!(matches!(decode_report(bad_token.as_bytes()), Err(IngestError::BadRequest(_))));

        assert!(matches!(decode_report(b"[1, 2, 3]"), Err(IngestError::BadRequest(_))));
        assert!(matches!(decode_report(b"not json"), Err(IngestError::BadRequest(_))));
    }

    #[test]
    fn test_normalize_strips_token_and_sets_time() {
        let now = datetime!(2025-03-01 12:00:00 UTC);
        let report = decode_report(sample().to_string().as_bytes()).unwrap();
        let normalized = report.normalize(now);
        assert_eq!(normalized.time, now);

        let value = serde_json::to_value(&normalized).unwrap();
        let mut expected = sample();
        expected.as_object_mut().unwrap().remove("token");
        expected["time"] = json!("2025-03-01T12:00:00Z");
        assert_eq!(value, expected);
    }

    #[test]
    fn test_normalize_overrides_client_time() {
        let now = datetime!(2025-03-01 12:00:00 UTC);
        let payload = json!({ "token": "t", "time": "1999-01-01T00:00:00Z", "uptime": 5 });
        let normalized = decode_report(payload.to_string().as_bytes()).unwrap().normalize(now);
        let value = serde_json::to_value(&normalized).unwrap();
        assert_eq!(value, json!({ "uptime": 5, "time": "2025-03-01T12:00:00Z" }));
    }

    #[test]
    fn test_normalize_keeps_integer_numbers() {
        let now = datetime!(2025-03-01 12:00:00 UTC);
        let payload = json!({
            "token": "t",
            "cpu": { "usage": 37 },
            "gpu": { "usage": 0 },
            "load": { "load1": 1, "load5": 0, "load15": 2.5 }
        });
        let normalized = decode_report(payload.to_string().as_bytes()).unwrap().normalize(now);
        let value = serde_json::to_value(&normalized).unwrap();
        assert_eq!(
            value,
            json!({
                "cpu": { "usage": 37 },
                "gpu": { "usage": 0 },
                "load": { "load1": 1, "load5": 0, "load15": 2.5 },
                "time": "2025-03-01T12:00:00Z"
            })
        );
    }

    #[test]
    fn test_take_token_ignores_empty() {
        let mut report = decode_report(br#"{"token": ""}"#).unwrap();
        assert_eq!(report.take_token(), None);
        let mut report = decode_report(br#"{"token": "abc"}"#).unwrap();
        assert_eq!(report.take_token(), Some(Token::new("abc")));
        assert!(report.token.is_none());
    }

    #[test]
    fn test_token_debug_is_redacted() {
        let report = decode_report(br#"{"token": "super-secret"}"#).unwrap();
        assert!(!format!("{report:?}").contains("super-secret"));
    }
}
