//! Symbion Collector - ingestion de la télémétrie des agents
//!
//! Les agents poussent leurs rapports système soit en one-shot (HTTP POST),
//! soit sur une connexion WebSocket longue durée. Le collecteur résout le
//! token de l'agent, n'autorise qu'une connexion streaming par token, garde
//! le dernier rapport de chaque client pour le dashboard et transmet chaque
//! rapport accepté à l'historique.

pub mod cache;
pub mod config;
pub mod error;
pub mod health;
pub mod http;
pub mod ingest;
pub mod models;
pub mod registry;
pub mod resolver;
pub mod store;
pub mod stream;

pub use crate::error::IngestError;
pub use crate::http::{build_router, AppState};
pub use crate::models::{ClientId, NormalizedReport, Report, Token};
