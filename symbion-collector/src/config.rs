use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{info, warn};

use crate::stream::StreamSettings;

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct CollectorConfig {
    pub listen: SocketAddr,
    pub clients_file: PathBuf,
    pub history_file: PathBuf,
    pub stream: StreamConf,
}

/// Délais des connexions streaming, en secondes
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct StreamConf {
    pub idle_timeout_secs: u64,
    pub heartbeat_interval_secs: u64,
    pub write_timeout_secs: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 25774)),
            clients_file: "./data/clients.json".into(),
            history_file: "./data/history.jsonl".into(),
            stream: StreamConf::default(),
        }
    }
}

impl Default for StreamConf {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 90,
            heartbeat_interval_secs: 30,
            write_timeout_secs: 10,
        }
    }
}

impl StreamConf {
    /// Convertit en durées ; une valeur à 0 reprend la valeur par défaut
    pub fn settings(&self) -> StreamSettings {
        let defaults = StreamConf::default();
        let pick = |value: u64, default: u64, name: &str| {
            if value == 0 {
                warn!("[config] stream.{name} must be > 0, using {default}s");
                Duration::from_secs(default)
            } else {
                Duration::from_secs(value)
            }
        };
        StreamSettings {
            idle_timeout: pick(self.idle_timeout_secs, defaults.idle_timeout_secs, "idle_timeout_secs"),
            heartbeat_interval: pick(
                self.heartbeat_interval_secs,
                defaults.heartbeat_interval_secs,
                "heartbeat_interval_secs",
            ),
            write_timeout: pick(self.write_timeout_secs, defaults.write_timeout_secs, "write_timeout_secs"),
        }
    }
}

pub fn parse_config(txt: &str) -> Result<CollectorConfig, serde_yaml::Error> {
    if txt.trim().is_empty() {
        return Ok(CollectorConfig::default());
    }
    serde_yaml::from_str(txt)
}

pub async fn load_config() -> CollectorConfig {
    let path = std::env::var("SYMBION_COLLECTOR_CONFIG").unwrap_or_else(|_| "collector.yaml".into());
    let mut cfg = if Path::new(&path).exists() {
        let txt = fs::read_to_string(&path).await.unwrap_or_default();
        parse_config(&txt).unwrap_or_else(|e| {
            warn!("[config] invalid {path}: {e}, using defaults");
            CollectorConfig::default()
        })
    } else {
        info!("[config] no {path}, using defaults");
        CollectorConfig::default()
    };

    if let Ok(listen) = std::env::var("SYMBION_COLLECTOR_LISTEN") {
        match listen.parse() {
            Ok(addr) => cfg.listen = addr,
            Err(e) => warn!("[config] ignoring SYMBION_COLLECTOR_LISTEN={listen}: {e}"),
        }
    }
    cfg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_partial_yaml() {
        let cfg = parse_config(
            "listen: 127.0.0.1:9000\nstream:\n  idle_timeout_secs: 45\n",
        )
        .unwrap();
        assert_eq!(cfg.listen, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(cfg.stream.idle_timeout_secs, 45);
        assert_eq!(cfg.stream.heartbeat_interval_secs, 30);
        assert_eq!(cfg.history_file, PathBuf::from("./data/history.jsonl"));
    }

    #[test]
    fn test_empty_yaml_is_default() {
        let cfg = parse_config("  \n").unwrap();
        assert_eq!(cfg.listen.port(), 25774);
    }

    #[test]
    fn test_invalid_yaml_is_error() {
        assert!(parse_config("listen: [not, an, addr]").is_err());
    }

    #[test]
    fn test_zero_durations_fall_back() {
        let conf = StreamConf {
            idle_timeout_secs: 0,
            heartbeat_interval_secs: 5,
            write_timeout_secs: 0,
        };
        let settings = conf.settings();
        assert_eq!(settings.idle_timeout, Duration::from_secs(90));
        assert_eq!(settings.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(settings.write_timeout, Duration::from_secs(10));
    }
}
