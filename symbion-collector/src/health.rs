use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::cache::SnapshotCache;
use crate::registry::ConnectionRegistry;

#[derive(Debug, Serialize, Deserialize)]
pub struct CollectorHealth {
    pub uptime_seconds: u64,
    pub live_connections: usize,
    pub snapshots: usize,
    pub reports_accepted: u64,
    pub reports_rejected: u64,
    pub sessions_opened: u64,
    pub memory_usage_mb: f32,
}

#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    counters: Arc<Counters>,
}

#[derive(Default)]
struct Counters {
    reports_accepted: AtomicU64,
    reports_rejected: AtomicU64,
    sessions_opened: AtomicU64,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn report_accepted(&self) {
        self.counters.reports_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn report_rejected(&self) {
        self.counters.reports_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_opened(&self) {
        self.counters.sessions_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_health(&self, registry: &ConnectionRegistry, cache: &SnapshotCache) -> CollectorHealth {
        CollectorHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            live_connections: registry.len(),
            snapshots: cache.len(),
            reports_accepted: self.counters.reports_accepted.load(Ordering::Relaxed),
            reports_rejected: self.counters.reports_rejected.load(Ordering::Relaxed),
            sessions_opened: self.counters.sessions_opened.load(Ordering::Relaxed),
            memory_usage_mb: get_memory_usage_mb(),
        }
    }
}

fn get_memory_usage_mb() -> f32 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            let rss_kb = status
                .lines()
                .find(|line| line.starts_with("VmRSS:"))
                .and_then(|line| line.split_whitespace().nth(1))
                .and_then(|kb| kb.parse::<u64>().ok());
            if let Some(kb) = rss_kb {
                return kb as f32 / 1024.0;
            }
        }
    }

    // pas de /proc : inconnu
    0.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let health = HealthTracker::new();
        health.report_accepted();
        health.report_accepted();
        health.report_rejected();
        health.session_opened();

        let snapshot = health.get_health(&ConnectionRegistry::new(), &SnapshotCache::new());
        assert_eq!(snapshot.reports_accepted, 2);
        assert_eq!(snapshot.reports_rejected, 1);
        assert_eq!(snapshot.sessions_opened, 1);
        assert_eq!(snapshot.live_connections, 0);
        assert_eq!(snapshot.snapshots, 0);
    }
}
