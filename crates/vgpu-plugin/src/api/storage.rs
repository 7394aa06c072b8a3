use std::sync::Arc;

use api_types::DeviceGroup;
use api_types::StatsSnapshot;
use chrono::DateTime;
use chrono::Utc;
use tokio::sync::RwLock;

/// Latest translated fingerprint
#[derive(Debug, Clone)]
pub struct FingerprintSnapshot {
    pub groups: Vec<DeviceGroup>,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Latest {
    fingerprint: Option<FingerprintSnapshot>,
    stats: Option<StatsSnapshot>,
}

/// Latest translated snapshots for API queries
#[derive(Debug, Clone, Default)]
pub struct SnapshotStorage {
    latest: Arc<RwLock<Latest>>,
}

impl SnapshotStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn update_fingerprint(&self, groups: Vec<DeviceGroup>) {
        self.latest.write().await.fingerprint = Some(FingerprintSnapshot {
            groups,
            received_at: Utc::now(),
        });
    }

    pub async fn update_stats(&self, stats: StatsSnapshot) {
        self.latest.write().await.stats = Some(stats);
    }

    pub async fn fingerprint(&self) -> Option<FingerprintSnapshot> {
        self.latest.read().await.fingerprint.clone()
    }

    pub async fn stats(&self) -> Option<StatsSnapshot> {
        self.latest.read().await.stats.clone()
    }
}
