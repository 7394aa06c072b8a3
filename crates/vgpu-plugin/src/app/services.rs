use std::sync::Arc;

use crate::api::SnapshotStorage;
use crate::domain::VgpuPlugin;

/// Application dependencies
pub struct ApplicationServices<S> {
    pub plugin: Arc<VgpuPlugin<S>>,
    pub storage: SnapshotStorage,
}
