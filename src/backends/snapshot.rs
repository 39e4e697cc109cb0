//! Snapshot Engine Adapter

use super::{CallLog, FaultInjector};
use crate::crd::v1beta1::VMSnapshot;
use crate::domain::ports::{ObjectKey, SnapshotBackend};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use tracing::info;

const BACKEND: &str = "snapshot-engine";

/// Tracked snapshot content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotContent {
    pub source: ObjectKey,
    pub disks: Vec<String>,
}

/// Adapter recording snapshot contents
#[derive(Default)]
pub struct SnapshotEngineAdapter {
    contents: RwLock<BTreeMap<ObjectKey, SnapshotContent>>,
    calls: CallLog,
    faults: FaultInjector,
}

impl SnapshotEngineAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> &CallLog {
        &self.calls
    }

    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    pub async fn content(&self, key: &ObjectKey) -> Option<SnapshotContent> {
        self.contents.read().await.get(key).cloned()
    }
}

#[async_trait]
impl SnapshotBackend for SnapshotEngineAdapter {
    async fn sync(&self, snapshot: &VMSnapshot) -> Result<()> {
        self.calls.record("sync");
        self.faults.check(BACKEND, "sync")?;

        let key = ObjectKey::of(snapshot);
        let source = &snapshot.spec.source_ref;
        let content = SnapshotContent {
            source: ObjectKey::new(source.namespace.clone(), source.name.clone()),
            disks: snapshot.spec.included_disks.clone(),
        };

        let mut contents = self.contents.write().await;
        if contents.get(&key) != Some(&content) {
            info!("Capturing snapshot {} of {} ({} disks)", key, content.source, content.disks.len());
            contents.insert(key, content);
        }
        Ok(())
    }

    async fn delete(&self, snapshot: &VMSnapshot) -> Result<()> {
        self.calls.record("delete");
        self.faults.check(BACKEND, "delete")?;

        let key = ObjectKey::of(snapshot);
        if self.contents.write().await.remove(&key).is_some() {
            info!("Deleted snapshot content {}", key);
        }
        Ok(())
    }

    fn backend_name(&self) -> &str {
        BACKEND
    }
}
