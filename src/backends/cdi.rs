//! CDI Volume Adapter
//!
//! Provisions DataVolumes behind VM disk attachments. Volumes are recorded
//! against the VM that asked for them so teardown can delete exactly the
//! volumes a VM owns.

use super::{CallLog, FaultInjector};
use crate::crd::v1beta1::{VirtualMachine, VirtualMachineDisk};
use crate::domain::ports::{ObjectKey, VolumeBackend};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::RwLock;
use tracing::{debug, info};

const BACKEND: &str = "cdi";

/// Configuration for the CDI adapter
#[derive(Debug, Clone)]
pub struct CdiConfig {
    /// Prefix of generated DataVolume names
    pub volume_prefix: String,
}

impl Default for CdiConfig {
    fn default() -> Self {
        Self {
            volume_prefix: "dv".to_string(),
        }
    }
}

/// Adapter for CDI DataVolumes
pub struct CdiVolumeAdapter {
    config: CdiConfig,
    /// Owner VM -> DataVolume names
    volumes: RwLock<BTreeMap<ObjectKey, BTreeSet<String>>>,
    calls: CallLog,
    faults: FaultInjector,
}

impl CdiVolumeAdapter {
    pub fn new(config: CdiConfig) -> Self {
        Self {
            config,
            volumes: RwLock::new(BTreeMap::new()),
            calls: CallLog::default(),
            faults: FaultInjector::default(),
        }
    }

    pub fn calls(&self) -> &CallLog {
        &self.calls
    }

    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    /// DataVolumes currently owned by a VM
    pub async fn owned_volumes(&self, owner: &ObjectKey) -> Vec<String> {
        self.volumes
            .read()
            .await
            .get(owner)
            .map(|v| v.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn volume_name(&self, vm: &VirtualMachine, disk: &VirtualMachineDisk) -> String {
        format!(
            "{}-{}-{}",
            self.config.volume_prefix,
            vm.metadata.name.as_deref().unwrap_or_default(),
            disk.disk_ref.name
        )
    }
}

#[async_trait]
impl VolumeBackend for CdiVolumeAdapter {
    async fn ensure_volume(&self, vm: &VirtualMachine, disk: &VirtualMachineDisk) -> Result<()> {
        self.calls.record("ensure_volume");
        self.faults.check(BACKEND, "ensure_volume")?;

        let owner = ObjectKey::of(vm);
        let name = self.volume_name(vm, disk);
        let mut volumes = self.volumes.write().await;

        if volumes.entry(owner.clone()).or_default().insert(name.clone()) {
            info!("Provisioned DataVolume {} for {} ({} disk)", name, owner, disk.r#type);
        } else {
            debug!("DataVolume {} for {} already exists", name, owner);
        }
        Ok(())
    }

    async fn delete_owned_volumes(&self, vm: &VirtualMachine) -> Result<()> {
        self.calls.record("delete_owned_volumes");
        self.faults.check(BACKEND, "delete_owned_volumes")?;

        let owner = ObjectKey::of(vm);
        if let Some(removed) = self.volumes.write().await.remove(&owner) {
            info!("Deleted {} DataVolumes owned by {}", removed.len(), owner);
        }
        Ok(())
    }

    fn backend_name(&self) -> &str {
        BACKEND
    }
}
