//! KubeVirt VM Instance Adapter
//!
//! Tracks the backend VirtualMachine instance for each operator VM and its
//! power state.

use super::{CallLog, FaultInjector};
use crate::crd::v1beta1::VirtualMachine;
use crate::crd::PowerState;
use crate::domain::ports::{ObjectKey, VmInstanceBackend};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use tracing::{debug, info};

const BACKEND: &str = "kubevirt";

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the KubeVirt adapter
#[derive(Debug, Clone)]
pub struct KubeVirtConfig {
    /// Run strategy stamped on created instances
    pub run_strategy: String,
}

impl Default for KubeVirtConfig {
    fn default() -> Self {
        Self {
            run_strategy: "Manual".to_string(),
        }
    }
}

// =============================================================================
// Instance State
// =============================================================================

/// Tracked backend instance
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceState {
    pub cpu: String,
    pub memory: String,
    pub disks: usize,
    pub nets: usize,
    pub run_strategy: String,
    /// `None` until the first power call
    pub power: Option<PowerState>,
}

// =============================================================================
// KubeVirt Adapter
// =============================================================================

/// Adapter for KubeVirt VirtualMachine instances
pub struct KubeVirtAdapter {
    config: KubeVirtConfig,
    instances: RwLock<BTreeMap<ObjectKey, InstanceState>>,
    calls: CallLog,
    faults: FaultInjector,
}

impl KubeVirtAdapter {
    pub fn new(config: KubeVirtConfig) -> Self {
        Self {
            config,
            instances: RwLock::new(BTreeMap::new()),
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

    pub async fn instance(&self, key: &ObjectKey) -> Option<InstanceState> {
        self.instances.read().await.get(key).cloned()
    }

    pub async fn instance_count(&self) -> usize {
        self.instances.read().await.len()
    }

    /// Record the call and apply any injected failure
    fn begin(&self, operation: &str) -> Result<()> {
        self.calls.record(operation);
        self.faults.check(BACKEND, operation)
    }

    async fn set_power(&self, vm: &VirtualMachine, power: PowerState) -> Result<()> {
        let key = ObjectKey::of(vm);
        let mut instances = self.instances.write().await;
        let instance = instances.get_mut(&key).ok_or_else(|| {
            Error::backend(BACKEND, "power", format!("instance {} does not exist", key))
        })?;

        info!("Setting KubeVirt instance {} power to {}", key, power);
        instance.power = Some(power);
        Ok(())
    }
}

#[async_trait]
impl VmInstanceBackend for KubeVirtAdapter {
    async fn ensure_instance(&self, vm: &VirtualMachine) -> Result<()> {
        self.begin("ensure_instance")?;
        let key = ObjectKey::of(vm);

        let mut instances = self.instances.write().await;
        let power = instances.get(&key).and_then(|i| i.power);
        let desired = InstanceState {
            cpu: vm.spec.cpu.clone(),
            memory: vm.spec.memory.clone(),
            disks: vm.spec.disks.len(),
            nets: vm.spec.nets.len(),
            run_strategy: self.config.run_strategy.clone(),
            power,
        };

        match instances.get(&key) {
            Some(existing) if *existing == desired => {
                debug!("KubeVirt instance {} already up to date", key);
            }
            Some(_) => {
                info!("Updating KubeVirt instance {}", key);
                instances.insert(key, desired);
            }
            None => {
                info!("Creating KubeVirt instance {} ({} vCPU, {})", key, desired.cpu, desired.memory);
                instances.insert(key, desired);
            }
        }
        Ok(())
    }

    async fn power_on(&self, vm: &VirtualMachine) -> Result<()> {
        self.begin("power_on")?;
        self.set_power(vm, PowerState::Running).await
    }

    async fn power_off(&self, vm: &VirtualMachine) -> Result<()> {
        self.begin("power_off")?;
        self.set_power(vm, PowerState::Stopped).await
    }

    async fn cleanup(&self, vm: &VirtualMachine) -> Result<()> {
        self.begin("cleanup")?;
        let key = ObjectKey::of(vm);

        if self.instances.write().await.remove(&key).is_some() {
            info!("Deleted KubeVirt instance {}", key);
        } else {
            debug!("KubeVirt instance {} already gone", key);
        }
        Ok(())
    }

    fn backend_name(&self) -> &str {
        BACKEND
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::v1beta1::VirtualMachineSpec;

    fn vm() -> VirtualMachine {
        let mut vm = VirtualMachine::new(
            "vm-1",
            VirtualMachineSpec {
                cpu: "2".into(),
                memory: "4Gi".into(),
                ..Default::default()
            },
        );
        vm.metadata.namespace = Some("default".into());
        vm
    }

    #[tokio::test]
    async fn test_power_requires_instance() {
        let adapter = KubeVirtAdapter::new(KubeVirtConfig::default());
        assert!(adapter.power_on(&vm()).await.is_err());

        adapter.ensure_instance(&vm()).await.unwrap();
        adapter.power_on(&vm()).await.unwrap();

        let state = adapter.instance(&ObjectKey::new("default", "vm-1")).await.unwrap();
        assert_eq!(state.power, Some(PowerState::Running));
        assert_eq!(adapter.calls().count("power_on"), 2);
    }

    #[tokio::test]
    async fn test_ensure_keeps_power_and_cleanup_is_idempotent() {
        let adapter = KubeVirtAdapter::new(KubeVirtConfig::default());
        adapter.ensure_instance(&vm()).await.unwrap();
        adapter.power_off(&vm()).await.unwrap();

        let mut resized = vm();
        resized.spec.cpu = "4".into();
        adapter.ensure_instance(&resized).await.unwrap();

        let state = adapter.instance(&ObjectKey::new("default", "vm-1")).await.unwrap();
        assert_eq!(state.cpu, "4");
        assert_eq!(state.power, Some(PowerState::Stopped));

        adapter.cleanup(&vm()).await.unwrap();
        adapter.cleanup(&vm()).await.unwrap();
        assert_eq!(adapter.instance_count().await, 0);
    }

    #[tokio::test]
    async fn test_injected_cleanup_failure() {
        let adapter = KubeVirtAdapter::new(KubeVirtConfig::default());
        adapter.ensure_instance(&vm()).await.unwrap();
        adapter.faults().fail("cleanup", "hypervisor unreachable");

        let err = adapter.cleanup(&vm()).await.unwrap_err();
        assert!(err.to_string().contains("hypervisor unreachable"));
        assert_eq!(adapter.instance_count().await, 1);
    }
}
