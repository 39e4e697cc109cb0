//! VirtualMachine admission
//!
//! Defaults the NUMA policy and power state, then checks the spec against
//! both its own invariants and what the cluster's nodes can actually host.

use super::{denied, AdmissionHook};
use crate::crd::v1beta1::VirtualMachine;
use crate::crd::{DiskBus, DiskCache, DiskType, GpuDeviceType, HugepageSize, NetworkType, NumaPolicy, PowerState};
use crate::domain::ports::NodeInventory;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Label marking nodes with SR-IOV capable NICs
pub const SRIOV_CAPABLE_SELECTOR: &str = "sriov.capable=true";

pub struct VirtualMachineAdmission {
    nodes: Arc<dyn NodeInventory>,
}

impl VirtualMachineAdmission {
    pub fn new(nodes: Arc<dyn NodeInventory>) -> Self {
        Self { nodes }
    }

    async fn validate_sriov(&self, vm: &VirtualMachine) -> Result<()> {
        let mut checked_nodes = false;
        for net in vm.sriov_networks() {
            if net.nad_ref.is_none() {
                return Err(denied("SR-IOV network requires nadRef"));
            }
            if net.sriov_resource.is_empty() {
                return Err(denied("SR-IOV network requires sriovResource"));
            }
            if checked_nodes {
                continue;
            }
            let capable = self
                .nodes
                .list_nodes(Some(SRIOV_CAPABLE_SELECTOR))
                .await
                .map_err(|e| denied(e.to_string()))?;
            if capable.is_empty() {
                return Err(denied("no sriov.capable=true nodes available for SR-IOV network"));
            }
            checked_nodes = true;
        }
        Ok(())
    }

    async fn validate_hugepages(&self, vm: &VirtualMachine) -> Result<()> {
        if vm.spec.hugepages.is_empty() {
            return Ok(());
        }
        let size = vm
            .spec
            .hugepages
            .parse::<HugepageSize>()
            .map_err(|e| denied(e.to_string()))?;

        let resource = size.resource_name();
        let nodes = self.nodes.list_nodes(None).await.map_err(|e| denied(e.to_string()))?;
        if nodes.iter().any(|n| n.has_allocatable(&resource)) {
            Ok(())
        } else {
            Err(denied(format!("no nodes advertise hugepages {}", size)))
        }
    }
}

#[async_trait]
impl AdmissionHook for VirtualMachineAdmission {
    type Object = VirtualMachine;

    fn kind(&self) -> &'static str {
        "VirtualMachine"
    }

    fn apply_defaults(&self, vm: &mut VirtualMachine, _namespace: &str) {
        if vm.spec.numa_policy.is_empty() {
            vm.spec.numa_policy = NumaPolicy::DEFAULT.to_string();
        }
        if vm.spec.power_state.is_empty() {
            vm.spec.power_state = PowerState::Running.to_string();
        }
    }

    async fn validate(&self, vm: &VirtualMachine, _namespace: &str) -> Result<()> {
        if vm.spec.disks.is_empty() {
            return Err(denied("spec.disks must contain at least one disk"));
        }
        if vm.spec.nets.is_empty() {
            return Err(denied("spec.nets must contain at least one network"));
        }

        for disk in &vm.spec.disks {
            disk.r#type.parse::<DiskType>().map_err(|e| denied(e.to_string()))?;
            if !disk.bus.is_empty() {
                disk.bus.parse::<DiskBus>().map_err(|e| denied(e.to_string()))?;
            }
            if !disk.cache.is_empty() {
                disk.cache.parse::<DiskCache>().map_err(|e| denied(e.to_string()))?;
            }
        }
        for net in &vm.spec.nets {
            net.r#type.parse::<NetworkType>().map_err(|e| denied(e.to_string()))?;
        }
        for gpu in vm.spec.gpus.iter().flatten() {
            gpu.device_type
                .parse::<GpuDeviceType>()
                .map_err(|e| denied(e.to_string()))?;
        }
        vm.spec
            .numa_policy
            .parse::<NumaPolicy>()
            .map_err(|e| denied(e.to_string()))?;
        vm.spec
            .power_state
            .parse::<PowerState>()
            .map_err(|e| denied(e.to_string()))?;

        self.validate_sriov(vm).await?;
        self.validate_hugepages(vm).await
    }
}
