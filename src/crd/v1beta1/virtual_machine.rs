//! VirtualMachine CRD (hub revision)
//!
//! Describes the VM shape (CPU, memory, NUMA, hugepages, GPUs), its ordered
//! disk and network attachments and the desired power state.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{LocalObjectReference, NamespacedName};
use crate::crd::{preserve_unknown_fields, Condition, DiskType, HasStatus, NetworkType, PowerState};
use crate::error::Result;

// =============================================================================
// VirtualMachine CRD
// =============================================================================

/// VirtualMachine declares a KubeVirt-backed virtual machine together with the
/// disks and networks it attaches.
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "virtualization.kubesphere.io",
    version = "v1beta1",
    kind = "VirtualMachine",
    plural = "virtualmachines",
    shortname = "vm",
    shortname = "vms",
    status = "VirtualMachineStatus",
    derive = "PartialEq",
    printcolumn = r#"{"name": "Power", "type": "string", "jsonPath": ".status.powerState"}"#,
    printcolumn = r#"{"name": "CPU", "type": "string", "jsonPath": ".spec.cpu"}"#,
    printcolumn = r#"{"name": "Memory", "type": "string", "jsonPath": ".spec.memory"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineSpec {
    /// Number of vCPUs (e.g. "4" or "500m")
    pub cpu: String,

    /// Memory in quantity format (e.g. "8Gi")
    pub memory: String,

    /// KubeVirt CPU model selection
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cpu_model: String,

    /// Pin vCPUs to physical CPUs
    #[serde(default, rename = "dedicatedCPUPlacement")]
    pub dedicated_cpu_placement: bool,

    /// NUMA scheduling policy: none, strict, best-effort
    #[serde(default, rename = "numaPolicy", skip_serializing_if = "String::is_empty")]
    #[schemars(schema_with = "crate::crd::types::numa_policy_schema")]
    pub numa_policy: String,

    /// Fine-grained NUMA cell layout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub numa: Option<NumaSpec>,

    /// Hugepage size: "", "1Gi" or "2Mi"
    #[serde(default, skip_serializing_if = "String::is_empty")]
    #[schemars(schema_with = "crate::crd::types::hugepages_schema")]
    pub hugepages: String,

    /// vGPU or passthrough devices
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpus: Option<Vec<GpuDevice>>,

    /// Ordered disk attachments
    #[schemars(length(min = 1))]
    pub disks: Vec<VirtualMachineDisk>,

    /// Ordered network attachments
    #[schemars(length(min = 1))]
    pub nets: Vec<VirtualMachineNetwork>,

    /// Guest customization via cloud-init
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_init: Option<CloudInitSpec>,

    /// Remote consoles exposed to UIs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub console: Option<ConsoleDevices>,

    /// Live migration preferences
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub live_migration: Option<LiveMigrationSpec>,

    /// Guest health probe
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub liveness_probe: Option<Probe>,

    /// Guest service readiness probe
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readiness_probe: Option<Probe>,

    /// Desired power state: Running or Stopped
    #[serde(default, skip_serializing_if = "String::is_empty")]
    #[schemars(schema_with = "crate::crd::types::power_state_schema")]
    pub power_state: String,

    /// Raw KubeVirt VM fragment merged by the instance backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub kube_virt: Option<serde_json::Value>,
}

// =============================================================================
// Sub-Types
// =============================================================================

/// Health probe timings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Probe {
    #[serde(default)]
    pub period_seconds: i32,
    #[serde(default)]
    pub timeout_seconds: i32,
    #[serde(default)]
    pub failure_threshold: i32,
}

/// A disk attachment referencing a VirtualDisk by name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineDisk {
    /// system, data or ephemeral
    #[schemars(schema_with = "crate::crd::types::disk_type_schema")]
    pub r#type: String,

    /// virtio, sata or scsi
    #[serde(default, skip_serializing_if = "String::is_empty")]
    #[schemars(schema_with = "crate::crd::types::disk_bus_schema")]
    pub bus: String,

    /// none, writeback, writethrough or directsync
    #[serde(default, skip_serializing_if = "String::is_empty")]
    #[schemars(schema_with = "crate::crd::types::disk_cache_schema")]
    pub cache: String,

    #[serde(default, rename = "iothread")]
    pub io_thread: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boot_order: Option<i32>,

    #[serde(default)]
    pub hotplug: bool,

    pub disk_ref: LocalObjectReference,
}

impl VirtualMachineDisk {
    /// Parsed disk role
    pub fn disk_type(&self) -> Result<DiskType> {
        self.r#type.parse()
    }
}

/// A network attachment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineNetwork {
    /// bridge, masquerade or sriov
    #[schemars(schema_with = "crate::crd::types::network_type_schema")]
    pub r#type: String,

    /// NetworkAttachmentDefinition used by bridge/sriov
    #[serde(default, rename = "nadRef", skip_serializing_if = "Option::is_none")]
    pub nad_ref: Option<NamespacedName>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub model: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub bandwidth: String,

    /// Device plugin resource, required for sriov
    #[serde(default, rename = "sriovResource", skip_serializing_if = "String::is_empty")]
    pub sriov_resource: String,

    #[serde(default)]
    pub multiqueue: bool,
}

impl VirtualMachineNetwork {
    /// Parsed attachment type
    pub fn network_type(&self) -> Result<NetworkType> {
        self.r#type.parse()
    }

    pub fn is_sriov(&self) -> bool {
        matches!(self.network_type(), Ok(NetworkType::Sriov))
    }
}

/// Virtual NUMA topology
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct NumaSpec {
    pub cells: Vec<NumaCell>,
}

/// A NUMA cell definition
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NumaCell {
    pub id: i32,
    /// CPU set, e.g. "0-3"
    pub cpus: String,
    pub memory: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threads_per_core: Option<i32>,
}

/// vGPU or passthrough device
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GpuDevice {
    pub name: String,
    /// vgpu or passthrough
    #[schemars(schema_with = "crate::crd::types::gpu_device_type_schema")]
    pub device_type: String,
    pub resource_name: String,
}

/// Guest personalization
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CloudInitSpec {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user_data: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub network_data: String,

    #[serde(default, rename = "sshAuthorizedKeys", skip_serializing_if = "Option::is_none")]
    pub ssh_authorized_keys: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data_secret_ref: Option<NamespacedName>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_data_secret_ref: Option<NamespacedName>,
}

/// Remote console toggles
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ConsoleDevices {
    #[serde(default)]
    pub vnc: bool,
    #[serde(default)]
    pub serial: bool,
    /// "" or "spice"
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub r#type: String,
}

/// Migration preferences
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LiveMigrationSpec {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub bandwidth: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_timeout_seconds: Option<i32>,
    #[serde(default)]
    pub allow_post_copy: bool,
    #[serde(default)]
    pub auto_converge: bool,
}

// =============================================================================
// Status
// =============================================================================

/// Status of the VirtualMachine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Observed power state
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub power_state: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub phase: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub migration_state: String,

    /// Time of the last successful power call to the backend.
    /// Only present in the hub revision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<String>")]
    pub last_power_sync_time: Option<DateTime<Utc>>,
}

// =============================================================================
// Implementations
// =============================================================================

impl VirtualMachine {
    /// Desired power state parsed from spec
    pub fn desired_power_state(&self) -> Result<PowerState> {
        self.spec.power_state.parse()
    }

    /// Observed power state, if the backend has reported one
    pub fn observed_power_state(&self) -> Option<PowerState> {
        self.status
            .as_ref()
            .and_then(|s| s.power_state.parse().ok())
    }

    /// Networks that need SR-IOV feasibility checks
    pub fn sriov_networks(&self) -> impl Iterator<Item = &VirtualMachineNetwork> {
        self.spec.nets.iter().filter(|n| n.is_sriov())
    }
}

impl HasStatus for VirtualMachine {
    type Status = VirtualMachineStatus;

    fn status(&self) -> Option<&Self::Status> {
        self.status.as_ref()
    }

    fn status_mut(&mut self) -> &mut Self::Status {
        self.status.get_or_insert_with(Default::default)
    }

    fn set_status(&mut self, status: Option<Self::Status>) {
        self.status = status;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec_json() -> serde_json::Value {
        serde_json::json!({
            "cpu": "2",
            "memory": "4Gi",
            "dedicatedCPUPlacement": true,
            "disks": [{"type": "system", "iothread": true, "diskRef": {"name": "root"}}],
            "nets": [{"type": "sriov", "nadRef": {"namespace": "net", "name": "sriov-a"}, "sriovResource": "intel.com/sriov"}],
            "powerState": "Stopped",
            "kubeVirt": {"spec": {"runStrategy": "Manual"}}
        })
    }

    #[test]
    fn test_wire_names() {
        let spec: VirtualMachineSpec = serde_json::from_value(spec_json()).unwrap();
        assert!(spec.dedicated_cpu_placement);
        assert!(spec.disks[0].io_thread);
        assert_eq!(spec.nets[0].sriov_resource, "intel.com/sriov");
        assert_eq!(spec.power_state, "Stopped");

        let back = serde_json::to_value(&spec).unwrap();
        assert_eq!(back["dedicatedCPUPlacement"], true);
        assert_eq!(back["disks"][0]["diskRef"]["name"], "root");
        assert_eq!(back["kubeVirt"]["spec"]["runStrategy"], "Manual");
    }

    #[test]
    fn test_power_state_accessors() {
        let spec: VirtualMachineSpec = serde_json::from_value(spec_json()).unwrap();
        let mut vm = VirtualMachine::new("vm-1", spec);
        assert_eq!(vm.desired_power_state().unwrap(), PowerState::Stopped);
        assert_eq!(vm.observed_power_state(), None);

        vm.status_mut().power_state = "Running".into();
        assert_eq!(vm.observed_power_state(), Some(PowerState::Running));
        assert_eq!(vm.sriov_networks().count(), 1);
    }
}
