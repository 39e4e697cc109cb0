//! Domain Ports - Collaborator contracts for the virtualization operator
//!
//! The reconcilers and admission hooks only talk to the outside world through
//! these traits. Adapters in [`crate::backends`] and [`crate::store`] provide
//! concrete implementations.

use crate::crd::quantity_millis;
use crate::crd::v1beta1::{VMSnapshot, VMTemplate, VirtualMachine, VirtualMachineDisk, VirtualMachineNetwork};
use crate::error::Result;
use crate::store::QueryOptions;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kube::ResourceExt;
use std::collections::BTreeMap;

// =============================================================================
// Object Identity
// =============================================================================

/// Namespace/name identity of a namespaced object
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Identity of an existing resource
    pub fn of<K: ResourceExt>(obj: &K) -> Self {
        Self::new(obj.namespace().unwrap_or_default(), obj.name_any())
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

// =============================================================================
// VM Instance Backend
// =============================================================================

/// Hypervisor-side VM instance (KubeVirt VirtualMachine in production)
#[async_trait]
pub trait VmInstanceBackend: Send + Sync {
    /// Create or update the backend instance so it matches the VM
    async fn ensure_instance(&self, vm: &VirtualMachine) -> Result<()>;

    /// Start the instance
    async fn power_on(&self, vm: &VirtualMachine) -> Result<()>;

    /// Stop the instance
    async fn power_off(&self, vm: &VirtualMachine) -> Result<()>;

    /// Tear down every backend artifact of the VM
    async fn cleanup(&self, vm: &VirtualMachine) -> Result<()>;

    fn backend_name(&self) -> &str;
}

// =============================================================================
// Volume Backend
// =============================================================================

/// Provisioner of disks backing VM attachments (CDI DataVolumes / PVCs)
#[async_trait]
pub trait VolumeBackend: Send + Sync {
    /// Make sure the volume behind `disk` exists, recording it as owned by `vm`
    async fn ensure_volume(&self, vm: &VirtualMachine, disk: &VirtualMachineDisk) -> Result<()>;

    /// Delete every volume previously ensured on behalf of `vm`
    async fn delete_owned_volumes(&self, vm: &VirtualMachine) -> Result<()>;

    fn backend_name(&self) -> &str;
}

// =============================================================================
// Network Attachment Backend
// =============================================================================

/// Validator of secondary network attachments (Multus NADs)
#[async_trait]
pub trait NetworkAttachmentBackend: Send + Sync {
    /// Check that the attachment referenced by `network` is usable from `namespace`
    async fn validate_attachment(&self, namespace: &str, network: &VirtualMachineNetwork) -> Result<()>;

    fn backend_name(&self) -> &str;
}

// =============================================================================
// Snapshot & Catalog Backends
// =============================================================================

/// Snapshot engine
#[async_trait]
pub trait SnapshotBackend: Send + Sync {
    async fn sync(&self, snapshot: &VMSnapshot) -> Result<()>;

    async fn delete(&self, snapshot: &VMSnapshot) -> Result<()>;

    fn backend_name(&self) -> &str;
}

/// Template catalog publisher
#[async_trait]
pub trait CatalogBackend: Send + Sync {
    async fn sync(&self, template: &VMTemplate) -> Result<()>;

    async fn remove(&self, template: &VMTemplate) -> Result<()>;

    fn backend_name(&self) -> &str;
}

// =============================================================================
// Resource Store
// =============================================================================

/// Persistent object store with optimistic concurrency
///
/// `replace` writes metadata and spec and fails with a conflict when the
/// object's resourceVersion is stale. `replace_status` writes only the status
/// block. `delete` marks the object for deletion; it disappears once its
/// finalizer list is empty.
#[async_trait]
pub trait ObjectStore<K>: Send + Sync
where
    K: Clone + Send + Sync + 'static,
{
    /// Fetch an object; `None` when absent
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>>;

    async fn list(&self, query: &QueryOptions) -> Result<Vec<K>>;

    async fn create(&self, obj: &K) -> Result<K>;

    async fn replace(&self, obj: &K) -> Result<K>;

    async fn replace_status(&self, obj: &K) -> Result<K>;

    async fn delete(&self, namespace: &str, name: &str) -> Result<()>;
}

// =============================================================================
// Node Inventory
// =============================================================================

/// Scheduling-relevant view of a cluster node
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeInfo {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    /// Allocatable resources as quantity strings
    pub allocatable: BTreeMap<String, String>,
}

impl NodeInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_allocatable(mut self, resource: &str, quantity: &str) -> Self {
        self.allocatable.insert(resource.to_string(), quantity.to_string());
        self
    }

    /// Whether the node advertises a nonzero amount of `resource`
    pub fn has_allocatable(&self, resource: &str) -> bool {
        self.allocatable
            .get(resource)
            .and_then(|q| quantity_millis(q).ok())
            .map(|millis| millis > 0)
            .unwrap_or(false)
    }
}

/// Read-only access to cluster nodes for admission feasibility checks
#[async_trait]
pub trait NodeInventory: Send + Sync {
    /// List nodes, optionally filtered by a label selector (`key=value`)
    async fn list_nodes(&self, selector: Option<&str>) -> Result<Vec<NodeInfo>>;
}

// =============================================================================
// Clock
// =============================================================================

/// Source of the current time, replaceable in tests
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
