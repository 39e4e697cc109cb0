//! VMSnapshot CRD (v1alpha1)

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::NamespacedName;
use crate::crd::{Condition, HasStatus};

/// Point-in-time snapshot of a VirtualMachine
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "virtualization.kubesphere.io",
    version = "v1alpha1",
    kind = "VMSnapshot",
    plural = "vmsnapshots",
    shortname = "vmsnap",
    shortname = "vmsnaps",
    status = "VMSnapshotStatus",
    derive = "PartialEq",
    printcolumn = r#"{"name": "Source", "type": "string", "jsonPath": ".spec.sourceRef.name"}"#,
    printcolumn = r#"{"name": "ReadyToUse", "type": "boolean", "jsonPath": ".status.readyToUse"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct VMSnapshotSpec {
    /// VM being snapshotted
    pub source_ref: NamespacedName,

    /// Disk names captured by the snapshot
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub included_disks: Vec<String>,

    /// Retain or Delete
    #[serde(default, skip_serializing_if = "String::is_empty")]
    #[schemars(schema_with = "crate::crd::types::retain_policy_schema")]
    pub retain_policy: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VMSnapshotStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    #[serde(default)]
    pub ready_to_use: bool,
}

impl HasStatus for VMSnapshot {
    type Status = VMSnapshotStatus;

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
