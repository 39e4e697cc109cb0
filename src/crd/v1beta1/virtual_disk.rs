//! VirtualDisk CRD (hub revision)

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::crd::{Condition, HasStatus};

/// VirtualDisk describes a disk backing that VMs attach by name
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "virtualization.kubesphere.io",
    version = "v1beta1",
    kind = "VirtualDisk",
    plural = "virtualdisks",
    shortname = "vmdisk",
    shortname = "vmdisks",
    status = "VirtualDiskStatus",
    derive = "PartialEq",
    printcolumn = r#"{"name": "Backing", "type": "string", "jsonPath": ".spec.backing"}"#,
    printcolumn = r#"{"name": "Size", "type": "string", "jsonPath": ".spec.size"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct VirtualDiskSpec {
    /// DataVolume, PVC or Blank
    pub backing: String,

    /// Capacity (e.g. "20Gi")
    pub size: String,

    /// ReadWriteOnce, ReadOnlyMany or ReadWriteMany
    pub access_mode: String,

    /// Block or Filesystem
    pub volume_mode: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub storage_class: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct VirtualDiskStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl HasStatus for VirtualDisk {
    type Status = VirtualDiskStatus;

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
