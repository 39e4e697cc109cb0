//! VirtualNet CRD (v1alpha1)

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::crd::{Condition, HasStatus};

/// VirtualNet wraps a NetworkAttachmentDefinition template
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "virtualization.kubesphere.io",
    version = "v1alpha1",
    kind = "VirtualNet",
    plural = "virtualnets",
    shortname = "vmnet",
    shortname = "vmnets",
    status = "VirtualNetStatus",
    derive = "PartialEq",
    printcolumn = r#"{"name": "VLAN", "type": "integer", "jsonPath": ".spec.vlan"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct VirtualNetSpec {
    /// NetworkAttachmentDefinition manifest
    pub nad_template: String,

    /// Bandwidth limit in Mbps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bandwidth_limit: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vlan: Option<i32>,

    #[serde(default, rename = "sriovResource", skip_serializing_if = "String::is_empty")]
    pub sriov_resource: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct VirtualNetStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl HasStatus for VirtualNet {
    type Status = VirtualNetStatus;

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
