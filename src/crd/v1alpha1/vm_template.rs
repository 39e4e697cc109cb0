//! VMTemplate CRD (v1alpha1)

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::crd::{Condition, HasStatus};

/// Reusable VM blueprint
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "virtualization.kubesphere.io",
    version = "v1alpha1",
    kind = "VMTemplate",
    plural = "vmtemplates",
    shortname = "vmtemp",
    shortname = "vmtemps",
    status = "VMTemplateStatus",
    derive = "PartialEq",
    printcolumn = r#"{"name": "OS", "type": "string", "jsonPath": ".spec.parameters.os"}"#,
    printcolumn = r#"{"name": "CPU", "type": "string", "jsonPath": ".spec.parameters.cpu"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct VMTemplateSpec {
    pub parameters: TemplateParameters,

    #[serde(default)]
    pub constraints: TemplateConstraints,

    /// Free-form hints for UIs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ui_hints: Option<BTreeMap<String, String>>,
}

/// Default VM parameters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TemplateParameters {
    #[serde(default)]
    pub cpu: String,
    #[serde(default)]
    pub memory: String,
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub networks: Vec<String>,
    #[serde(default)]
    pub disks: Vec<TemplateDisk>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TemplateDisk {
    pub name: String,
    pub size: String,
    /// system, data or ephemeral
    #[schemars(schema_with = "crate::crd::types::disk_type_schema")]
    pub r#type: String,
}

/// Sizing bounds; empty strings mean unbounded
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TemplateConstraints {
    #[serde(default, rename = "minCPU", skip_serializing_if = "String::is_empty")]
    pub min_cpu: String,
    #[serde(default, rename = "maxCPU", skip_serializing_if = "String::is_empty")]
    pub max_cpu: String,
    #[serde(default, rename = "minMemory", skip_serializing_if = "String::is_empty")]
    pub min_memory: String,
    #[serde(default, rename = "maxMemory", skip_serializing_if = "String::is_empty")]
    pub max_memory: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct VMTemplateStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl HasStatus for VMTemplate {
    type Status = VMTemplateStatus;

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
