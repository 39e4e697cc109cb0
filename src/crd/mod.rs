//! Custom Resource Definitions for the virtualization API group
//!
//! This module contains both served revisions of every kind:
//! - `v1beta1`: the hub (storage) revision every other revision converts through
//! - `v1alpha1`: the older revision kept for existing clients
//!
//! Shared building blocks (conditions, enum parsing, finalizer tokens) live
//! at this level so both revisions use identical symbol sets.

pub mod condition;
pub mod types;
pub mod v1alpha1;
pub mod v1beta1;

pub use condition::*;
pub use types::*;

use kube::core::crd::merge_crds;
use kube::CustomResourceExt;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::{
    CustomResourceConversion, CustomResourceDefinition, ServiceReference, WebhookClientConfig, WebhookConversion,
};
use k8s_openapi::ByteString;
use schemars::gen::SchemaGenerator;
use schemars::schema::{InstanceType, Schema, SchemaObject};

use crate::error::{Error, Result};

/// API group shared by every kind
pub const API_GROUP: &str = "virtualization.kubesphere.io";

/// Storage revision
pub const HUB_VERSION: &str = "v1beta1";

/// Finalizer token guarding VirtualMachine teardown
pub const VM_FINALIZER: &str = "virtualization.kubesphere.io/vm-cleanup";

/// Finalizer token guarding VMSnapshot teardown
pub const SNAPSHOT_FINALIZER: &str = "virtualization.kubesphere.io/vmsnapshot-cleanup";

/// Finalizer token guarding VMTemplate teardown
pub const TEMPLATE_FINALIZER: &str = "virtualization.kubesphere.io/vmtemplate-cleanup";

/// Label marking the owning workspace
pub const LABEL_WORKSPACE: &str = "kubesphere.io/workspace";

/// Label marking the owning project
pub const LABEL_PROJECT: &str = "kubesphere.io/project";

/// Label marking the hosting cluster
pub const LABEL_CLUSTER: &str = "kubesphere.io/cluster";

/// Access to the status block of a resource, used by the status write path
pub trait HasStatus {
    type Status: Clone + Default + Send + Sync;

    fn status(&self) -> Option<&Self::Status>;

    /// Status block, created empty when absent
    fn status_mut(&mut self) -> &mut Self::Status;

    fn set_status(&mut self, status: Option<Self::Status>);
}

/// Schema for opaque extension payloads carried through without interpretation
pub(crate) fn preserve_unknown_fields(_: &mut SchemaGenerator) -> Schema {
    let mut schema = SchemaObject {
        instance_type: Some(InstanceType::Object.into()),
        ..Default::default()
    };
    schema.extensions.insert(
        "x-kubernetes-preserve-unknown-fields".to_string(),
        serde_json::Value::Bool(true),
    );
    Schema::Object(schema)
}

/// Where the API server reaches the conversion webhook
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionWebhook {
    pub service_name: String,
    pub service_namespace: String,
    pub port: i32,
    pub path: String,
    /// PEM bundle the API server uses to verify the serving certificate
    pub ca_bundle: Option<Vec<u8>>,
}

impl Default for ConversionWebhook {
    fn default() -> Self {
        Self {
            service_name: "virtualization-webhook".to_string(),
            service_namespace: "kubesphere-system".to_string(),
            port: 443,
            path: "/convert".to_string(),
            ca_bundle: None,
        }
    }
}

impl ConversionWebhook {
    fn conversion(&self) -> CustomResourceConversion {
        CustomResourceConversion {
            strategy: "Webhook".to_string(),
            webhook: Some(WebhookConversion {
                client_config: Some(WebhookClientConfig {
                    ca_bundle: self.ca_bundle.clone().map(ByteString),
                    service: Some(ServiceReference {
                        name: self.service_name.clone(),
                        namespace: self.service_namespace.clone(),
                        path: Some(self.path.clone()),
                        port: Some(self.port),
                    }),
                    url: None,
                }),
                conversion_review_versions: vec!["v1".to_string()],
            }),
        }
    }
}

/// Build the multi-version CRDs for every kind, with the hub as storage
/// version and revisions converted through `webhook`
pub fn all_crds(webhook: &ConversionWebhook) -> Result<Vec<CustomResourceDefinition>> {
    let pairs = vec![
        (v1alpha1::VirtualMachine::crd(), v1beta1::VirtualMachine::crd()),
        (v1alpha1::VirtualDisk::crd(), v1beta1::VirtualDisk::crd()),
        (v1alpha1::VirtualNet::crd(), v1beta1::VirtualNet::crd()),
        (v1alpha1::VMSnapshot::crd(), v1beta1::VMSnapshot::crd()),
        (v1alpha1::VMTemplate::crd(), v1beta1::VMTemplate::crd()),
    ];

    pairs
        .into_iter()
        .map(|(alpha, beta)| {
            let mut crd = merge_crds(vec![alpha, beta], HUB_VERSION)
                .map_err(|e| Error::Internal(format!("Failed to merge CRD versions: {}", e)))?;
            crd.spec.versions.sort_by(|a, b| a.name.cmp(&b.name));
            crd.spec.conversion = Some(webhook.conversion());
            Ok(crd)
        })
        .collect()
}

/// Render every CRD as a multi-document YAML stream
pub fn render_crds_yaml(webhook: &ConversionWebhook) -> Result<String> {
    let mut out = String::new();
    for crd in all_crds(webhook)? {
        out.push_str("---\n");
        out.push_str(&serde_yaml::to_string(&crd)?);
    }
    Ok(out)
}
