//! Multus Network Attachment Adapter

use super::{CallLog, FaultInjector};
use crate::crd::v1beta1::VirtualMachineNetwork;
use crate::crd::NetworkType;
use crate::domain::ports::{NetworkAttachmentBackend, ObjectKey};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::BTreeSet;
use tokio::sync::RwLock;
use tracing::debug;

const BACKEND: &str = "multus";

/// Configuration for the Multus adapter
#[derive(Debug, Clone, Default)]
pub struct MultusConfig {
    /// Only accept NetworkAttachmentDefinitions that were registered
    pub require_registered: bool,
}

/// Adapter validating NetworkAttachmentDefinition references
pub struct MultusAdapter {
    config: MultusConfig,
    definitions: RwLock<BTreeSet<ObjectKey>>,
    calls: CallLog,
    faults: FaultInjector,
}

impl MultusAdapter {
    pub fn new(config: MultusConfig) -> Self {
        Self {
            config,
            definitions: RwLock::new(BTreeSet::new()),
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

    /// Make a NetworkAttachmentDefinition known to the adapter
    pub async fn register(&self, namespace: &str, name: &str) {
        self.definitions.write().await.insert(ObjectKey::new(namespace, name));
    }
}

#[async_trait]
impl NetworkAttachmentBackend for MultusAdapter {
    async fn validate_attachment(&self, namespace: &str, network: &VirtualMachineNetwork) -> Result<()> {
        self.calls.record("validate_attachment");
        self.faults.check(BACKEND, "validate_attachment")?;

        let network_type = network.network_type()?;
        if network_type == NetworkType::Masquerade {
            return Ok(());
        }

        let nad = network.nad_ref.as_ref().ok_or_else(|| {
            Error::backend(
                BACKEND,
                "validate_attachment",
                format!("{} network requires nadRef", network_type),
            )
        })?;

        if network_type == NetworkType::Sriov && network.sriov_resource.is_empty() {
            return Err(Error::backend(
                BACKEND,
                "validate_attachment",
                "sriov network requires sriovResource",
            ));
        }

        let nad_namespace = if nad.namespace.is_empty() { namespace } else { nad.namespace.as_str() };
        let key = ObjectKey::new(nad_namespace, nad.name.clone());

        if self.config.require_registered && !self.definitions.read().await.contains(&key) {
            return Err(Error::backend(
                BACKEND,
                "validate_attachment",
                format!("NetworkAttachmentDefinition {} not found", key),
            ));
        }

        debug!("Validated {} attachment to {}", network_type, key);
        Ok(())
    }

    fn backend_name(&self) -> &str {
        BACKEND
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::v1beta1::NamespacedName;

    fn sriov(nad: Option<(&str, &str)>, resource: &str) -> VirtualMachineNetwork {
        VirtualMachineNetwork {
            r#type: "sriov".into(),
            nad_ref: nad.map(|(ns, name)| NamespacedName {
                namespace: ns.into(),
                name: name.into(),
            }),
            sriov_resource: resource.into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_sriov_requires_nad_and_resource() {
        let adapter = MultusAdapter::new(MultusConfig::default());

        assert!(adapter
            .validate_attachment("default", &sriov(None, "intel.com/vf"))
            .await
            .is_err());
        assert!(adapter
            .validate_attachment("default", &sriov(Some(("net", "vf")), ""))
            .await
            .is_err());
        assert!(adapter
            .validate_attachment("default", &sriov(Some(("net", "vf")), "intel.com/vf"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_registered_definitions() {
        let adapter = MultusAdapter::new(MultusConfig {
            require_registered: true,
        });
        let network = sriov(Some(("", "vf")), "intel.com/vf");

        assert!(adapter.validate_attachment("tenant", &network).await.is_err());
        adapter.register("tenant", "vf").await;
        assert!(adapter.validate_attachment("tenant", &network).await.is_ok());
    }
}
