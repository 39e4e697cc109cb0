//! Template Catalog Adapter

use super::{CallLog, FaultInjector};
use crate::crd::v1beta1::{TemplateParameters, VMTemplate};
use crate::domain::ports::{CatalogBackend, ObjectKey};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use tracing::info;

const BACKEND: &str = "catalog";

/// Adapter publishing templates into an in-memory catalog
#[derive(Default)]
pub struct CatalogAdapter {
    entries: RwLock<BTreeMap<ObjectKey, TemplateParameters>>,
    calls: CallLog,
    faults: FaultInjector,
}

impl CatalogAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> &CallLog {
        &self.calls
    }

    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    pub async fn entry(&self, key: &ObjectKey) -> Option<TemplateParameters> {
        self.entries.read().await.get(key).cloned()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait]
impl CatalogBackend for CatalogAdapter {
    async fn sync(&self, template: &VMTemplate) -> Result<()> {
        self.calls.record("sync");
        self.faults.check(BACKEND, "sync")?;

        let key = ObjectKey::of(template);
        info!("Publishing template {} ({})", key, template.spec.parameters.os);
        self.entries
            .write()
            .await
            .insert(key, template.spec.parameters.clone());
        Ok(())
    }

    async fn remove(&self, template: &VMTemplate) -> Result<()> {
        self.calls.record("remove");
        self.faults.check(BACKEND, "remove")?;

        let key = ObjectKey::of(template);
        if self.entries.write().await.remove(&key).is_some() {
            info!("Removed template {} from catalog", key);
        }
        Ok(())
    }

    fn backend_name(&self) -> &str {
        BACKEND
    }
}
