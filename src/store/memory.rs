//! In-memory Resource Store
//!
//! Mirrors the API server semantics the reconcilers rely on:
//! - every write bumps `resourceVersion` and a stale version is a conflict
//! - `replace` never touches status and `replace_status` never touches spec
//! - `delete` only sets `deletionTimestamp` while finalizers remain; the
//!   object disappears on the write that empties its finalizer list

use super::{list_across_clusters, selector_matches, QueryOptions};
use crate::crd::HasStatus;
use crate::domain::ports::{NodeInfo, NodeInventory, ObjectKey, ObjectStore};
use crate::error::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::{Resource, ResourceExt};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::debug;

// =============================================================================
// Memory Store
// =============================================================================

/// Store keeping objects of one kind in process memory
pub struct MemoryStore<K> {
    objects: RwLock<BTreeMap<ObjectKey, K>>,
    revision: AtomicU64,
    /// Number of upcoming `replace` calls to reject with a conflict
    injected_conflicts: AtomicUsize,
}

impl<K> Default for MemoryStore<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> MemoryStore<K> {
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(BTreeMap::new()),
            revision: AtomicU64::new(0),
            injected_conflicts: AtomicUsize::new(0),
        }
    }

    /// Make the next `count` calls to `replace` fail with a conflict
    pub fn inject_conflicts(&self, count: usize) {
        self.injected_conflicts.store(count, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    fn next_revision(&self) -> String {
        (self.revision.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    fn take_injected_conflict(&self) -> bool {
        self.injected_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl<K> MemoryStore<K>
where
    K: Resource<DynamicType = ()> + Clone,
{
    fn kind() -> String {
        K::kind(&()).to_string()
    }

    fn not_found(key: &ObjectKey) -> Error {
        Error::ResourceNotFound {
            kind: Self::kind(),
            name: key.to_string(),
        }
    }

    fn conflict(key: &ObjectKey) -> Error {
        Error::Conflict {
            kind: Self::kind(),
            name: key.to_string(),
        }
    }

    fn check_version(current: &K, incoming: &K, key: &ObjectKey) -> Result<()> {
        match &incoming.meta().resource_version {
            Some(rv) if Some(rv) != current.meta().resource_version.as_ref() => {
                Err(Self::conflict(key))
            }
            _ => Ok(()),
        }
    }

    /// Objects whose deletion has been requested and whose finalizers are gone
    /// are removed instead of being stored.
    fn store_or_release(&self, objects: &mut BTreeMap<ObjectKey, K>, key: ObjectKey, obj: K) -> K {
        if obj.meta().deletion_timestamp.is_some() && obj.finalizers().is_empty() {
            debug!("Releasing {} {} after last finalizer was removed", Self::kind(), key);
            objects.remove(&key);
        } else {
            objects.insert(key, obj.clone());
        }
        obj
    }
}

#[async_trait]
impl<K> ObjectStore<K> for MemoryStore<K>
where
    K: Resource<DynamicType = ()> + HasStatus + Clone + Send + Sync + 'static,
{
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        Ok(self
            .objects
            .read()
            .get(&ObjectKey::new(namespace, name))
            .cloned())
    }

    async fn list(&self, query: &QueryOptions) -> Result<Vec<K>> {
        list_across_clusters(query, |selector| {
            let items: Vec<K> = self
                .objects
                .read()
                .values()
                .filter(|obj| match &query.namespace {
                    Some(ns) => obj.namespace().as_deref() == Some(ns.as_str()),
                    None => true,
                })
                .filter(|obj| selector_matches(selector.as_deref(), obj.labels()))
                .cloned()
                .collect();
            async move { Ok(items) }
        })
        .await
    }

    async fn create(&self, obj: &K) -> Result<K> {
        let key = ObjectKey::of(obj);
        let mut objects = self.objects.write();

        if objects.contains_key(&key) {
            return Err(Error::ResourceExists {
                kind: Self::kind(),
                name: key.to_string(),
            });
        }

        let mut stored = obj.clone();
        let meta = stored.meta_mut();
        meta.resource_version = Some(self.next_revision());
        meta.uid = Some(format!("{}-{}", key.namespace, key.name));
        meta.generation = Some(1);
        meta.deletion_timestamp = None;

        objects.insert(key, stored.clone());
        Ok(stored)
    }

    async fn replace(&self, obj: &K) -> Result<K> {
        let key = ObjectKey::of(obj);
        let mut objects = self.objects.write();
        let current = objects.get(&key).ok_or_else(|| Self::not_found(&key))?;

        if self.take_injected_conflict() {
            return Err(Self::conflict(&key));
        }
        Self::check_version(current, obj, &key)?;

        let mut updated = obj.clone();
        updated.set_status(current.status().cloned());
        let deletion_timestamp = current.meta().deletion_timestamp.clone();

        let meta = updated.meta_mut();
        meta.deletion_timestamp = deletion_timestamp;
        meta.resource_version = Some(self.next_revision());

        Ok(self.store_or_release(&mut objects, key, updated))
    }

    async fn replace_status(&self, obj: &K) -> Result<K> {
        let key = ObjectKey::of(obj);
        let mut objects = self.objects.write();
        let current = objects.get(&key).ok_or_else(|| Self::not_found(&key))?;
        Self::check_version(current, obj, &key)?;

        let mut updated = current.clone();
        updated.set_status(obj.status().cloned());
        updated.meta_mut().resource_version = Some(self.next_revision());

        objects.insert(key, updated.clone());
        Ok(updated)
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        let key = ObjectKey::new(namespace, name);
        let mut objects = self.objects.write();
        let current = objects.get(&key).ok_or_else(|| Self::not_found(&key))?;

        if current.finalizers().is_empty() {
            objects.remove(&key);
            return Ok(());
        }

        if current.meta().deletion_timestamp.is_none() {
            let mut marked = current.clone();
            let meta = marked.meta_mut();
            meta.deletion_timestamp = Some(Time(chrono::Utc::now()));
            meta.resource_version = Some(self.next_revision());
            objects.insert(key, marked);
        }
        Ok(())
    }
}

// =============================================================================
// Static Node Inventory
// =============================================================================

/// Fixed set of nodes, for tests and clusters without node access
#[derive(Debug, Clone, Default)]
pub struct StaticNodeInventory {
    nodes: Vec<NodeInfo>,
}

impl StaticNodeInventory {
    pub fn new(nodes: Vec<NodeInfo>) -> Self {
        Self { nodes }
    }
}

#[async_trait]
impl NodeInventory for StaticNodeInventory {
    async fn list_nodes(&self, selector: Option<&str>) -> Result<Vec<NodeInfo>> {
        Ok(self
            .nodes
            .iter()
            .filter(|n| selector_matches(selector, &n.labels))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::v1beta1::{NamespacedName, VMSnapshot, VMSnapshotSpec};
    use crate::crd::{LABEL_CLUSTER, LABEL_WORKSPACE};
    use assert_matches::assert_matches;

    fn snapshot(name: &str, cluster: Option<&str>) -> VMSnapshot {
        let mut snap = VMSnapshot::new(
            name,
            VMSnapshotSpec {
                source_ref: NamespacedName {
                    namespace: "default".into(),
                    name: "vm-1".into(),
                },
                included_disks: vec!["root".into()],
                retain_policy: "Retain".into(),
            },
        );
        snap.metadata.namespace = Some("default".into());
        if let Some(cluster) = cluster {
            snap.labels_mut().insert(LABEL_CLUSTER.into(), cluster.into());
        }
        snap
    }

    #[tokio::test]
    async fn test_stale_replace_conflicts() {
        let store = MemoryStore::new();
        let created = store.create(&snapshot("s1", None)).await.unwrap();

        let mut first = created.clone();
        first.finalizers_mut().push("a".into());
        store.replace(&first).await.unwrap();

        let mut stale = created;
        stale.finalizers_mut().push("b".into());
        assert_matches!(store.replace(&stale).await, Err(Error::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_status_path_is_separate() {
        let store = MemoryStore::new();
        let created = store.create(&snapshot("s1", None)).await.unwrap();

        let mut with_status = created.clone();
        with_status.status_mut().ready_to_use = true;
        with_status.spec.retain_policy = "Delete".into();
        let written = store.replace_status(&with_status).await.unwrap();

        assert_eq!(written.spec.retain_policy, "Retain");
        assert!(written.status.as_ref().unwrap().ready_to_use);

        let mut spec_only = written.clone();
        spec_only.set_status(None);
        let replaced = store.replace(&spec_only).await.unwrap();
        assert!(replaced.status.as_ref().unwrap().ready_to_use);
    }

    #[tokio::test]
    async fn test_two_phase_delete() {
        let store = MemoryStore::new();
        let mut created = store.create(&snapshot("s1", None)).await.unwrap();
        created.finalizers_mut().push("keep".into());
        store.replace(&created).await.unwrap();

        store.delete("default", "s1").await.unwrap();
        let marked = store.get("default", "s1").await.unwrap().unwrap();
        assert!(marked.meta().deletion_timestamp.is_some());

        let mut released = marked;
        released.finalizers_mut().clear();
        store.replace(&released).await.unwrap();
        assert!(store.get("default", "s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_injected_conflicts_are_consumed() {
        let store = MemoryStore::new();
        let created = store.create(&snapshot("s1", None)).await.unwrap();
        store.inject_conflicts(1);

        assert!(store.replace(&created).await.unwrap_err().is_conflict());
        assert!(store.replace(&created).await.is_ok());
    }

    #[tokio::test]
    async fn test_list_across_clusters() {
        let store = MemoryStore::new();
        store.create(&snapshot("a", Some("east"))).await.unwrap();
        store.create(&snapshot("b", Some("west"))).await.unwrap();
        store.create(&snapshot("c", Some("north"))).await.unwrap();

        let all = store.list(&QueryOptions::all().with_clusters(["all"])).await.unwrap();
        assert_eq!(all.len(), 3);

        let two = store
            .list(&QueryOptions::in_namespace("default").with_clusters(["west", "east", ""]))
            .await
            .unwrap();
        let names: Vec<_> = two.iter().map(|s| s.name_any()).collect();
        assert_eq!(names, vec!["b", "a"]);

        let other_ns = store.list(&QueryOptions::in_namespace("other")).await.unwrap();
        assert!(other_ns.is_empty());
    }

    #[tokio::test]
    async fn test_list_by_workspace() {
        let store = MemoryStore::new();
        let mut owned = snapshot("owned", Some("east"));
        owned.labels_mut().insert(LABEL_WORKSPACE.into(), "ws-a".into());
        store.create(&owned).await.unwrap();
        store.create(&snapshot("stray", Some("east"))).await.unwrap();

        let found = store
            .list(&QueryOptions::all().with_clusters(["east"]).with_workspace("ws-a"))
            .await
            .unwrap();
        let names: Vec<_> = found.iter().map(|s| s.name_any()).collect();
        assert_eq!(names, vec!["owned"]);
    }

    #[tokio::test]
    async fn test_static_node_inventory_selector() {
        let inventory = StaticNodeInventory::new(vec![
            NodeInfo::new("n1").with_label("sriov.capable", "true"),
            NodeInfo::new("n2"),
        ]);

        assert_eq!(inventory.list_nodes(None).await.unwrap().len(), 2);
        assert_eq!(
            inventory.list_nodes(Some("sriov.capable=true")).await.unwrap().len(),
            1
        );
    }
}
