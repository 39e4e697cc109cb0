//! Kubernetes API backed Resource Store

use super::{list_across_clusters, QueryOptions};
use crate::domain::ports::{NodeInfo, NodeInventory, ObjectKey, ObjectStore};
use crate::error::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use std::marker::PhantomData;
use tracing::debug;

/// Store writing through the Kubernetes API server
pub struct KubeStore<K> {
    client: Client,
    _kind: PhantomData<fn() -> K>,
}

impl<K> KubeStore<K> {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            _kind: PhantomData,
        }
    }
}

impl<K> KubeStore<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + DeserializeOwned
        + Debug,
{
    fn api(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn key(obj: &K) -> Result<ObjectKey> {
        let namespace = obj
            .namespace()
            .ok_or_else(|| Error::Internal(format!("{} {} has no namespace", K::kind(&()), obj.name_any())))?;
        Ok(ObjectKey::new(namespace, obj.name_any()))
    }

    /// Translate API status codes into the store error taxonomy
    fn map_error(err: kube::Error, key: &ObjectKey) -> Error {
        let kind = K::kind(&()).to_string();
        match err {
            kube::Error::Api(ae) if ae.code == 404 => Error::ResourceNotFound {
                kind,
                name: key.to_string(),
            },
            kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => {
                Error::ResourceExists {
                    kind,
                    name: key.to_string(),
                }
            }
            kube::Error::Api(ae) if ae.code == 409 => Error::Conflict {
                kind,
                name: key.to_string(),
            },
            other => Error::Kube(other),
        }
    }
}

#[async_trait]
impl<K> ObjectStore<K> for KubeStore<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + Serialize
        + DeserializeOwned
        + Debug
        + Send
        + Sync
        + 'static,
{
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        Ok(self.api(namespace).get_opt(name).await?)
    }

    async fn list(&self, query: &QueryOptions) -> Result<Vec<K>> {
        let api: Api<K> = match &query.namespace {
            Some(ns) => self.api(ns),
            None => Api::all(self.client.clone()),
        };

        list_across_clusters(query, |selector| {
            let api = api.clone();
            async move {
                let mut params = ListParams::default();
                if let Some(selector) = &selector {
                    params = params.labels(selector);
                }
                let list = api.list(&params).await?;
                debug!("Listed {} {} objects (selector {:?})", list.items.len(), K::kind(&()), selector);
                Ok(list.items)
            }
        })
        .await
    }

    async fn create(&self, obj: &K) -> Result<K> {
        let key = Self::key(obj)?;
        self.api(&key.namespace)
            .create(&PostParams::default(), obj)
            .await
            .map_err(|e| Self::map_error(e, &key))
    }

    async fn replace(&self, obj: &K) -> Result<K> {
        let key = Self::key(obj)?;
        self.api(&key.namespace)
            .replace(&key.name, &PostParams::default(), obj)
            .await
            .map_err(|e| Self::map_error(e, &key))
    }

    async fn replace_status(&self, obj: &K) -> Result<K> {
        let key = Self::key(obj)?;
        let body = serde_json::to_vec(obj)?;
        self.api(&key.namespace)
            .replace_status(&key.name, &PostParams::default(), body)
            .await
            .map_err(|e| Self::map_error(e, &key))
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        let key = ObjectKey::new(namespace, name);
        self.api(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| Self::map_error(e, &key))?;
        Ok(())
    }
}

// =============================================================================
// Node Inventory
// =============================================================================

/// Node inventory reading `core/v1` Nodes
#[derive(Clone)]
pub struct KubeNodeInventory {
    client: Client,
}

impl KubeNodeInventory {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn node_info(node: &Node) -> NodeInfo {
    let allocatable = node
        .status
        .as_ref()
        .and_then(|s| s.allocatable.as_ref())
        .map(|a| a.iter().map(|(k, q)| (k.clone(), q.0.clone())).collect())
        .unwrap_or_default();

    NodeInfo {
        name: node.name_any(),
        labels: node.labels().clone(),
        allocatable,
    }
}

#[async_trait]
impl NodeInventory for KubeNodeInventory {
    async fn list_nodes(&self, selector: Option<&str>) -> Result<Vec<NodeInfo>> {
        let api: Api<Node> = Api::all(self.client.clone());
        let mut params = ListParams::default();
        if let Some(selector) = selector {
            params = params.labels(selector);
        }
        let nodes = api.list(&params).await?;
        Ok(nodes.items.iter().map(node_info).collect())
    }
}
