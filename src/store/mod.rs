//! Resource Store adapters
//!
//! - [`KubeStore`]: `kube::Api` backed store used by the running operator
//! - [`MemoryStore`]: in-process store with optimistic concurrency, a separate
//!   status path and two-phase deletion, used by tests and local runs
//!
//! Listing supports multi-cluster aggregation: objects carry the
//! `kubesphere.io/cluster` label and a query naming several clusters is fanned
//! out into one list per cluster whose results are concatenated. Workspace
//! and project filters narrow every per-cluster list through their labels.

pub mod kubernetes;
pub mod memory;

pub use kubernetes::{KubeNodeInventory, KubeStore};
pub use memory::{MemoryStore, StaticNodeInventory};

use crate::crd::{LABEL_CLUSTER, LABEL_PROJECT, LABEL_WORKSPACE};
use crate::error::Result;
use std::collections::{BTreeMap, HashSet};
use std::future::Future;

/// Cluster name meaning "no cluster filter"
pub const ALL_CLUSTERS: &str = "all";

// =============================================================================
// Query Options
// =============================================================================

/// Scope of a list request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryOptions {
    /// Restrict to one namespace; `None` lists every namespace
    pub namespace: Option<String>,
    /// Clusters to aggregate over; empty or `all` disables the filter
    pub clusters: Vec<String>,
    /// Restrict to objects labelled with this workspace
    pub workspace: Option<String>,
    /// Restrict to objects labelled with this project
    pub project: Option<String>,
}

impl QueryOptions {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn in_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            ..Default::default()
        }
    }

    pub fn with_clusters<I, S>(mut self, clusters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.clusters = clusters.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_workspace(mut self, workspace: impl Into<String>) -> Self {
        self.workspace = Some(workspace.into());
        self
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    /// Label selector for one list call against `cluster`
    pub fn selector_for(&self, cluster: Option<&str>) -> Option<String> {
        let terms: Vec<String> = [
            cluster.and_then(cluster_selector),
            tenancy_term(LABEL_WORKSPACE, self.workspace.as_deref()),
            tenancy_term(LABEL_PROJECT, self.project.as_deref()),
        ]
        .into_iter()
        .flatten()
        .collect();

        if terms.is_empty() {
            None
        } else {
            Some(terms.join(","))
        }
    }
}

fn tenancy_term(label: &str, value: Option<&str>) -> Option<String> {
    value
        .filter(|v| !v.is_empty())
        .map(|v| format!("{}={}", label, v))
}

/// Normalize a cluster list
///
/// Empty names are dropped and duplicates removed keeping first-seen order.
/// If `all` appears anywhere the result is exactly `["all"]`.
pub fn normalize_clusters(clusters: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut normalized = Vec::with_capacity(clusters.len());

    for cluster in clusters {
        if cluster.is_empty() {
            continue;
        }
        if cluster == ALL_CLUSTERS {
            return vec![ALL_CLUSTERS.to_string()];
        }
        if seen.insert(cluster.as_str()) {
            normalized.push(cluster.clone());
        }
    }

    normalized
}

/// Label selector restricting a list to one cluster
pub fn cluster_selector(cluster: &str) -> Option<String> {
    if cluster.is_empty() || cluster == ALL_CLUSTERS {
        None
    } else {
        Some(format!("{}={}", LABEL_CLUSTER, cluster))
    }
}

/// Run `list_one` once per normalized cluster and concatenate the results
///
/// `list_one` receives the label selector for the cluster combined with the
/// tenancy filters, or `None` when nothing filters. Zero or one cluster
/// results in a single call.
pub async fn list_across_clusters<K, F, Fut>(query: &QueryOptions, mut list_one: F) -> Result<Vec<K>>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<Vec<K>>>,
{
    let clusters = normalize_clusters(&query.clusters);

    if clusters.len() <= 1 {
        let selector = query.selector_for(clusters.first().map(String::as_str));
        return list_one(selector).await;
    }

    let mut aggregated = Vec::new();
    for cluster in &clusters {
        aggregated.extend(list_one(query.selector_for(Some(cluster))).await?);
    }
    Ok(aggregated)
}

/// Evaluate an equality-based label selector (`a=b,c=d`) against labels
pub fn selector_matches(selector: Option<&str>, labels: &BTreeMap<String, String>) -> bool {
    let Some(selector) = selector else {
        return true;
    };

    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((key, value)) => labels.get(key.trim()).map(String::as_str) == Some(value.trim()),
            None => labels.contains_key(term),
        })
}
