//! Reconciliation Engine
//!
//! One reconciler per kind with a finalizer:
//! - [`VirtualMachineReconciler`]: backing volumes, network attachments,
//!   backend instance and power state
//! - [`VMSnapshotReconciler`]: snapshot engine sync
//! - [`VMTemplateReconciler`]: template catalog sync
//!
//! All three share the finalizer lifecycle below. Teardown only happens while
//! the finalizer token is present and the token is removed by the last write
//! of a successful teardown, so a crash at any point leaves the object in a
//! state the next pass can resume from.

pub mod virtual_machine;
pub mod vm_snapshot;
pub mod vm_template;

pub use virtual_machine::VirtualMachineReconciler;
pub use vm_snapshot::VMSnapshotReconciler;
pub use vm_template::VMTemplateReconciler;

use crate::crd::HasStatus;
use crate::domain::ports::{ObjectKey, ObjectStore};
use crate::error::{Error, ErrorAction, Result};
use backoff::ExponentialBackoff;
use k8s_openapi::NamespaceResourceScope;
use kube::runtime::controller::{self, Action};
use kube::runtime::reflector::ObjectRef;
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, info, warn};

// =============================================================================
// Configuration
// =============================================================================

/// Intervals and limits shared by the reconcilers
#[derive(Debug, Clone)]
pub struct OperatorConfig {
    /// Re-issue power calls when the last sync is older than this
    pub drift_check_interval: Duration,
    /// Requeue interval for snapshots and templates after success
    pub resync_interval: Duration,
    /// Requeue interval for transient failures
    pub error_requeue_interval: Duration,
    /// Bound on re-read/reapply rounds for optimistic-concurrency conflicts
    pub conflict_attempts: u32,
    /// Restrict watches to one namespace
    pub watch_namespace: Option<String>,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            drift_check_interval: Duration::from_secs(60),
            resync_interval: Duration::from_secs(300),
            error_requeue_interval: Duration::from_secs(15),
            conflict_attempts: 5,
            watch_namespace: None,
        }
    }
}

// =============================================================================
// Lifecycle State Machine
// =============================================================================

/// Finalizer lifecycle of an object, derived from its deletion marker and
/// finalizer token only
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Exists without the token
    Fresh,
    /// Token present, not being deleted
    Registered,
    /// Deletion requested, token still present
    Draining,
    /// Absent, or being deleted without the token
    Gone,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleState::Fresh => write!(f, "Fresh"),
            LifecycleState::Registered => write!(f, "Registered"),
            LifecycleState::Draining => write!(f, "Draining"),
            LifecycleState::Gone => write!(f, "Gone"),
        }
    }
}

pub fn has_finalizer<K: Resource>(obj: &K, token: &str) -> bool {
    obj.finalizers().iter().any(|f| f == token)
}

/// Classify an object for the finalizer state machine
pub fn lifecycle_state<K: Resource>(obj: Option<&K>, token: &str) -> LifecycleState {
    let Some(obj) = obj else {
        return LifecycleState::Gone;
    };

    let deleting = obj.meta().deletion_timestamp.is_some();
    match (deleting, has_finalizer(obj, token)) {
        (false, false) => LifecycleState::Fresh,
        (false, true) => LifecycleState::Registered,
        (true, true) => LifecycleState::Draining,
        (true, false) => LifecycleState::Gone,
    }
}

// =============================================================================
// Conflict-retried writes
// =============================================================================

/// Run `op` until it succeeds, fails with a non-conflict error, or `attempts`
/// conflicts have been seen
pub async fn retry_on_conflict<T, F, Fut>(attempts: u32, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let policy = ExponentialBackoff {
        initial_interval: Duration::from_millis(10),
        max_interval: Duration::from_millis(500),
        max_elapsed_time: None,
        ..Default::default()
    };

    let mut attempt = 0u32;
    backoff::future::retry(policy, || {
        attempt += 1;
        let current = attempt;
        let fut = op();
        async move {
            match fut.await {
                Ok(value) => Ok(value),
                Err(e) if e.is_conflict() && current < attempts => {
                    debug!("Write conflict on attempt {}, re-reading", current);
                    Err(backoff::Error::transient(e))
                }
                Err(e) => Err(backoff::Error::permanent(e)),
            }
        }
    })
    .await
}

/// Load the latest copy unless a fresh one is already at hand
async fn latest<K, S>(store: &S, key: &ObjectKey, candidate: Option<K>) -> Result<Option<K>>
where
    K: Clone + Send + Sync + 'static,
    S: ObjectStore<K> + ?Sized,
{
    match candidate {
        Some(obj) => Ok(Some(obj)),
        None => store.get(&key.namespace, &key.name).await,
    }
}

/// Add `token` to the object's finalizers through the metadata write path
///
/// Returns the stored object, or `None` if it disappeared.
pub async fn ensure_finalizer<K, S>(
    store: &S,
    obj: &K,
    token: &str,
    attempts: u32,
) -> Result<Option<K>>
where
    K: Resource + Clone + Send + Sync + 'static,
    S: ObjectStore<K> + ?Sized,
{
    let key = ObjectKey::of(obj);
    let key = &key;
    let mut candidate = Some(obj.clone());

    let outcome = retry_on_conflict(attempts, || {
        let candidate = candidate.take();
        async move {
            let Some(mut current) = latest(store, key, candidate).await? else {
                return Ok(None);
            };
            if has_finalizer(&current, token) {
                return Ok(Some(current));
            }
            current.finalizers_mut().push(token.to_string());
            store.replace(&current).await.map(Some)
        }
    })
    .await;

    match outcome {
        Ok(Some(stored)) => {
            info!("Added finalizer {} to {}", token, key);
            Ok(Some(stored))
        }
        Err(e) if e.is_not_found() => Ok(None),
        other => other,
    }
}

/// Remove `token` from the object's finalizers; the last write of a teardown
pub async fn remove_finalizer<K, S>(
    store: &S,
    obj: &K,
    token: &str,
    attempts: u32,
) -> Result<()>
where
    K: Resource + Clone + Send + Sync + 'static,
    S: ObjectStore<K> + ?Sized,
{
    let key = ObjectKey::of(obj);
    let key = &key;
    let mut candidate = Some(obj.clone());

    let outcome = retry_on_conflict(attempts, || {
        let candidate = candidate.take();
        async move {
            let Some(mut current) = latest(store, key, candidate).await? else {
                return Ok(());
            };
            if !has_finalizer(&current, token) {
                return Ok(());
            }
            current.finalizers_mut().retain(|f| f != token);
            store.replace(&current).await.map(|_| ())
        }
    })
    .await;

    match outcome {
        Err(e) if e.is_not_found() => Ok(()),
        other => {
            if other.is_ok() {
                info!("Removed finalizer {} from {}", token, key);
            }
            other
        }
    }
}

/// Write `obj`'s status block through the status path
///
/// On conflict the latest copy is re-read and the same status applied to it.
/// Returns `None` if the object disappeared.
pub async fn write_status<K, S>(store: &S, obj: &K, attempts: u32) -> Result<Option<K>>
where
    K: Resource + HasStatus + Clone + Send + Sync + 'static,
    S: ObjectStore<K> + ?Sized,
{
    let key = ObjectKey::of(obj);
    let key = &key;
    let status = obj.status().cloned();
    let mut candidate = Some(obj.clone());

    let outcome = retry_on_conflict(attempts, || {
        let candidate = candidate.take();
        let status = status.clone();
        async move {
            let Some(mut target) = latest(store, key, candidate).await? else {
                return Ok(None);
            };
            target.set_status(status);
            store.replace_status(&target).await.map(Some)
        }
    })
    .await;

    match outcome {
        Err(e) if e.is_not_found() => Ok(None),
        other => other,
    }
}

// =============================================================================
// Error Policy
// =============================================================================

/// Map a reconcile error to the controller runtime's requeue decision
pub fn requeue_for(error: &Error, config: &OperatorConfig) -> Action {
    match error.action() {
        ErrorAction::RequeueWithBackoff => Action::requeue(config.error_requeue_interval),
        ErrorAction::RequeueAfter(after) => Action::requeue(after),
        ErrorAction::NoRequeue => Action::await_change(),
    }
}

/// Shared `error_policy` body for every controller
pub(crate) fn log_and_requeue(kind: &str, key: &ObjectKey, error: &Error, config: &OperatorConfig) -> Action {
    warn!("Reconcile of {} {} failed: {}", kind, key, error);
    requeue_for(error, config)
}

// =============================================================================
// Controller Wiring
// =============================================================================

/// Api handle for watching a kind, cluster-wide or in one namespace
pub(crate) fn watch_api<K>(client: Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()> + Clone + DeserializeOwned + Debug,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

/// Log one item of a controller's output stream
pub(crate) fn log_outcome<K, QueueErr>(
    kind: &str,
    outcome: std::result::Result<(ObjectRef<K>, Action), controller::Error<Error, QueueErr>>,
) where
    K: Resource,
    QueueErr: std::error::Error + 'static,
{
    match outcome {
        Ok((obj, _)) => debug!(
            "Reconciled {} {}/{}",
            kind,
            obj.namespace.as_deref().unwrap_or_default(),
            obj.name
        ),
        Err(controller::Error::ReconcilerFailed(e, obj)) => {
            debug!("Reconcile of {} {} will be retried: {}", kind, obj.name, e)
        }
        Err(e) => error!("{} controller error: {}", kind, e),
    }
}
