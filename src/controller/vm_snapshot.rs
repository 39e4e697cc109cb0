//! VMSnapshot Reconciler
//!
//! Keeps the snapshot engine in sync with each VMSnapshot and releases
//! engine state before the finalizer is removed.

use super::{
    ensure_finalizer, lifecycle_state, log_and_requeue, log_outcome, remove_finalizer, watch_api,
    write_status, LifecycleState, OperatorConfig,
};
use crate::crd::v1beta1::VMSnapshot;
use crate::crd::{reason, set_condition, Condition, SNAPSHOT_FINALIZER};
use crate::domain::ports::{Clock, ObjectKey, ObjectStore, SnapshotBackend};
use crate::error::{Error, Result};
use crate::metrics::Metrics;
use futures::StreamExt;
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher;
use kube::Client;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

const KIND: &str = "VMSnapshot";

/// Reconciler context for VMSnapshots
pub struct VMSnapshotReconciler {
    store: Arc<dyn ObjectStore<VMSnapshot>>,
    engine: Arc<dyn SnapshotBackend>,
    clock: Arc<dyn Clock>,
    config: OperatorConfig,
    metrics: Option<Metrics>,
}

impl VMSnapshotReconciler {
    pub fn new(
        store: Arc<dyn ObjectStore<VMSnapshot>>,
        engine: Arc<dyn SnapshotBackend>,
        clock: Arc<dyn Clock>,
        config: OperatorConfig,
    ) -> Self {
        Self {
            store,
            engine,
            clock,
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub async fn reconcile_key(&self, key: &ObjectKey) -> Result<Action> {
        let started = Instant::now();
        let outcome = self.reconcile_inner(key).await;
        if let Some(metrics) = &self.metrics {
            metrics.observe_reconcile(KIND, outcome.is_ok(), started.elapsed());
        }
        outcome
    }

    async fn reconcile_inner(&self, key: &ObjectKey) -> Result<Action> {
        let current = self.store.get(&key.namespace, &key.name).await?;
        let state = lifecycle_state(current.as_ref(), SNAPSHOT_FINALIZER);
        let Some(snapshot) = current else {
            debug!("VMSnapshot {} is gone, nothing to do", key);
            return Ok(Action::await_change());
        };

        match state {
            LifecycleState::Gone => Ok(Action::await_change()),
            LifecycleState::Fresh => {
                let attempts = self.config.conflict_attempts;
                match ensure_finalizer(self.store.as_ref(), &snapshot, SNAPSHOT_FINALIZER, attempts).await? {
                    Some(registered) => self.sync(registered).await,
                    None => Ok(Action::await_change()),
                }
            }
            LifecycleState::Registered => self.sync(snapshot).await,
            LifecycleState::Draining => self.release(snapshot).await,
        }
    }

    async fn sync(&self, snapshot: VMSnapshot) -> Result<Action> {
        let key = ObjectKey::of(&snapshot);
        let outcome = self.engine.sync(&snapshot).await;
        if let Some(metrics) = &self.metrics {
            metrics.observe_backend(self.engine.backend_name(), "sync", &outcome);
        }

        let now = self.clock.now();
        let mut updated = snapshot;
        let status = updated.status.get_or_insert_with(Default::default);

        match outcome {
            Ok(()) => {
                status.ready_to_use = true;
                set_condition(
                    &mut status.conditions,
                    Condition::ready(reason::SYNCED, "snapshot is ready to use", now),
                );
                match write_status(self.store.as_ref(), &updated, self.config.conflict_attempts).await? {
                    Some(_) => {
                        info!("VMSnapshot {} synced", key);
                        Ok(Action::requeue(self.config.resync_interval))
                    }
                    None => Ok(Action::await_change()),
                }
            }
            Err(e) => {
                warn!("Sync of VMSnapshot {} failed: {}", key, e);
                set_condition(
                    &mut status.conditions,
                    Condition::not_ready(reason::SYNC_FAILED, e.to_string(), now),
                );
                if let Err(write_err) =
                    write_status(self.store.as_ref(), &updated, self.config.conflict_attempts).await
                {
                    warn!("Failed to record sync failure on VMSnapshot {}: {}", key, write_err);
                }
                Err(e)
            }
        }
    }

    async fn release(&self, snapshot: VMSnapshot) -> Result<Action> {
        let key = ObjectKey::of(&snapshot);
        info!("Deleting snapshot content for VMSnapshot {}", key);

        let outcome = self.engine.delete(&snapshot).await;
        if let Some(metrics) = &self.metrics {
            metrics.observe_backend(self.engine.backend_name(), "delete", &outcome);
        }

        if let Err(e) = outcome {
            warn!("Teardown of VMSnapshot {} failed: {}", key, e);
            let mut updated = snapshot;
            set_condition(
                &mut updated.status.get_or_insert_with(Default::default).conditions,
                Condition::not_ready(reason::TEARDOWN_FAILED, e.to_string(), self.clock.now()),
            );
            if let Err(write_err) = write_status(self.store.as_ref(), &updated, self.config.conflict_attempts).await
            {
                debug!("Could not record teardown failure on {}: {}", key, write_err);
            }
            return Err(e);
        }

        remove_finalizer(self.store.as_ref(), &snapshot, SNAPSHOT_FINALIZER, self.config.conflict_attempts).await?;
        info!("VMSnapshot {} released", key);
        Ok(Action::await_change())
    }
}

pub async fn reconcile(snapshot: Arc<VMSnapshot>, ctx: Arc<VMSnapshotReconciler>) -> Result<Action> {
    ctx.reconcile_key(&ObjectKey::of(snapshot.as_ref())).await
}

pub fn error_policy(snapshot: Arc<VMSnapshot>, error: &Error, ctx: Arc<VMSnapshotReconciler>) -> Action {
    log_and_requeue(KIND, &ObjectKey::of(snapshot.as_ref()), error, &ctx.config)
}

/// Watch VMSnapshots and reconcile them until shutdown
pub async fn run(client: Client, ctx: Arc<VMSnapshotReconciler>) {
    let api = watch_api::<VMSnapshot>(client, ctx.config.watch_namespace.as_deref());
    info!("Starting {} controller", KIND);

    Controller::new(api, watcher::Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|outcome| async move { log_outcome(KIND, outcome) })
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{ManualClock, SnapshotEngineAdapter};
    use crate::crd::v1beta1::{NamespacedName, VMSnapshotSpec};
    use crate::crd::{find_condition, ConditionStatus, CONDITION_READY};
    use crate::store::MemoryStore;
    use chrono::Utc;

    fn setup() -> (Arc<MemoryStore<VMSnapshot>>, Arc<SnapshotEngineAdapter>, VMSnapshotReconciler) {
        let store = Arc::new(MemoryStore::new());
        let engine = Arc::new(SnapshotEngineAdapter::new());
        let reconciler = VMSnapshotReconciler::new(
            store.clone(),
            engine.clone(),
            Arc::new(ManualClock::new(Utc::now())),
            OperatorConfig::default(),
        );
        (store, engine, reconciler)
    }

    fn snapshot() -> VMSnapshot {
        let mut snap = VMSnapshot::new(
            "snap-1",
            VMSnapshotSpec {
                source_ref: NamespacedName {
                    namespace: "default".into(),
                    name: "vm-1".into(),
                },
                included_disks: vec!["root".into()],
                ..Default::default()
            },
        );
        snap.metadata.namespace = Some("default".into());
        snap
    }

    fn key() -> ObjectKey {
        ObjectKey::new("default", "snap-1")
    }

    #[tokio::test]
    async fn test_sync_marks_ready_to_use() {
        let (store, engine, reconciler) = setup();
        store.create(&snapshot()).await.unwrap();

        let action = reconciler.reconcile_key(&key()).await.unwrap();
        assert_eq!(action, Action::requeue(reconciler.config.resync_interval));

        let status = store.get("default", "snap-1").await.unwrap().unwrap().status.unwrap();
        assert!(status.ready_to_use);
        assert!(engine.content(&key()).await.is_some());
    }

    #[tokio::test]
    async fn test_sync_failure_leaves_ready_to_use() {
        let (store, engine, reconciler) = setup();
        store.create(&snapshot()).await.unwrap();
        reconciler.reconcile_key(&key()).await.unwrap();

        engine.faults().fail("sync", "engine offline");
        assert!(reconciler.reconcile_key(&key()).await.is_err());

        let status = store.get("default", "snap-1").await.unwrap().unwrap().status.unwrap();
        assert!(status.ready_to_use);
        let ready = find_condition(&status.conditions, CONDITION_READY).unwrap();
        assert_eq!(ready.status, ConditionStatus::False);
        assert_eq!(ready.reason.as_deref(), Some(reason::SYNC_FAILED));
    }

    #[tokio::test]
    async fn test_delete_releases_engine_content() {
        let (store, engine, reconciler) = setup();
        store.create(&snapshot()).await.unwrap();
        reconciler.reconcile_key(&key()).await.unwrap();

        store.delete("default", "snap-1").await.unwrap();
        reconciler.reconcile_key(&key()).await.unwrap();

        assert!(store.get("default", "snap-1").await.unwrap().is_none());
        assert!(engine.content(&key()).await.is_none());
        assert_eq!(engine.calls().count("delete"), 1);
    }
}
