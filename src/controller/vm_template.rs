//! VMTemplate Reconciler
//!
//! Publishes templates to the catalog and withdraws them on deletion.

use super::{
    ensure_finalizer, lifecycle_state, log_and_requeue, log_outcome, remove_finalizer, watch_api,
    write_status, LifecycleState, OperatorConfig,
};
use crate::crd::v1beta1::VMTemplate;
use crate::crd::{reason, set_condition, Condition, TEMPLATE_FINALIZER};
use crate::domain::ports::{CatalogBackend, Clock, ObjectKey, ObjectStore};
use crate::error::{Error, Result};
use crate::metrics::Metrics;
use futures::StreamExt;
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher;
use kube::Client;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

const KIND: &str = "VMTemplate";

/// Reconciler context for VMTemplates
pub struct VMTemplateReconciler {
    store: Arc<dyn ObjectStore<VMTemplate>>,
    catalog: Arc<dyn CatalogBackend>,
    clock: Arc<dyn Clock>,
    config: OperatorConfig,
    metrics: Option<Metrics>,
}

impl VMTemplateReconciler {
    pub fn new(
        store: Arc<dyn ObjectStore<VMTemplate>>,
        catalog: Arc<dyn CatalogBackend>,
        clock: Arc<dyn Clock>,
        config: OperatorConfig,
    ) -> Self {
        Self {
            store,
            catalog,
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
        let state = lifecycle_state(current.as_ref(), TEMPLATE_FINALIZER);
        let Some(template) = current else {
            debug!("VMTemplate {} is gone, nothing to do", key);
            return Ok(Action::await_change());
        };

        match state {
            LifecycleState::Gone => Ok(Action::await_change()),
            LifecycleState::Fresh => {
                let attempts = self.config.conflict_attempts;
                match ensure_finalizer(self.store.as_ref(), &template, TEMPLATE_FINALIZER, attempts).await? {
                    Some(registered) => self.publish(registered).await,
                    None => Ok(Action::await_change()),
                }
            }
            LifecycleState::Registered => self.publish(template).await,
            LifecycleState::Draining => self.withdraw(template).await,
        }
    }

    async fn publish(&self, template: VMTemplate) -> Result<Action> {
        let key = ObjectKey::of(&template);
        let outcome = self.catalog.sync(&template).await;
        if let Some(metrics) = &self.metrics {
            metrics.observe_backend(self.catalog.backend_name(), "sync", &outcome);
        }

        let now = self.clock.now();
        let mut updated = template;
        let conditions = &mut updated.status.get_or_insert_with(Default::default).conditions;

        match outcome {
            Ok(()) => {
                set_condition(conditions, Condition::ready(reason::SYNCED, "template published", now));
                match write_status(self.store.as_ref(), &updated, self.config.conflict_attempts).await? {
                    Some(_) => {
                        debug!("VMTemplate {} published", key);
                        Ok(Action::requeue(self.config.resync_interval))
                    }
                    None => Ok(Action::await_change()),
                }
            }
            Err(e) => {
                warn!("Publishing VMTemplate {} failed: {}", key, e);
                set_condition(conditions, Condition::not_ready(reason::SYNC_FAILED, e.to_string(), now));
                if let Err(write_err) =
                    write_status(self.store.as_ref(), &updated, self.config.conflict_attempts).await
                {
                    warn!("Failed to record sync failure on VMTemplate {}: {}", key, write_err);
                }
                Err(e)
            }
        }
    }

    async fn withdraw(&self, template: VMTemplate) -> Result<Action> {
        let key = ObjectKey::of(&template);
        info!("Removing VMTemplate {} from the catalog", key);

        let outcome = self.catalog.remove(&template).await;
        if let Some(metrics) = &self.metrics {
            metrics.observe_backend(self.catalog.backend_name(), "remove", &outcome);
        }

        if let Err(e) = outcome {
            warn!("Teardown of VMTemplate {} failed: {}", key, e);
            let mut updated = template;
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

        remove_finalizer(self.store.as_ref(), &template, TEMPLATE_FINALIZER, self.config.conflict_attempts).await?;
        info!("VMTemplate {} released", key);
        Ok(Action::await_change())
    }
}

pub async fn reconcile(template: Arc<VMTemplate>, ctx: Arc<VMTemplateReconciler>) -> Result<Action> {
    ctx.reconcile_key(&ObjectKey::of(template.as_ref())).await
}

pub fn error_policy(template: Arc<VMTemplate>, error: &Error, ctx: Arc<VMTemplateReconciler>) -> Action {
    log_and_requeue(KIND, &ObjectKey::of(template.as_ref()), error, &ctx.config)
}

/// Watch VMTemplates and reconcile them until shutdown
pub async fn run(client: Client, ctx: Arc<VMTemplateReconciler>) {
    let api = watch_api::<VMTemplate>(client, ctx.config.watch_namespace.as_deref());
    info!("Starting {} controller", KIND);

    Controller::new(api, watcher::Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|outcome| async move { log_outcome(KIND, outcome) })
        .await;
}
