//! VirtualMachine Reconciler
//!
//! Drives a VirtualMachine towards its spec:
//! 1. Register the cleanup finalizer
//! 2. Ensure backing volumes for non-ephemeral disks
//! 3. Validate SR-IOV network attachments
//! 4. Ensure the backend instance
//! 5. Sync power state, re-issuing the power call once the last sync
//!    is older than the drift-check interval
//!
//! Deletion tears down the instance and owned volumes before the finalizer
//! is released.

use super::{
    ensure_finalizer, lifecycle_state, log_and_requeue, log_outcome, remove_finalizer, watch_api,
    write_status, LifecycleState, OperatorConfig,
};
use crate::backends::Backends;
use crate::crd::v1beta1::VirtualMachine;
use crate::crd::{
    reason, set_condition, Condition, ConditionStatus, PowerState, VmPhase, CONDITION_POWER_OPERATION,
    VM_FINALIZER,
};
use crate::domain::ports::{Clock, ObjectKey, ObjectStore};
use crate::error::{Error, Result};
use crate::metrics::Metrics;
use futures::StreamExt;
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher;
use kube::Client;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

const KIND: &str = "VirtualMachine";

/// Reconciler context for VirtualMachines
pub struct VirtualMachineReconciler {
    store: Arc<dyn ObjectStore<VirtualMachine>>,
    backends: Backends,
    clock: Arc<dyn Clock>,
    config: OperatorConfig,
    metrics: Option<Metrics>,
}

impl VirtualMachineReconciler {
    pub fn new(
        store: Arc<dyn ObjectStore<VirtualMachine>>,
        backends: Backends,
        clock: Arc<dyn Clock>,
        config: OperatorConfig,
    ) -> Self {
        Self {
            store,
            backends,
            clock,
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &OperatorConfig {
        &self.config
    }

    /// Run one reconcile pass for the object stored under `key`
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

        match lifecycle_state(current.as_ref(), VM_FINALIZER) {
            LifecycleState::Gone => {
                debug!("VirtualMachine {} is gone, nothing to do", key);
                Ok(Action::await_change())
            }
            LifecycleState::Fresh => {
                let Some(vm) = current else {
                    return Ok(Action::await_change());
                };
                match ensure_finalizer(self.store.as_ref(), &vm, VM_FINALIZER, self.config.conflict_attempts)
                    .await?
                {
                    Some(registered) => self.provision(registered).await,
                    None => Ok(Action::await_change()),
                }
            }
            LifecycleState::Registered => match current {
                Some(vm) => self.provision(vm).await,
                None => Ok(Action::await_change()),
            },
            LifecycleState::Draining => match current {
                Some(vm) => self.teardown(vm).await,
                None => Ok(Action::await_change()),
            },
        }
    }

    // =========================================================================
    // Provisioning
    // =========================================================================

    async fn provision(&self, vm: VirtualMachine) -> Result<Action> {
        if let Err(e) = self.ensure_backing_resources(&vm).await {
            let why = if e.is_configuration() {
                reason::INVALID_CONFIGURATION
            } else {
                reason::BACKING_RESOURCES_FAILED
            };
            warn!("Provisioning VirtualMachine {} failed: {}", ObjectKey::of(&vm), e);
            self.report_failure(vm, why, &e, None).await;
            return Err(e);
        }

        self.sync_power(vm).await
    }

    async fn ensure_backing_resources(&self, vm: &VirtualMachine) -> Result<()> {
        let volumes = &self.backends.volumes;
        for disk in &vm.spec.disks {
            if !disk.disk_type()?.needs_backing_volume() {
                continue;
            }
            self.observed(volumes.backend_name(), "ensure_volume", volumes.ensure_volume(vm, disk))
                .await?;
        }

        let namespace = vm.metadata.namespace.as_deref().unwrap_or_default();
        let networks = &self.backends.networks;
        for net in &vm.spec.nets {
            net.network_type()?;
        }
        for net in vm.sriov_networks() {
            self.observed(
                networks.backend_name(),
                "validate_attachment",
                networks.validate_attachment(namespace, net),
            )
            .await?;
        }

        let instances = &self.backends.instances;
        self.observed(instances.backend_name(), "ensure_instance", instances.ensure_instance(vm))
            .await
    }

    async fn sync_power(&self, vm: VirtualMachine) -> Result<Action> {
        let key = ObjectKey::of(&vm);
        let drift = self.config.drift_check_interval;

        let desired = match vm.desired_power_state() {
            Ok(desired) => desired,
            Err(e) => {
                warn!("VirtualMachine {} has an invalid power state: {}", key, e);
                self.report_failure(vm, reason::INVALID_CONFIGURATION, &e, None).await;
                return Err(e);
            }
        };

        let now = self.clock.now();
        let last_sync = vm.status.as_ref().and_then(|s| s.last_power_sync_time);
        let drift_window = chrono::Duration::from_std(drift).unwrap_or_else(|_| chrono::Duration::seconds(60));
        let stale = last_sync.map_or(true, |at| now - at >= drift_window);

        if vm.observed_power_state() == Some(desired) && !stale {
            debug!("VirtualMachine {} power already {}", key, desired);
            return Ok(Action::requeue(drift));
        }

        let instances = &self.backends.instances;
        let outcome = match desired {
            PowerState::Running => {
                self.observed(instances.backend_name(), "power_on", instances.power_on(&vm))
                    .await
            }
            PowerState::Stopped => {
                self.observed(instances.backend_name(), "power_off", instances.power_off(&vm))
                    .await
            }
        };

        if let Err(e) = outcome {
            warn!("Power sync of VirtualMachine {} to {} failed: {}", key, desired, e);
            let power_condition = Condition::new(
                CONDITION_POWER_OPERATION,
                ConditionStatus::False,
                reason::POWER_SYNC_FAILED,
                e.to_string(),
                now,
            );
            self.report_failure(vm, reason::POWER_SYNC_FAILED, &e, Some(power_condition)).await;
            return Err(e);
        }

        info!("VirtualMachine {} power synced to {}", key, desired);
        let mut updated = vm;
        let status = updated.status.get_or_insert_with(Default::default);
        status.power_state = desired.to_string();
        status.phase = VmPhase::from(desired).to_string();
        status.last_power_sync_time = Some(now);
        set_condition(
            &mut status.conditions,
            Condition::new(
                CONDITION_POWER_OPERATION,
                ConditionStatus::True,
                reason::POWER_SYNCED,
                format!("power state is {}", desired),
                now,
            ),
        );
        set_condition(
            &mut status.conditions,
            Condition::ready(reason::POWER_SYNCED, format!("power state is {}", desired), now),
        );

        match write_status(self.store.as_ref(), &updated, self.config.conflict_attempts).await? {
            Some(_) => Ok(Action::requeue(drift)),
            None => Ok(Action::await_change()),
        }
    }

    // =========================================================================
    // Teardown
    // =========================================================================

    async fn teardown(&self, vm: VirtualMachine) -> Result<Action> {
        let key = ObjectKey::of(&vm);
        info!("Tearing down VirtualMachine {}", key);

        let instances = &self.backends.instances;
        let volumes = &self.backends.volumes;
        let released = async {
            self.observed(instances.backend_name(), "cleanup", instances.cleanup(&vm))
                .await?;
            self.observed(volumes.backend_name(), "delete_owned_volumes", volumes.delete_owned_volumes(&vm))
                .await
        }
        .await;

        if let Err(e) = released {
            warn!("Teardown of VirtualMachine {} failed: {}", key, e);
            let mut updated = vm;
            let now = self.clock.now();
            let status = updated.status.get_or_insert_with(Default::default);
            status.phase = VmPhase::Terminating.to_string();
            set_condition(
                &mut status.conditions,
                Condition::not_ready(reason::TEARDOWN_FAILED, e.to_string(), now),
            );
            if let Err(write_err) = write_status(self.store.as_ref(), &updated, self.config.conflict_attempts).await
            {
                debug!("Could not record teardown failure on {}: {}", key, write_err);
            }
            return Err(e);
        }

        remove_finalizer(self.store.as_ref(), &vm, VM_FINALIZER, self.config.conflict_attempts).await?;
        info!("VirtualMachine {} released", key);
        Ok(Action::await_change())
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Record `Ready=False` with `why`; status write failures are only logged
    async fn report_failure(&self, vm: VirtualMachine, why: &str, error: &Error, extra: Option<Condition>) {
        let key = ObjectKey::of(&vm);
        let now = self.clock.now();
        let mut updated = vm;
        let status = updated.status.get_or_insert_with(Default::default);
        set_condition(&mut status.conditions, Condition::not_ready(why, error.to_string(), now));
        if let Some(condition) = extra {
            set_condition(&mut status.conditions, condition);
        }

        if let Err(e) = write_status(self.store.as_ref(), &updated, self.config.conflict_attempts).await {
            warn!("Failed to record failure on VirtualMachine {}: {}", key, e);
        }
    }

    async fn observed<T>(&self, backend: &str, operation: &str, call: impl Future<Output = Result<T>>) -> Result<T> {
        let outcome = call.await;
        if let Some(metrics) = &self.metrics {
            metrics.observe_backend(backend, operation, &outcome);
        }
        outcome
    }
}

// =============================================================================
// Controller wiring
// =============================================================================

pub async fn reconcile(vm: Arc<VirtualMachine>, ctx: Arc<VirtualMachineReconciler>) -> Result<Action> {
    ctx.reconcile_key(&ObjectKey::of(vm.as_ref())).await
}

pub fn error_policy(vm: Arc<VirtualMachine>, error: &Error, ctx: Arc<VirtualMachineReconciler>) -> Action {
    log_and_requeue(KIND, &ObjectKey::of(vm.as_ref()), error, &ctx.config)
}

/// Watch VirtualMachines and reconcile them until shutdown
pub async fn run(client: Client, ctx: Arc<VirtualMachineReconciler>) {
    let api = watch_api::<VirtualMachine>(client, ctx.config.watch_namespace.as_deref());
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
    use crate::backends::{
        CatalogAdapter, CdiConfig, CdiVolumeAdapter, KubeVirtAdapter, KubeVirtConfig, ManualClock, MultusAdapter,
        MultusConfig, SnapshotEngineAdapter,
    };
    use crate::crd::v1beta1::{
        LocalObjectReference, NamespacedName, VirtualMachineDisk, VirtualMachineNetwork, VirtualMachineSpec,
    };
    use crate::crd::{find_condition, is_condition_true, CONDITION_READY};
    use crate::store::MemoryStore;
    use assert_matches::assert_matches;
    use chrono::Utc;
    use std::time::Duration;

    struct Harness {
        store: Arc<MemoryStore<VirtualMachine>>,
        kubevirt: Arc<KubeVirtAdapter>,
        cdi: Arc<CdiVolumeAdapter>,
        multus: Arc<MultusAdapter>,
        clock: Arc<ManualClock>,
        reconciler: VirtualMachineReconciler,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let kubevirt = Arc::new(KubeVirtAdapter::new(KubeVirtConfig::default()));
        let cdi = Arc::new(CdiVolumeAdapter::new(CdiConfig::default()));
        let multus = Arc::new(MultusAdapter::new(MultusConfig::default()));
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let backends = Backends {
            instances: kubevirt.clone(),
            volumes: cdi.clone(),
            networks: multus.clone(),
            snapshots: Arc::new(SnapshotEngineAdapter::new()),
            catalog: Arc::new(CatalogAdapter::new()),
        };
        let reconciler =
            VirtualMachineReconciler::new(store.clone(), backends, clock.clone(), OperatorConfig::default());
        Harness {
            store,
            kubevirt,
            cdi,
            multus,
            clock,
            reconciler,
        }
    }

    fn disk(name: &str, kind: &str) -> VirtualMachineDisk {
        VirtualMachineDisk {
            r#type: kind.into(),
            disk_ref: LocalObjectReference { name: name.into() },
            ..Default::default()
        }
    }

    fn vm(power: &str) -> VirtualMachine {
        let mut vm = VirtualMachine::new(
            "vm-1",
            VirtualMachineSpec {
                cpu: "2".into(),
                memory: "4Gi".into(),
                power_state: power.into(),
                disks: vec![disk("root", "system"), disk("scratch", "ephemeral")],
                nets: vec![VirtualMachineNetwork {
                    r#type: "masquerade".into(),
                    ..Default::default()
                }],
                ..Default::default()
            },
        );
        vm.metadata.namespace = Some("default".into());
        vm
    }

    fn sriov_vm() -> VirtualMachine {
        let mut vm = vm("Running");
        vm.spec.nets.push(VirtualMachineNetwork {
            r#type: "sriov".into(),
            nad_ref: Some(NamespacedName {
                namespace: String::new(),
                name: "sriov-net".into(),
            }),
            sriov_resource: "intel.com/sriov_netdevice".into(),
            ..Default::default()
        });
        vm
    }

    fn key() -> ObjectKey {
        ObjectKey::new("default", "vm-1")
    }

    async fn stored(h: &Harness) -> VirtualMachine {
        h.store.get("default", "vm-1").await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_first_pass_registers_and_provisions() {
        let h = harness();
        h.store.create(&vm("Running")).await.unwrap();

        let action = h.reconciler.reconcile_key(&key()).await.unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(60)));

        let vm = stored(&h).await;
        assert_eq!(vm.metadata.finalizers, Some(vec![VM_FINALIZER.to_string()]));

        let status = vm.status.unwrap();
        assert_eq!(status.power_state, "Running");
        assert_eq!(status.phase, "Running");
        assert!(status.last_power_sync_time.is_some());
        assert!(is_condition_true(&status.conditions, CONDITION_READY));

        assert_eq!(h.cdi.owned_volumes(&key()).await, vec!["dv-vm-1-root".to_string()]);
        assert_eq!(h.kubevirt.calls().count("power_on"), 1);
    }

    #[tokio::test]
    async fn test_power_off_once_then_idempotent() {
        let h = harness();
        h.store.create(&vm("Stopped")).await.unwrap();

        h.reconciler.reconcile_key(&key()).await.unwrap();
        h.reconciler.reconcile_key(&key()).await.unwrap();
        assert_eq!(h.kubevirt.calls().count("power_off"), 1);
        assert_eq!(stored(&h).await.status.unwrap().phase, "Stopped");

        h.clock.advance(chrono::Duration::seconds(61));
        h.reconciler.reconcile_key(&key()).await.unwrap();
        assert_eq!(h.kubevirt.calls().count("power_off"), 2);
    }

    #[tokio::test]
    async fn test_unknown_power_state_is_invalid_configuration() {
        let h = harness();
        h.store.create(&vm("Paused")).await.unwrap();

        let err = h.reconciler.reconcile_key(&key()).await.unwrap_err();
        assert_matches!(err, Error::UnknownPowerState(ref s) if s == "Paused");

        let status = stored(&h).await.status.unwrap();
        let ready = find_condition(&status.conditions, CONDITION_READY).unwrap();
        assert_eq!(ready.status, ConditionStatus::False);
        assert_eq!(ready.reason.as_deref(), Some(reason::INVALID_CONFIGURATION));
    }

    #[tokio::test]
    async fn test_unknown_disk_type_stops_before_instance() {
        let h = harness();
        let mut bad = vm("Running");
        bad.spec.disks.push(disk("odd", "floppy"));
        h.store.create(&bad).await.unwrap();

        assert_matches!(
            h.reconciler.reconcile_key(&key()).await,
            Err(Error::UnsupportedDiskType(_))
        );
        assert_eq!(h.kubevirt.calls().count("ensure_instance"), 0);
    }

    #[tokio::test]
    async fn test_volume_failure_reports_backing_resources() {
        let h = harness();
        h.cdi.faults().fail("ensure_volume", "quota exceeded");
        h.store.create(&vm("Running")).await.unwrap();

        assert!(h.reconciler.reconcile_key(&key()).await.is_err());

        let status = stored(&h).await.status.unwrap();
        let ready = find_condition(&status.conditions, CONDITION_READY).unwrap();
        assert_eq!(ready.reason.as_deref(), Some(reason::BACKING_RESOURCES_FAILED));
        assert!(ready.message.as_deref().unwrap().contains("quota exceeded"));
    }

    #[tokio::test]
    async fn test_sriov_network_validated_before_instance() {
        let h = harness();
        h.store.create(&sriov_vm()).await.unwrap();

        h.reconciler.reconcile_key(&key()).await.unwrap();
        assert_eq!(h.multus.calls().count("validate_attachment"), 1);
        assert_eq!(h.kubevirt.calls().count("ensure_instance"), 1);
        assert!(is_condition_true(&stored(&h).await.status.unwrap().conditions, CONDITION_READY));
    }

    #[tokio::test]
    async fn test_masquerade_network_skips_attachment_check() {
        let h = harness();
        h.store.create(&vm("Running")).await.unwrap();

        h.reconciler.reconcile_key(&key()).await.unwrap();
        assert_eq!(h.multus.calls().count("validate_attachment"), 0);
    }

    #[tokio::test]
    async fn test_attachment_failure_skips_instance() {
        let h = harness();
        h.multus.faults().fail("validate_attachment", "NAD sriov-net not found");
        h.store.create(&sriov_vm()).await.unwrap();

        assert_matches!(
            h.reconciler.reconcile_key(&key()).await,
            Err(Error::BackendOperationFailed { ref operation, .. }) if operation == "validate_attachment"
        );
        assert_eq!(h.multus.calls().count("validate_attachment"), 1);
        assert_eq!(h.kubevirt.calls().count("ensure_instance"), 0);
        assert_eq!(h.kubevirt.calls().count("power_on"), 0);

        let status = stored(&h).await.status.unwrap();
        let ready = find_condition(&status.conditions, CONDITION_READY).unwrap();
        assert_eq!(ready.status, ConditionStatus::False);
        assert_eq!(ready.reason.as_deref(), Some(reason::BACKING_RESOURCES_FAILED));
        assert!(ready.message.as_deref().unwrap().contains("sriov-net"));
    }

    #[tokio::test]
    async fn test_instance_failure_reports_backing_resources() {
        let h = harness();
        h.kubevirt.faults().fail("ensure_instance", "admission webhook unavailable");
        h.store.create(&vm("Running")).await.unwrap();

        assert!(h.reconciler.reconcile_key(&key()).await.is_err());
        assert_eq!(h.kubevirt.calls().count("power_on"), 0);

        let status = stored(&h).await.status.unwrap();
        let ready = find_condition(&status.conditions, CONDITION_READY).unwrap();
        assert_eq!(ready.status, ConditionStatus::False);
        assert_eq!(ready.reason.as_deref(), Some(reason::BACKING_RESOURCES_FAILED));
        assert!(ready.message.as_deref().unwrap().contains("admission webhook unavailable"));
        assert!(status.last_power_sync_time.is_none());
        assert_eq!(h.kubevirt.instance_count().await, 0);
    }

    #[tokio::test]
    async fn test_power_failure_sets_power_condition() {
        let h = harness();
        h.kubevirt.faults().fail("power_on", "libvirt down");
        h.store.create(&vm("Running")).await.unwrap();

        assert!(h.reconciler.reconcile_key(&key()).await.is_err());

        let status = stored(&h).await.status.unwrap();
        let power = find_condition(&status.conditions, CONDITION_POWER_OPERATION).unwrap();
        assert_eq!(power.status, ConditionStatus::False);
        assert!(status.last_power_sync_time.is_none());
    }

    #[tokio::test]
    async fn test_teardown_failure_keeps_finalizer() {
        let h = harness();
        h.store.create(&vm("Running")).await.unwrap();
        h.reconciler.reconcile_key(&key()).await.unwrap();

        h.store.delete("default", "vm-1").await.unwrap();
        h.kubevirt.faults().fail("cleanup", "timeout");

        assert!(h.reconciler.reconcile_key(&key()).await.is_err());
        let vm = stored(&h).await;
        assert_eq!(vm.metadata.finalizers, Some(vec![VM_FINALIZER.to_string()]));
        assert_eq!(vm.status.unwrap().phase, "Terminating");

        h.kubevirt.faults().clear_all();
        assert_eq!(
            h.reconciler.reconcile_key(&key()).await.unwrap(),
            Action::await_change()
        );
        assert!(h.store.get("default", "vm-1").await.unwrap().is_none());
        assert!(h.cdi.owned_volumes(&key()).await.is_empty());
        assert_eq!(h.kubevirt.instance_count().await, 0);
    }

    #[tokio::test]
    async fn test_absent_object_is_noop() {
        let h = harness();
        assert_eq!(
            h.reconciler.reconcile_key(&key()).await.unwrap(),
            Action::await_change()
        );
        assert_eq!(h.kubevirt.calls().count("ensure_instance"), 0);
    }
}
