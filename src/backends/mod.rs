//! Default Backend Adapters
//!
//! In-memory tracking adapters satisfying every collaborator contract:
//! - KubeVirt: VM instances and power
//! - CDI: disk volumes owned by VMs
//! - Multus: network attachment validation
//! - Snapshot engine
//! - Template catalog
//!
//! Each adapter records the calls it receives and can be told to fail a
//! named operation, which is how the reconcilers' failure paths are exercised.

pub mod catalog;
pub mod cdi;
pub mod kubevirt;
pub mod multus;
pub mod snapshot;

pub use catalog::*;
pub use cdi::*;
pub use kubevirt::*;
pub use multus::*;
pub use snapshot::*;

use crate::domain::ports::{
    CatalogBackend, Clock, NetworkAttachmentBackend, SnapshotBackend, VmInstanceBackend, VolumeBackend,
};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

// =============================================================================
// Fault Injection
// =============================================================================

/// Table of operations that should fail, keyed by operation name
#[derive(Debug, Default)]
pub struct FaultInjector {
    faults: DashMap<String, String>,
}

impl FaultInjector {
    /// Make every call of `operation` fail with `reason` until cleared
    pub fn fail(&self, operation: &str, reason: &str) {
        self.faults.insert(operation.to_string(), reason.to_string());
    }

    pub fn clear(&self, operation: &str) {
        self.faults.remove(operation);
    }

    pub fn clear_all(&self) {
        self.faults.clear();
    }

    /// Return the injected failure for `operation`, if any
    pub fn check(&self, backend: &str, operation: &str) -> Result<()> {
        match self.faults.get(operation) {
            Some(reason) => Err(Error::backend(backend, operation, reason.value().clone())),
            None => Ok(()),
        }
    }
}

/// Per-operation call counters
#[derive(Debug, Default)]
pub struct CallLog {
    calls: Mutex<BTreeMap<String, usize>>,
}

impl CallLog {
    pub fn record(&self, operation: &str) {
        *self.calls.lock().entry(operation.to_string()).or_insert(0) += 1;
    }

    /// Number of calls of `operation`, including failed ones
    pub fn count(&self, operation: &str) -> usize {
        self.calls.lock().get(operation).copied().unwrap_or(0)
    }

    pub fn reset(&self) {
        self.calls.lock().clear();
    }
}

// =============================================================================
// Backend Set
// =============================================================================

/// The collaborators a running operator needs
#[derive(Clone)]
pub struct Backends {
    pub instances: Arc<dyn VmInstanceBackend>,
    pub volumes: Arc<dyn VolumeBackend>,
    pub networks: Arc<dyn NetworkAttachmentBackend>,
    pub snapshots: Arc<dyn SnapshotBackend>,
    pub catalog: Arc<dyn CatalogBackend>,
}

/// Combined backend configuration
#[derive(Debug, Clone, Default)]
pub struct BackendConfig {
    pub kubevirt: KubeVirtConfig,
    pub cdi: CdiConfig,
    pub multus: MultusConfig,
}

/// Factory for the default backend set
pub struct BackendFactory;

impl BackendFactory {
    /// Build every default adapter from configuration
    pub fn create(config: BackendConfig) -> Backends {
        Backends {
            instances: Arc::new(KubeVirtAdapter::new(config.kubevirt)),
            volumes: Arc::new(CdiVolumeAdapter::new(config.cdi)),
            networks: Arc::new(MultusAdapter::new(config.multus)),
            snapshots: Arc::new(SnapshotEngineAdapter::new()),
            catalog: Arc::new(CatalogAdapter::new()),
        }
    }
}

// =============================================================================
// Manual Clock
// =============================================================================

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_fault_injector() {
        let faults = FaultInjector::default();
        assert!(faults.check("kubevirt", "cleanup").is_ok());

        faults.fail("cleanup", "boom");
        assert_matches!(
            faults.check("kubevirt", "cleanup"),
            Err(Error::BackendOperationFailed { reason, .. }) if reason == "boom"
        );

        faults.clear("cleanup");
        assert!(faults.check("kubevirt", "cleanup").is_ok());
    }

    #[test]
    fn test_call_log() {
        let log = CallLog::default();
        log.record("power_off");
        log.record("power_off");
        assert_eq!(log.count("power_off"), 2);
        assert_eq!(log.count("power_on"), 0);
    }

    #[test]
    fn test_manual_clock_advances() {
        let start = Utc::now();
        let clock = ManualClock::new(start);
        clock.advance(chrono::Duration::seconds(61));
        assert_eq!(clock.now() - start, chrono::Duration::seconds(61));
    }
}
