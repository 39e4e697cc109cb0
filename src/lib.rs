//! Virtualization Operator
//!
//! Lifecycle operator for VirtualMachine-shaped custom resources. Desired
//! state is submitted as objects; control loops drive backend state towards
//! it and report progress through status conditions.
//!
//! # Architecture
//!
//! ```text
//! client write
//!     │
//!     ▼
//! ┌──────────────┐   ┌──────────────────────┐
//! │  Admission   │   │   Conversion Layer    │
//! │ default +    │   │ v1alpha1 <-> v1beta1  │
//! │ validate     │   │ (hub)                 │
//! └──────┬───────┘   └──────────────────────┘
//!        ▼
//!    Resource store ── watch ──► Reconciliation Engine
//!        ▲                         │  VirtualMachine / VMSnapshot / VMTemplate
//!        │                         ▼
//!        └──── status ───── Backend collaborators
//!                           (KubeVirt, CDI, Multus, snapshot engine, catalog)
//! ```
//!
//! # Modules
//!
//! - [`crd`]: custom resources for both API revisions
//! - [`controller`]: finalizer-gated reconcilers
//! - [`conversion`]: revision conversion and the ConversionReview handler
//! - [`admission`]: defaulting and validation hooks
//! - [`backends`]: collaborator adapters
//! - [`store`]: resource store adapters
//! - [`domain`]: ports the engine depends on
//! - [`webhook`]: HTTP surface for admission and conversion
//! - [`error`]: error types and handling

pub mod admission;
pub mod backends;
pub mod controller;
pub mod conversion;
pub mod crd;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod store;
pub mod webhook;

pub use admission::{AdmissionHook, VMSnapshotAdmission, VMTemplateAdmission, VirtualMachineAdmission};

pub use backends::{BackendConfig, BackendFactory, Backends};

pub use controller::{
    LifecycleState, OperatorConfig, VMSnapshotReconciler, VMTemplateReconciler, VirtualMachineReconciler,
};

pub use conversion::{ApiRevision, ConversionRegistry, ConversionReview, ResourceKind};

pub use crd::v1beta1::{VMSnapshot, VMTemplate, VirtualDisk, VirtualMachine, VirtualNet};
pub use crd::{Condition, ConditionStatus, ConversionWebhook, DiskType, NetworkType, PowerState, VmPhase};

pub use domain::ports::{
    CatalogBackend, Clock, NetworkAttachmentBackend, NodeInventory, ObjectKey, ObjectStore, SnapshotBackend,
    SystemClock, VmInstanceBackend, VolumeBackend,
};

pub use error::{Error, ErrorAction, Result};

pub use metrics::Metrics;

pub use store::{KubeNodeInventory, KubeStore, MemoryStore, QueryOptions, StaticNodeInventory};

pub use webhook::{TlsFiles, WebhookServer, WebhookServerConfig, WebhookState};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
