//! `v1alpha1` - the original served revision
//!
//! Kept for existing clients. Objects are stored as `v1beta1` and converted on
//! read; see [`crate::conversion`].

pub mod virtual_disk;
pub mod virtual_machine;
pub mod virtual_net;
pub mod vm_snapshot;
pub mod vm_template;

pub use virtual_disk::*;
pub use virtual_machine::*;
pub use virtual_net::*;
pub use vm_snapshot::*;
pub use vm_template::*;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Reference to an object in a specific namespace
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct NamespacedName {
    #[serde(default)]
    pub namespace: String,
    pub name: String,
}

/// Reference to an object in the same namespace
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct LocalObjectReference {
    pub name: String,
}
