//! Conversion Layer
//!
//! Bidirectional conversion between the served revisions. Every kind converts
//! through the hub (`v1beta1`): typed `to_hub`/`from_hub` pairs per kind, and
//! a [`ConversionRegistry`] table keyed by (source revision, target revision,
//! kind) that operates on untyped JSON objects for the conversion webhook.

pub mod virtual_disk;
pub mod virtual_machine;
pub mod virtual_net;
pub mod vm_snapshot;
pub mod vm_template;

pub use kube::core::conversion::{ConversionRequest, ConversionResponse, ConversionReview};

use crate::crd::{v1alpha1 as alpha, v1beta1 as hub, API_GROUP};
use crate::error::{Error, Result};
use kube::core::Status;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;
use tracing::{debug, warn};

// =============================================================================
// Revisions & Kinds
// =============================================================================

/// A served API revision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiRevision {
    V1alpha1,
    V1beta1,
}

impl ApiRevision {
    /// Revision every other revision converts through
    pub const HUB: ApiRevision = ApiRevision::V1beta1;

    pub fn as_str(&self) -> &'static str {
        match self {
            ApiRevision::V1alpha1 => "v1alpha1",
            ApiRevision::V1beta1 => "v1beta1",
        }
    }

    /// Full `group/version` string
    pub fn api_version(&self) -> String {
        format!("{}/{}", API_GROUP, self.as_str())
    }

    /// Parse a `group/version` string of this API group
    pub fn from_api_version(api_version: &str) -> Result<Self> {
        match api_version.split_once('/') {
            Some((group, version)) if group == API_GROUP => version.parse(),
            _ => Err(Error::Configuration(format!(
                "apiVersion {} is not served by {}",
                api_version, API_GROUP
            ))),
        }
    }
}

impl std::fmt::Display for ApiRevision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApiRevision {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "v1alpha1" => Ok(ApiRevision::V1alpha1),
            "v1beta1" => Ok(ApiRevision::V1beta1),
            other => Err(Error::Configuration(format!("unknown API revision {}", other))),
        }
    }
}

/// Kinds of the API group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    VirtualMachine,
    VirtualDisk,
    VirtualNet,
    VMSnapshot,
    VMTemplate,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 5] = [
        ResourceKind::VirtualMachine,
        ResourceKind::VirtualDisk,
        ResourceKind::VirtualNet,
        ResourceKind::VMSnapshot,
        ResourceKind::VMTemplate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::VirtualMachine => "VirtualMachine",
            ResourceKind::VirtualDisk => "VirtualDisk",
            ResourceKind::VirtualNet => "VirtualNet",
            ResourceKind::VMSnapshot => "VMSnapshot",
            ResourceKind::VMTemplate => "VMTemplate",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ResourceKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| Error::Configuration(format!("unknown kind {}", s)))
    }
}

// =============================================================================
// Shared sub-structure conversions
// =============================================================================

pub(crate) fn name_to_hub(n: &alpha::NamespacedName) -> hub::NamespacedName {
    hub::NamespacedName {
        namespace: n.namespace.clone(),
        name: n.name.clone(),
    }
}

pub(crate) fn name_from_hub(n: &hub::NamespacedName) -> alpha::NamespacedName {
    alpha::NamespacedName {
        namespace: n.namespace.clone(),
        name: n.name.clone(),
    }
}

pub(crate) fn local_ref_to_hub(r: &alpha::LocalObjectReference) -> hub::LocalObjectReference {
    hub::LocalObjectReference { name: r.name.clone() }
}

pub(crate) fn local_ref_from_hub(r: &hub::LocalObjectReference) -> alpha::LocalObjectReference {
    alpha::LocalObjectReference { name: r.name.clone() }
}

// =============================================================================
// Conversion Registry
// =============================================================================

type ConvertFn = Box<dyn Fn(Value) -> Result<Value> + Send + Sync>;

/// Lift a typed conversion into one over JSON objects
fn typed<S, D, F>(convert: F) -> ConvertFn
where
    S: DeserializeOwned + 'static,
    D: Serialize + 'static,
    F: Fn(&S) -> D + Send + Sync + 'static,
{
    Box::new(move |value| {
        let source: S = serde_json::from_value(value)?;
        Ok(serde_json::to_value(convert(&source))?)
    })
}

/// Table of conversion functions, built once at start-up
pub struct ConversionRegistry {
    table: HashMap<(ApiRevision, ApiRevision, ResourceKind), ConvertFn>,
}

impl Default for ConversionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversionRegistry {
    /// Registry with every kind registered in both directions
    pub fn new() -> Self {
        use ApiRevision::{V1alpha1, V1beta1};
        use ResourceKind::*;

        let mut registry = Self {
            table: HashMap::new(),
        };

        registry.register(V1alpha1, V1beta1, VirtualMachine, typed(virtual_machine::to_hub));
        registry.register(V1beta1, V1alpha1, VirtualMachine, typed(virtual_machine::from_hub));
        registry.register(V1alpha1, V1beta1, VirtualDisk, typed(virtual_disk::to_hub));
        registry.register(V1beta1, V1alpha1, VirtualDisk, typed(virtual_disk::from_hub));
        registry.register(V1alpha1, V1beta1, VirtualNet, typed(virtual_net::to_hub));
        registry.register(V1beta1, V1alpha1, VirtualNet, typed(virtual_net::from_hub));
        registry.register(V1alpha1, V1beta1, VMSnapshot, typed(vm_snapshot::to_hub));
        registry.register(V1beta1, V1alpha1, VMSnapshot, typed(vm_snapshot::from_hub));
        registry.register(V1alpha1, V1beta1, VMTemplate, typed(vm_template::to_hub));
        registry.register(V1beta1, V1alpha1, VMTemplate, typed(vm_template::from_hub));

        registry
    }

    fn register(&mut self, from: ApiRevision, to: ApiRevision, kind: ResourceKind, convert: ConvertFn) {
        self.table.insert((from, to, kind), convert);
    }

    /// Whether a conversion path exists
    pub fn supports(&self, from: ApiRevision, to: ApiRevision, kind: ResourceKind) -> bool {
        from == to || self.table.contains_key(&(from, to, kind))
    }

    /// Convert a JSON object between revisions
    ///
    /// Same-revision requests return the object unchanged. Paths without a
    /// direct entry go through the hub.
    pub fn convert_value(&self, object: Value, from: ApiRevision, to: ApiRevision, kind: ResourceKind) -> Result<Value> {
        if from == to {
            return Ok(object);
        }

        let converted = match self.table.get(&(from, to, kind)) {
            Some(convert) => convert(object),
            None if from != ApiRevision::HUB && to != ApiRevision::HUB => {
                let via_hub = self.convert_value(object, from, ApiRevision::HUB, kind)?;
                return self.convert_value(via_hub, ApiRevision::HUB, to, kind);
            }
            None => {
                return Err(Error::ConversionUnsupported {
                    kind: kind.to_string(),
                    from: from.to_string(),
                    to: to.to_string(),
                })
            }
        };

        let mut converted = converted.map_err(|e| Error::ConversionFailed {
            kind: kind.to_string(),
            from: from.to_string(),
            to: to.to_string(),
            reason: e.to_string(),
        })?;

        if let Some(obj) = converted.as_object_mut() {
            obj.insert("apiVersion".to_string(), Value::String(to.api_version()));
            obj.insert("kind".to_string(), Value::String(kind.to_string()));
        }
        Ok(converted)
    }

    /// Convert an object to `desired_api_version`, reading its own apiVersion and kind
    pub fn convert(&self, object: Value, desired_api_version: &str) -> Result<Value> {
        let to = ApiRevision::from_api_version(desired_api_version)?;
        let from = object
            .get("apiVersion")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Configuration("object has no apiVersion".into()))
            .and_then(ApiRevision::from_api_version)?;
        let kind: ResourceKind = object
            .get("kind")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Configuration("object has no kind".into()))?
            .parse()?;

        debug!("Converting {} from {} to {}", kind, from, to);
        self.convert_value(object, from, to, kind)
    }

    /// Answer a ConversionReview
    ///
    /// Either every object converts or the response carries a failure and no
    /// objects.
    pub fn review(&self, review: ConversionReview) -> ConversionReview {
        let mut request = match ConversionRequest::from_review(review) {
            Ok(request) => request,
            Err(_) => return malformed_review("conversion review has no request"),
        };

        let desired = request.desired_api_version.clone();
        let converted: Result<Vec<Value>> = std::mem::take(&mut request.objects)
            .into_iter()
            .map(|object| self.convert(object, &desired))
            .collect();

        let response = ConversionResponse::for_request(request);
        let response = match converted {
            Ok(objects) => response.success(objects),
            Err(e) => {
                warn!("Conversion to {} failed: {}", desired, e);
                response.failure(Status::failure(&e.to_string(), "ConversionFailed"))
            }
        };
        response.into_review()
    }
}

/// Failure answer for a body that is not a ConversionReview
pub fn malformed_review(message: &str) -> ConversionReview {
    ConversionResponse::invalid(Status::failure(message, "InvalidRequest")).into_review()
}
