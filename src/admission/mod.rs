//! Admission Layer
//!
//! Defaulting and validation for hub-revision objects, run synchronously
//! before a write is accepted. Each kind provides an [`AdmissionHook`]; the
//! review functions here wrap a hook in the `admission.k8s.io/v1` wire format.
//!
//! The mutating path answers with a JSON Patch replacing `/spec` with the
//! defaulted spec; the validating path only answers allowed or denied.

pub mod virtual_machine;
pub mod vm_snapshot;
pub mod vm_template;

pub use virtual_machine::VirtualMachineAdmission;
pub use vm_snapshot::VMSnapshotAdmission;
pub use vm_template::VMTemplateAdmission;

use crate::error::{Error, Result};
use async_trait::async_trait;
use json_patch::{Patch, PatchOperation, ReplaceOperation};
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use kube::core::{DynamicObject, Status};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

// =============================================================================
// Hook Trait
// =============================================================================

/// Defaulting and validation for one kind
#[async_trait]
pub trait AdmissionHook: Send + Sync {
    type Object: DeserializeOwned + Serialize + Send + Sync;

    fn kind(&self) -> &'static str;

    /// Fill unset fields; `namespace` is the namespace of the request
    fn apply_defaults(&self, obj: &mut Self::Object, namespace: &str);

    /// Check invariants; a denial is returned as [`Error::AdmissionDenied`]
    async fn validate(&self, obj: &Self::Object, namespace: &str) -> Result<()>;
}

/// Operations whose payload carries the object being written
fn is_write(operation: &Operation) -> bool {
    matches!(operation, Operation::Create | Operation::Update)
}

// =============================================================================
// Responses
// =============================================================================

fn reject(request: &AdmissionRequest<DynamicObject>, code: u16, reason: &str, message: String) -> AdmissionResponse {
    let mut response = AdmissionResponse::from(request).deny(&message);
    response.result = Status::failure(&message, reason).with_code(code);
    response
}

fn deny(request: &AdmissionRequest<DynamicObject>, message: String) -> AdmissionResponse {
    reject(request, 403, "Forbidden", message)
}

fn bad_request(request: &AdmissionRequest<DynamicObject>, message: String) -> AdmissionResponse {
    reject(request, 400, "BadRequest", message)
}

/// Response for a review that carries no readable request
fn invalid(message: &str) -> AdmissionResponse {
    let mut response = AdmissionResponse::invalid(message);
    response.result.code = 400;
    response
}

// =============================================================================
// Review Handling
// =============================================================================

/// Which webhook path a review arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionMode {
    Mutating,
    Validating,
}

/// Run a hook against the object in `request`
pub async fn admit<H: AdmissionHook>(
    hook: &H,
    mode: AdmissionMode,
    request: &AdmissionRequest<DynamicObject>,
) -> AdmissionResponse {
    if !is_write(&request.operation) {
        return AdmissionResponse::from(request);
    }

    let Some(raw) = &request.object else {
        return bad_request(request, "request carries no object".to_string());
    };
    let mut obj: H::Object = match serde_json::to_value(raw).and_then(serde_json::from_value) {
        Ok(obj) => obj,
        Err(e) => {
            debug!("Rejecting undecodable {} {}: {}", hook.kind(), request.name, e);
            return bad_request(request, format!("cannot decode {}: {}", hook.kind(), e));
        }
    };

    let namespace = request.namespace.clone().unwrap_or_default();
    hook.apply_defaults(&mut obj, &namespace);
    if let Err(e) = hook.validate(&obj, &namespace).await {
        info!("Denied {} {}/{}: {}", hook.kind(), namespace, request.name, e);
        return deny(request, e.to_string());
    }

    match mode {
        AdmissionMode::Validating => AdmissionResponse::from(request),
        AdmissionMode::Mutating => {
            let patched = spec_patch(&obj).and_then(|patch| {
                AdmissionResponse::from(request)
                    .with_patch(patch)
                    .map_err(|e| Error::Internal(format!("cannot encode patch: {}", e)))
            });
            patched.unwrap_or_else(|e| reject(request, 500, "InternalError", e.to_string()))
        }
    }
}

/// Handle a full review; a review without a request is malformed
pub async fn review<H: AdmissionHook>(
    hook: &H,
    mode: AdmissionMode,
    review: AdmissionReview<DynamicObject>,
) -> AdmissionReview<DynamicObject> {
    let request: AdmissionRequest<DynamicObject> = match review.try_into() {
        Ok(request) => request,
        Err(_) => return invalid("admission review carries no request").into_review(),
    };
    admit(hook, mode, &request).await.into_review()
}

/// Answer for a body that could not be parsed as a review at all
pub fn malformed(message: &str) -> AdmissionReview<DynamicObject> {
    invalid(message).into_review()
}

/// JSON Patch replacing `/spec` with the spec of `obj`
fn spec_patch<T: Serialize>(obj: &T) -> Result<Patch> {
    let value = serde_json::to_value(obj)?;
    let spec = value.get("spec").cloned().unwrap_or(Value::Null);
    Ok(Patch(vec![PatchOperation::Replace(ReplaceOperation {
        path: "/spec".to_string(),
        value: spec,
    })]))
}

/// Build the denial error hooks return
pub(crate) fn denied(message: impl Into<String>) -> Error {
    Error::AdmissionDenied(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::v1beta1::{NamespacedName, VMSnapshot, VMSnapshotSpec};
    use serde_json::json;

    fn snapshot_review(operation: &str, object: Option<Value>) -> AdmissionReview<DynamicObject> {
        serde_json::from_value(json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": "req-1",
                "kind": {"group": "virtualization.kubesphere.io", "version": "v1beta1", "kind": "VMSnapshot"},
                "resource": {"group": "virtualization.kubesphere.io", "version": "v1beta1", "resource": "vmsnapshots"},
                "name": "snap",
                "namespace": "default",
                "operation": operation,
                "userInfo": {},
                "object": object
            }
        }))
        .unwrap()
    }

    fn snapshot_request(operation: &str, object: Option<Value>) -> AdmissionRequest<DynamicObject> {
        snapshot_review(operation, object).try_into().unwrap()
    }

    fn snapshot_object() -> Value {
        let snap = VMSnapshot::new(
            "snap",
            VMSnapshotSpec {
                source_ref: NamespacedName {
                    namespace: String::new(),
                    name: "vm-1".into(),
                },
                included_disks: vec!["root".into()],
                ..Default::default()
            },
        );
        serde_json::to_value(snap).unwrap()
    }

    #[tokio::test]
    async fn test_mutating_response_patches_spec() {
        let request = snapshot_request("CREATE", Some(snapshot_object()));
        let response = admit(&VMSnapshotAdmission, AdmissionMode::Mutating, &request).await;

        assert!(response.allowed);
        assert_eq!(response.uid, "req-1");
        assert_eq!(serde_json::to_value(&response).unwrap()["patchType"], "JSONPatch");

        let ops: Value = serde_json::from_slice(response.patch.as_deref().unwrap()).unwrap();
        assert_eq!(ops[0]["op"], "replace");
        assert_eq!(ops[0]["path"], "/spec");
        assert_eq!(ops[0]["value"]["sourceRef"]["namespace"], "default");
        assert_eq!(ops[0]["value"]["retainPolicy"], "Retain");
    }

    #[tokio::test]
    async fn test_validating_response_has_no_patch() {
        let request = snapshot_request("UPDATE", Some(snapshot_object()));
        let response = admit(&VMSnapshotAdmission, AdmissionMode::Validating, &request).await;
        assert!(response.allowed);
        assert!(response.patch.is_none());
    }

    #[tokio::test]
    async fn test_denial_is_forbidden() {
        let mut object = snapshot_object();
        object["spec"]["includedDisks"] = json!([]);
        let response = admit(&VMSnapshotAdmission, AdmissionMode::Validating, &snapshot_request("CREATE", Some(object))).await;

        assert!(!response.allowed);
        assert_eq!(response.uid, "req-1");
        assert_eq!(response.result.code, 403);
        assert!(response.result.is_failure());
        assert!(response.result.message.contains("includedDisks"));
    }

    #[tokio::test]
    async fn test_malformed_object_is_bad_request() {
        let mut object = snapshot_object();
        object["spec"]["includedDisks"] = json!(3);
        let request = snapshot_request("CREATE", Some(object));
        let response = admit(&VMSnapshotAdmission, AdmissionMode::Mutating, &request).await;
        assert!(!response.allowed);
        assert_eq!(response.uid, "req-1");
        assert_eq!(response.result.code, 400);
    }

    #[tokio::test]
    async fn test_delete_is_allowed_without_object() {
        let request = snapshot_request("DELETE", None);
        assert!(admit(&VMSnapshotAdmission, AdmissionMode::Validating, &request).await.allowed);
    }

    #[tokio::test]
    async fn test_review_without_request() {
        let empty: AdmissionReview<DynamicObject> = serde_json::from_value(json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview"
        }))
        .unwrap();
        let answer = review(&VMSnapshotAdmission, AdmissionMode::Validating, empty).await;
        let response = answer.response.unwrap();
        assert!(!response.allowed);
        assert_eq!(response.result.code, 400);
    }

    #[tokio::test]
    async fn test_review_answers_with_request_uid() {
        let answer = review(
            &VMSnapshotAdmission,
            AdmissionMode::Validating,
            snapshot_review("CREATE", Some(snapshot_object())),
        )
        .await;
        let body = serde_json::to_value(&answer).unwrap();
        assert_eq!(body["apiVersion"], "admission.k8s.io/v1");
        assert_eq!(body["kind"], "AdmissionReview");
        assert_eq!(body["response"]["uid"], "req-1");
        assert_eq!(body["response"]["allowed"], true);
    }
}
