//! Admission behaviour through the webhook router
//!
//! Posts AdmissionReviews the way the API server does and checks the
//! decision, the denial message and the defaulting patch.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use virtualization_operator::admission::AdmissionMode;
use virtualization_operator::domain::ports::NodeInfo;
use virtualization_operator::webhook::{admission_path, router};
use virtualization_operator::{ConversionRegistry, StaticNodeInventory, VirtualMachineAdmission, WebhookState};

// =============================================================================
// Helpers
// =============================================================================

fn sriov_node() -> NodeInfo {
    NodeInfo::new("worker-sriov").with_label("sriov.capable", "true")
}

fn hugepage_node(size: &str) -> NodeInfo {
    NodeInfo::new(format!("worker-hp-{}", size.to_lowercase())).with_allocatable(&format!("hugepages-{}", size), "8Gi")
}

async fn post_review(nodes: Vec<NodeInfo>, mode: AdmissionMode, resource: &str, object: Value) -> Value {
    let state = WebhookState::new(
        VirtualMachineAdmission::new(Arc::new(StaticNodeInventory::new(nodes))),
        Arc::new(ConversionRegistry::new()),
    );
    let review = json!({
        "apiVersion": "admission.k8s.io/v1",
        "kind": "AdmissionReview",
        "request": {
            "uid": "req-1",
            "kind": {"group": "virtualization.kubesphere.io", "version": "v1beta1", "kind": object["kind"]},
            "resource": {"group": "virtualization.kubesphere.io", "version": "v1beta1", "resource": format!("{}s", resource)},
            "name": object["metadata"]["name"],
            "namespace": "tenant-a",
            "operation": "CREATE",
            "userInfo": {"username": "tenant-admin"},
            "object": object
        }
    });

    let request = Request::builder()
        .method("POST")
        .uri(admission_path(mode, resource))
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&review).unwrap()))
        .unwrap();
    let response = router(state).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["response"]["uid"], "req-1");
    body["response"].clone()
}

fn vm(nets: Value, hugepages: &str) -> Value {
    json!({
        "apiVersion": "virtualization.kubesphere.io/v1beta1",
        "kind": "VirtualMachine",
        "metadata": {"name": "vm-1", "namespace": "tenant-a"},
        "spec": {
            "cpu": "2",
            "memory": "4Gi",
            "hugepages": hugepages,
            "disks": [{"type": "system", "diskRef": {"name": "root"}}],
            "nets": nets
        }
    })
}

fn denial(response: &Value) -> String {
    assert_eq!(response["allowed"], false, "expected denial, got {}", response);
    response["status"]["message"].as_str().unwrap_or_default().to_string()
}

// =============================================================================
// VirtualMachine
// =============================================================================

#[tokio::test]
async fn test_mutating_patch_carries_defaults() {
    let nets = json!([{"type": "masquerade"}]);
    let response = post_review(vec![], AdmissionMode::Mutating, "virtualmachine", vm(nets, "")).await;

    assert_eq!(response["allowed"], true);
    assert_eq!(response["patchType"], "JSONPatch");

    let raw: Vec<u8> = serde_json::from_value(response["patch"].clone()).unwrap();
    let patch: Value = serde_json::from_slice(&raw).unwrap();
    assert_eq!(patch[0]["op"], "replace");
    assert_eq!(patch[0]["path"], "/spec");
    assert_eq!(patch[0]["value"]["numaPolicy"], "none");
    assert_eq!(patch[0]["value"]["powerState"], "Running");
}

#[tokio::test]
async fn test_sriov_matrix() {
    let nad = json!({"namespace": "tenant-a", "name": "sriov-net"});
    let cases = vec![
        (
            json!([{"type": "sriov", "sriovResource": "intel.com/sriov"}]),
            vec![sriov_node()],
            Some("nadRef"),
        ),
        (
            json!([{"type": "sriov", "nadRef": nad}]),
            vec![sriov_node()],
            Some("sriovResource"),
        ),
        (
            json!([{"type": "sriov", "nadRef": nad, "sriovResource": "intel.com/sriov"}]),
            vec![NodeInfo::new("plain")],
            Some("sriov.capable=true"),
        ),
        (
            json!([{"type": "sriov", "nadRef": nad, "sriovResource": "intel.com/sriov"}]),
            vec![NodeInfo::new("plain"), sriov_node()],
            None,
        ),
    ];

    for (nets, nodes, expected) in cases {
        let response = post_review(nodes, AdmissionMode::Validating, "virtualmachine", vm(nets, "")).await;
        match expected {
            Some(fragment) => assert!(denial(&response).contains(fragment), "{} not in {}", fragment, response),
            None => assert_eq!(response["allowed"], true, "{}", response),
        }
    }
}

#[tokio::test]
async fn test_hugepages_need_advertising_node() {
    let nets = json!([{"type": "masquerade"}]);

    let response = post_review(
        vec![hugepage_node("2Mi")],
        AdmissionMode::Validating,
        "virtualmachine",
        vm(nets.clone(), "1Gi"),
    )
    .await;
    assert!(denial(&response).contains("hugepages 1Gi"));

    let response = post_review(
        vec![hugepage_node("1Gi")],
        AdmissionMode::Validating,
        "virtualmachine",
        vm(nets, "1Gi"),
    )
    .await;
    assert_eq!(response["allowed"], true);
}

#[tokio::test]
async fn test_unknown_symbols_denied() {
    let nets = json!([{"type": "macvtap"}]);
    let response = post_review(vec![], AdmissionMode::Validating, "virtualmachine", vm(nets, "")).await;
    assert!(denial(&response).contains("macvtap"));

    let masquerade = json!([{"type": "masquerade"}]);
    let fields = [
        ("numaPolicy", json!("preferred")),
        ("hugepages", json!("4Mi")),
        ("gpus", json!([{"name": "gpu0", "deviceType": "sriov", "resourceName": "nvidia.com/gpu"}])),
    ];
    for (field, value) in fields {
        let mut object = vm(masquerade.clone(), "");
        object["spec"][field] = value;
        let response = post_review(vec![], AdmissionMode::Validating, "virtualmachine", object).await;
        let message = denial(&response);
        assert!(message.contains("unsupported"), "{}", message);
        assert_eq!(response["status"]["code"], 403);
    }

    let mut object = vm(masquerade, "");
    object["spec"]["disks"][0]["bus"] = json!("ide");
    let response = post_review(vec![], AdmissionMode::Validating, "virtualmachine", object).await;
    assert!(denial(&response).contains("unsupported bus ide"));
}

// =============================================================================
// VMSnapshot & VMTemplate
// =============================================================================

#[tokio::test]
async fn test_snapshot_namespace_defaulted_and_checked() {
    let snapshot = |source: Value, disks: Value| {
        json!({
            "apiVersion": "virtualization.kubesphere.io/v1beta1",
            "kind": "VMSnapshot",
            "metadata": {"name": "snap", "namespace": "tenant-a"},
            "spec": {"sourceRef": source, "includedDisks": disks}
        })
    };

    let response = post_review(
        vec![],
        AdmissionMode::Mutating,
        "vmsnapshot",
        snapshot(json!({"name": "vm-1"}), json!(["root"])),
    )
    .await;
    assert_eq!(response["allowed"], true);

    let response = post_review(
        vec![],
        AdmissionMode::Validating,
        "vmsnapshot",
        snapshot(json!({"namespace": "tenant-b", "name": "vm-1"}), json!(["root"])),
    )
    .await;
    assert!(denial(&response).contains("sourceRef namespace must match"));

    let response = post_review(
        vec![],
        AdmissionMode::Validating,
        "vmsnapshot",
        snapshot(json!({"name": "vm-1"}), json!([])),
    )
    .await;
    assert!(denial(&response).contains("includedDisks must not be empty"));

    let mut object = snapshot(json!({"name": "vm-1"}), json!(["root"]));
    object["spec"]["retainPolicy"] = json!("Archive");
    let response = post_review(vec![], AdmissionMode::Validating, "vmsnapshot", object).await;
    assert!(denial(&response).contains("unsupported retainPolicy Archive"));
}

#[tokio::test]
async fn test_template_cpu_bounds() {
    let template = |constraints: Value| {
        json!({
            "apiVersion": "virtualization.kubesphere.io/v1beta1",
            "kind": "VMTemplate",
            "metadata": {"name": "ubuntu", "namespace": "tenant-a"},
            "spec": {
                "parameters": {"cpu": "2", "memory": "4Gi", "os": "ubuntu"},
                "constraints": constraints
            }
        })
    };

    let cases = vec![
        (json!({"minCPU": "4", "maxCPU": "2"}), Some("maxCPU must be >= minCPU")),
        (json!({"minCPU": "500m", "maxCPU": "1"}), None),
        (json!({"minCPU": "2", "maxCPU": "2000m"}), None),
        (json!({"maxCPU": "1"}), None),
        (json!({"minCPU": "0.5", "maxCPU": "2"}), None),
        (json!({"minCPU": "1.5", "maxCPU": "1500m"}), None),
        (json!({"minCPU": "1.5", "maxCPU": "1"}), Some("maxCPU must be >= minCPU")),
        (json!({"minCPU": "lots", "maxCPU": "2"}), Some("minCPU")),
    ];

    for (constraints, expected) in cases {
        let response = post_review(vec![], AdmissionMode::Validating, "vmtemplate", template(constraints)).await;
        match expected {
            Some(fragment) => assert!(denial(&response).contains(fragment), "{} not in {}", fragment, response),
            None => assert_eq!(response["allowed"], true, "{}", response),
        }
    }
}

#[tokio::test]
async fn test_template_requires_cpu_and_memory() {
    let template = json!({
        "apiVersion": "virtualization.kubesphere.io/v1beta1",
        "kind": "VMTemplate",
        "metadata": {"name": "empty", "namespace": "tenant-a"},
        "spec": {"parameters": {"os": "ubuntu"}}
    });
    let response = post_review(vec![], AdmissionMode::Validating, "vmtemplate", template).await;
    assert!(denial(&response).contains("parameters.cpu and parameters.memory must be specified"));
}
