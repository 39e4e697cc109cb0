//! Webhook HTTP surface
//!
//! Serves the admission hooks and the CRD conversion endpoint:
//! - `/mutate-virtualization-kubesphere-io-v1beta1-<kind>`
//! - `/validate-virtualization-kubesphere-io-v1beta1-<kind>`
//! - `/convert`
//! - `/healthz`, `/readyz`

pub mod server;

pub use server::{TlsFiles, WebhookServer, WebhookServerConfig};

use crate::admission::{self, AdmissionHook, AdmissionMode};
use crate::admission::{VMSnapshotAdmission, VMTemplateAdmission, VirtualMachineAdmission};
use crate::conversion::{self, ConversionRegistry, ConversionReview};
use crate::metrics::Metrics;
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, MethodRouter},
    Json, Router,
};
use kube::core::admission::AdmissionReview;
use kube::core::DynamicObject;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

const PATH_GROUP: &str = "virtualization-kubesphere-io-v1beta1";

/// Path of the admission endpoint for `resource` (lowercase kind)
pub fn admission_path(mode: AdmissionMode, resource: &str) -> String {
    let prefix = match mode {
        AdmissionMode::Mutating => "mutate",
        AdmissionMode::Validating => "validate",
    };
    format!("/{}-{}-{}", prefix, PATH_GROUP, resource)
}

/// Shared handler state
#[derive(Clone)]
pub struct WebhookState {
    pub virtual_machines: Arc<VirtualMachineAdmission>,
    pub snapshots: Arc<VMSnapshotAdmission>,
    pub templates: Arc<VMTemplateAdmission>,
    pub conversion: Arc<ConversionRegistry>,
    pub metrics: Option<Metrics>,
}

impl WebhookState {
    pub fn new(virtual_machines: VirtualMachineAdmission, conversion: Arc<ConversionRegistry>) -> Self {
        Self {
            virtual_machines: Arc::new(virtual_machines),
            snapshots: Arc::new(VMSnapshotAdmission),
            templates: Arc::new(VMTemplateAdmission),
            conversion,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

/// Build the webhook router
pub fn router(state: WebhookState) -> Router {
    let mut router = Router::new()
        .route("/convert", post(convert))
        .route("/healthz", get(healthz))
        .route("/readyz", get(healthz));

    for mode in [AdmissionMode::Mutating, AdmissionMode::Validating] {
        router = router
            .route(
                &admission_path(mode, "virtualmachine"),
                admission_route(mode, |s: &WebhookState| s.virtual_machines.clone()),
            )
            .route(
                &admission_path(mode, "vmsnapshot"),
                admission_route(mode, |s: &WebhookState| s.snapshots.clone()),
            )
            .route(
                &admission_path(mode, "vmtemplate"),
                admission_route(mode, |s: &WebhookState| s.templates.clone()),
            );
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

// =============================================================================
// Handlers
// =============================================================================

fn admission_route<H, F>(mode: AdmissionMode, select: F) -> MethodRouter<WebhookState>
where
    H: AdmissionHook + 'static,
    F: Fn(&WebhookState) -> Arc<H> + Clone + Send + Sync + 'static,
{
    post(move |State(state): State<WebhookState>, body: Bytes| {
        let hook = select(&state);
        async move {
            let answer = match serde_json::from_slice::<AdmissionReview<DynamicObject>>(&body) {
                Ok(review) => admission::review(hook.as_ref(), mode, review).await,
                Err(e) => {
                    warn!("Malformed {} admission review: {}", hook.kind(), e);
                    admission::malformed(&format!("malformed AdmissionReview: {}", e))
                }
            };

            if let (Some(metrics), Some(response)) = (&state.metrics, &answer.response) {
                let allowed = if response.allowed { "true" } else { "false" };
                metrics
                    .admission_total
                    .with_label_values(&[hook.kind(), allowed])
                    .inc();
            }
            Json(answer)
        }
    })
}

async fn convert(State(state): State<WebhookState>, body: Bytes) -> impl IntoResponse {
    let answer = match serde_json::from_slice::<ConversionReview>(&body) {
        Ok(review) => state.conversion.review(review),
        Err(e) => {
            warn!("Malformed ConversionReview: {}", e);
            conversion::malformed_review(&format!("malformed ConversionReview: {}", e))
        }
    };

    let success = answer
        .response
        .as_ref()
        .map(|r| r.result.is_success())
        .unwrap_or(false);
    debug!("Conversion review answered, success={}", success);
    if let Some(metrics) = &state.metrics {
        let result = if success { "success" } else { "failure" };
        metrics.conversion_total.with_label_values(&[result]).inc();
    }
    Json(answer)
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
