//! Virtualization Operator
//!
//! Runs the VirtualMachine, VMSnapshot and VMTemplate controllers together
//! with the admission and conversion webhook.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use virtualization_operator::backends::{BackendConfig, CdiConfig, KubeVirtConfig, MultusConfig};
use virtualization_operator::controller::{self, OperatorConfig};
use virtualization_operator::crd::{render_crds_yaml, ConversionWebhook};
use virtualization_operator::domain::ports::{Clock, NodeInventory};
use virtualization_operator::{
    BackendFactory, ConversionRegistry, Error, KubeNodeInventory, KubeStore, Metrics, Result,
    StaticNodeInventory, SystemClock, VMSnapshot, VMSnapshotReconciler, VMTemplate, VMTemplateReconciler,
    TlsFiles, VirtualMachine, VirtualMachineAdmission, VirtualMachineReconciler, WebhookServer, WebhookServerConfig,
    WebhookState,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Virtualization Operator - lifecycle management for VirtualMachine resources
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Admission and conversion webhook bind address
    #[arg(long, env = "WEBHOOK_ADDR", default_value = "0.0.0.0:9443")]
    webhook_addr: String,

    /// Directory holding the webhook serving certificate as tls.crt and tls.key
    #[arg(long, env = "WEBHOOK_CERT_DIR", default_value = "/tmp/k8s-webhook-server/serving-certs")]
    webhook_cert_dir: PathBuf,

    /// Serve the webhook over plain HTTP (local development only)
    #[arg(long, env = "WEBHOOK_INSECURE")]
    webhook_insecure: bool,

    /// Service the API server calls for CRD conversion
    #[arg(long, env = "WEBHOOK_SERVICE_NAME", default_value = "virtualization-webhook")]
    webhook_service_name: String,

    /// Namespace of the conversion webhook service
    #[arg(long, env = "WEBHOOK_SERVICE_NAMESPACE", default_value = "kubesphere-system")]
    webhook_service_namespace: String,

    /// Port of the conversion webhook service
    #[arg(long, env = "WEBHOOK_SERVICE_PORT", default_value = "443")]
    webhook_service_port: i32,

    /// PEM CA bundle written into the CRD conversion config
    #[arg(long, env = "WEBHOOK_CA_BUNDLE_FILE")]
    webhook_ca_bundle_file: Option<PathBuf>,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Only watch objects in this namespace
    #[arg(long, env = "WATCH_NAMESPACE")]
    watch_namespace: Option<String>,

    /// Re-issue power calls after this many seconds without a sync
    #[arg(long, env = "DRIFT_CHECK_INTERVAL", default_value = "60")]
    drift_check_interval_secs: u64,

    /// Resync interval for snapshots and templates in seconds
    #[arg(long, env = "RESYNC_INTERVAL", default_value = "300")]
    resync_interval_secs: u64,

    /// Requeue delay after a transient failure in seconds
    #[arg(long, env = "ERROR_REQUEUE_INTERVAL", default_value = "15")]
    error_requeue_secs: u64,

    /// KubeVirt run strategy for created instances
    #[arg(long, env = "KUBEVIRT_RUN_STRATEGY", default_value = "Manual")]
    run_strategy: String,

    /// Name prefix for generated DataVolumes
    #[arg(long, env = "CDI_VOLUME_PREFIX", default_value = "dv")]
    volume_prefix: String,

    /// Reject network attachments whose NAD is unknown to the operator
    #[arg(long, env = "REQUIRE_REGISTERED_NADS")]
    require_registered_nads: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Print the multi-version CRDs as YAML and exit
    #[arg(long)]
    print_crds: bool,

    /// Serve only the webhook, without a Kubernetes connection
    #[arg(long, env = "STANDALONE")]
    standalone: bool,
}

impl Args {
    fn webhook_server_config(&self) -> Result<WebhookServerConfig> {
        Ok(WebhookServerConfig {
            addr: self
                .webhook_addr
                .parse()
                .map_err(|e| Error::Configuration(format!("Invalid webhook address: {}", e)))?,
            tls: (!self.webhook_insecure).then(|| TlsFiles::in_dir(self.webhook_cert_dir.clone())),
        })
    }

    fn conversion_webhook(&self) -> Result<ConversionWebhook> {
        let ca_bundle = match &self.webhook_ca_bundle_file {
            Some(path) => Some(std::fs::read(path).map_err(|e| {
                Error::Configuration(format!("Failed to read CA bundle {}: {}", path.display(), e))
            })?),
            None => None,
        };
        Ok(ConversionWebhook {
            service_name: self.webhook_service_name.clone(),
            service_namespace: self.webhook_service_namespace.clone(),
            port: self.webhook_service_port,
            ca_bundle,
            ..Default::default()
        })
    }

    fn operator_config(&self) -> OperatorConfig {
        OperatorConfig {
            drift_check_interval: Duration::from_secs(self.drift_check_interval_secs),
            resync_interval: Duration::from_secs(self.resync_interval_secs),
            error_requeue_interval: Duration::from_secs(self.error_requeue_secs),
            watch_namespace: self.watch_namespace.clone(),
            ..Default::default()
        }
    }

    fn backend_config(&self) -> BackendConfig {
        BackendConfig {
            kubevirt: KubeVirtConfig {
                run_strategy: self.run_strategy.clone(),
            },
            cdi: CdiConfig {
                volume_prefix: self.volume_prefix.clone(),
            },
            multus: MultusConfig {
                require_registered: self.require_registered_nads,
            },
        }
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_crds {
        print!("{}", render_crds_yaml(&args.conversion_webhook()?)?);
        return Ok(());
    }

    init_logging(&args);

    info!("Starting Virtualization Operator");
    info!("  Version: {}", virtualization_operator::VERSION);
    info!("  Webhook: {}", args.webhook_addr);
    info!("  Webhook TLS: {}", !args.webhook_insecure);
    info!("  Watch namespace: {}", args.watch_namespace.as_deref().unwrap_or("<all>"));
    info!("  Standalone mode: {}", args.standalone);

    let metrics = Metrics::new()?;
    metrics.register(prometheus::default_registry())?;

    let health_addr = args.health_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr).await {
            error!("Health server error: {}", e);
        }
    });

    let metrics_addr = args.metrics_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr).await {
            error!("Metrics server error: {}", e);
        }
    });

    let conversion = Arc::new(ConversionRegistry::new());
    let webhook_config = args.webhook_server_config()?;

    if args.standalone {
        let nodes: Arc<dyn NodeInventory> = Arc::new(StaticNodeInventory::default());
        let state = WebhookState::new(VirtualMachineAdmission::new(nodes), conversion).with_metrics(metrics);
        WebhookServer::new(webhook_config, state).run().await?;
        info!("Operator shutdown complete");
        return Ok(());
    }

    let client = kube::Client::try_default().await?;
    let config = args.operator_config();
    let backends = BackendFactory::create(args.backend_config());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let vm_reconciler = Arc::new(
        VirtualMachineReconciler::new(
            Arc::new(KubeStore::<VirtualMachine>::new(client.clone())),
            backends.clone(),
            clock.clone(),
            config.clone(),
        )
        .with_metrics(metrics.clone()),
    );
    let snapshot_reconciler = Arc::new(
        VMSnapshotReconciler::new(
            Arc::new(KubeStore::<VMSnapshot>::new(client.clone())),
            backends.snapshots.clone(),
            clock.clone(),
            config.clone(),
        )
        .with_metrics(metrics.clone()),
    );
    let template_reconciler = Arc::new(
        VMTemplateReconciler::new(
            Arc::new(KubeStore::<VMTemplate>::new(client.clone())),
            backends.catalog.clone(),
            clock,
            config,
        )
        .with_metrics(metrics.clone()),
    );

    let nodes: Arc<dyn NodeInventory> = Arc::new(KubeNodeInventory::new(client.clone()));
    let state = WebhookState::new(VirtualMachineAdmission::new(nodes), conversion).with_metrics(metrics);
    let webhook = WebhookServer::new(webhook_config, state);

    info!("Starting controllers and webhook");
    tokio::select! {
        _ = controller::virtual_machine::run(client.clone(), vm_reconciler) => {
            info!("VirtualMachine controller stopped");
        }
        _ = controller::vm_snapshot::run(client.clone(), snapshot_reconciler) => {
            info!("VMSnapshot controller stopped");
        }
        _ = controller::vm_template::run(client, template_reconciler) => {
            info!("VMTemplate controller stopped");
        }
        result = webhook.run() => {
            if let Err(e) = result {
                error!("Webhook server error: {}", e);
                return Err(e);
            }
        }
    }

    info!("Operator shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "kube=info", "tower=warn", "axum=info"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// Health & Metrics Servers
// =============================================================================

fn plain_response(status: hyper::StatusCode, body: impl Into<hyper::Body>) -> hyper::Response<hyper::Body> {
    let mut response = hyper::Response::new(body.into());
    *response.status_mut() = status;
    response
}

async fn run_health_server(addr: &str) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Server, StatusCode};

    let make_svc = make_service_fn(|_conn| async {
        Ok::<_, std::convert::Infallible>(service_fn(|req: Request<Body>| async move {
            let response = match req.uri().path() {
                "/healthz" | "/livez" | "/readyz" => plain_response(StatusCode::OK, "ok"),
                _ => plain_response(StatusCode::NOT_FOUND, "not found"),
            };
            Ok::<_, std::convert::Infallible>(response)
        }))
    });

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Configuration(format!("Invalid health server address: {}", e)))?;

    info!("Health server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Health server error: {}", e)))
}

async fn run_metrics_server(addr: &str) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{header, Body, Request, Server, StatusCode};
    use prometheus::{Encoder, TextEncoder};

    let make_svc = make_service_fn(|_conn| async {
        Ok::<_, std::convert::Infallible>(service_fn(|req: Request<Body>| async move {
            let response = match req.uri().path() {
                "/metrics" => {
                    let encoder = TextEncoder::new();
                    let mut buffer = Vec::new();
                    match encoder.encode(&prometheus::gather(), &mut buffer) {
                        Ok(()) => {
                            let mut response = plain_response(StatusCode::OK, buffer);
                            if let Ok(content_type) = header::HeaderValue::from_str(encoder.format_type()) {
                                response.headers_mut().insert(header::CONTENT_TYPE, content_type);
                            }
                            response
                        }
                        Err(e) => plain_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
                    }
                }
                _ => plain_response(StatusCode::NOT_FOUND, "not found"),
            };
            Ok::<_, std::convert::Infallible>(response)
        }))
    });

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Configuration(format!("Invalid metrics server address: {}", e)))?;

    info!("Metrics server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Metrics server error: {}", e)))
}
