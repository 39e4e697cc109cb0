//! Webhook Server
//!
//! Binds the webhook router and serves it over TLS until shutdown is
//! signalled. The API server only calls webhooks over HTTPS, so plain HTTP
//! is reserved for local development.

use super::{router, WebhookState};
use crate::error::{Error, Result};
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::info;

/// How long in-flight reviews may take to finish after shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// PEM certificate chain and private key served to the API server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsFiles {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

impl TlsFiles {
    /// `tls.crt` and `tls.key` inside `dir`, the layout of a mounted TLS secret
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            cert_path: dir.join("tls.crt"),
            key_path: dir.join("tls.key"),
        }
    }
}

/// Configuration for the webhook server
#[derive(Debug, Clone)]
pub struct WebhookServerConfig {
    /// Bind address
    pub addr: SocketAddr,

    /// Serving certificate; `None` serves plain HTTP
    pub tls: Option<TlsFiles>,
}

impl Default for WebhookServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 9443)),
            tls: Some(TlsFiles::in_dir("/tmp/k8s-webhook-server/serving-certs")),
        }
    }
}

/// Admission and conversion webhook server
pub struct WebhookServer {
    config: WebhookServerConfig,
    state: WebhookState,
    shutdown_tx: broadcast::Sender<()>,
}

impl WebhookServer {
    pub fn new(config: WebhookServerConfig, state: WebhookState) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            state,
            shutdown_tx,
        }
    }

    /// Serve until [`WebhookServer::shutdown`] is called
    pub async fn run(&self) -> Result<()> {
        match &self.config.tls {
            Some(tls) => self.run_tls(tls).await,
            None => self.run_plain().await,
        }
    }

    async fn run_tls(&self, tls: &TlsFiles) -> Result<()> {
        let addr = self.config.addr;
        let rustls = RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path)
            .await
            .map_err(|e| {
                Error::Configuration(format!(
                    "Failed to load webhook certificate {} / {}: {}",
                    tls.cert_path.display(),
                    tls.key_path.display(),
                    e
                ))
            })?;

        let handle = Handle::new();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let shutdown_handle = handle.clone();
        tokio::spawn(async move {
            let _ = shutdown_rx.recv().await;
            info!("Webhook server shutting down");
            shutdown_handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
        });

        info!("Webhook server listening on https://{}", addr);
        axum_server::bind_rustls(addr, rustls)
            .handle(handle)
            .serve(router(self.state.clone()).into_make_service())
            .await
            .map_err(|e| Error::Internal(format!("Webhook server error: {}", e)))
    }

    async fn run_plain(&self) -> Result<()> {
        let addr = self.config.addr;
        let app = router(self.state.clone());
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Internal(format!("Failed to bind webhook server: {}", e)))?;
        info!("Webhook server listening on http://{} without TLS", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                info!("Webhook server shutting down");
            })
            .await
            .map_err(|e| Error::Internal(format!("Webhook server error: {}", e)))
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::VirtualMachineAdmission;
    use crate::conversion::ConversionRegistry;
    use crate::store::StaticNodeInventory;
    use assert_matches::assert_matches;
    use std::sync::Arc;

    fn state() -> WebhookState {
        WebhookState::new(
            VirtualMachineAdmission::new(Arc::new(StaticNodeInventory::default())),
            Arc::new(ConversionRegistry::new()),
        )
    }

    #[test]
    fn test_default_config_serves_tls() {
        let config = WebhookServerConfig::default();
        assert_eq!(config.addr.port(), 9443);
        assert_eq!(
            config.tls,
            Some(TlsFiles {
                cert_path: PathBuf::from("/tmp/k8s-webhook-server/serving-certs/tls.crt"),
                key_path: PathBuf::from("/tmp/k8s-webhook-server/serving-certs/tls.key"),
            })
        );
    }

    #[tokio::test]
    async fn test_missing_certificate_is_configuration_error() {
        let config = WebhookServerConfig {
            addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            tls: Some(TlsFiles::in_dir("/nonexistent/serving-certs")),
        };
        let result = WebhookServer::new(config, state()).run().await;
        assert_matches!(result, Err(Error::Configuration(msg)) if msg.contains("tls.crt"));
    }
}
