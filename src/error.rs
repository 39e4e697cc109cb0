//! Error types for the Virtualization Operator
//!
//! Provides structured error types for all operator components including
//! the reconcilers, the conversion layer, admission hooks and backend adapters.

use std::time::Duration;
use thiserror::Error;

/// Unified error type for the operator
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Resource Store Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Resource not found: {kind}/{name}")]
    ResourceNotFound { kind: String, name: String },

    #[error("Resource already exists: {kind}/{name}")]
    ResourceExists { kind: String, name: String },

    #[error("Conflicting write on {kind}/{name}: object has been modified")]
    Conflict { kind: String, name: String },

    // =========================================================================
    // Spec Configuration Errors
    // =========================================================================
    #[error("unsupported disk type {0}")]
    UnsupportedDiskType(String),

    #[error("unsupported network type {0}")]
    UnsupportedNetworkType(String),

    #[error("unknown power state {0}")]
    UnknownPowerState(String),

    #[error("invalid quantity {value}: {reason}")]
    InvalidQuantity { value: String, reason: String },

    #[error("unsupported {field} {value}")]
    UnsupportedValue { field: String, value: String },

    // =========================================================================
    // Backend Errors
    // =========================================================================
    #[error("Backend unavailable: {backend}")]
    BackendUnavailable { backend: String },

    #[error("Backend operation failed: {backend} - {operation}: {reason}")]
    BackendOperationFailed {
        backend: String,
        operation: String,
        reason: String,
    },

    // =========================================================================
    // Admission & Conversion Errors
    // =========================================================================
    #[error("{0}")]
    AdmissionDenied(String),

    #[error("conversion of {kind} from {from} to {to} failed: {reason}")]
    ConversionFailed {
        kind: String,
        from: String,
        to: String,
        reason: String,
    },

    #[error("no conversion registered for {kind} from {from} to {to}")]
    ConversionUnsupported { kind: String, from: String, to: String },

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Action to take on error during reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Requeue with exponential backoff
    RequeueWithBackoff,
    /// Requeue after specific duration
    RequeueAfter(Duration),
    /// Don't requeue, wait for changes
    NoRequeue,
}

impl Error {
    /// Build a backend failure for the given collaborator call
    pub fn backend(backend: &str, operation: &str, reason: impl Into<String>) -> Self {
        Error::BackendOperationFailed {
            backend: backend.to_string(),
            operation: operation.to_string(),
            reason: reason.into(),
        }
    }

    /// Determine what action to take for this error
    pub fn action(&self) -> ErrorAction {
        match self {
            // Transient errors - retry with backoff
            Error::Kube(_)
            | Error::Conflict { .. }
            | Error::BackendUnavailable { .. }
            | Error::BackendOperationFailed { .. } => ErrorAction::RequeueWithBackoff,

            // The object spec is wrong; an external actor has to fix it, so poll slowly
            Error::UnsupportedDiskType(_)
            | Error::UnsupportedNetworkType(_)
            | Error::UnknownPowerState(_)
            | Error::InvalidQuantity { .. }
            | Error::UnsupportedValue { .. } => ErrorAction::RequeueAfter(Duration::from_secs(300)),

            // Gone objects need nothing further
            Error::ResourceNotFound { .. } => ErrorAction::NoRequeue,

            // Operator configuration/validation errors - don't retry automatically
            Error::Configuration(_)
            | Error::AdmissionDenied(_)
            | Error::ConversionUnsupported { .. } => ErrorAction::NoRequeue,

            // All other errors - retry with backoff
            _ => ErrorAction::RequeueWithBackoff,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        !matches!(self.action(), ErrorAction::NoRequeue)
    }

    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Kube(_)
                | Error::Conflict { .. }
                | Error::BackendUnavailable { .. }
                | Error::BackendOperationFailed { .. }
        )
    }

    /// Check if this error means the object is gone from the store
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::ResourceNotFound { .. } => true,
            Error::Kube(kube::Error::Api(ae)) => ae.code == 404,
            _ => false,
        }
    }

    /// Check if this error is an optimistic-concurrency rejection
    pub fn is_conflict(&self) -> bool {
        match self {
            Error::Conflict { .. } => true,
            Error::Kube(kube::Error::Api(ae)) => ae.code == 409,
            _ => false,
        }
    }

    /// Check if this error stems from invalid object configuration
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::UnsupportedDiskType(_)
                | Error::UnsupportedNetworkType(_)
                | Error::UnknownPowerState(_)
                | Error::InvalidQuantity { .. }
                | Error::UnsupportedValue { .. }
        )
    }
}

/// Result type alias for the operator
pub type Result<T> = std::result::Result<T, Error>;
