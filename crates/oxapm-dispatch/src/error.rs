use oxapm_common::types::System;
use std::collections::BTreeMap;

/// Errors that can occur within the dispatch engine.
///
/// Validation-class variants (`NotFound`, `IneligibleService`,
/// `InvariantViolation`) are raised before any remote or local mutation.
/// Per-service write failures are collected into the dispatch outcome and only
/// surface as `AllFailed` when nothing could be written.
///
/// # Examples
///
/// ```rust
/// use oxapm_common::types::System;
/// use oxapm_dispatch::error::DispatchError;
///
/// let err = DispatchError::IneligibleService {
///     system: System::Rpc,
///     category: "callee".to_string(),
///     services: vec!["payment".to_string()],
/// };
/// assert!(err.to_string().contains("payment"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// A requested service, template or other record does not exist.
    #[error("Dispatch: {entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The template's system cannot be applied to some requested services.
    #[error("Dispatch: template [{system}/{category}] cannot be applied to services {services:?}")]
    IneligibleService {
        system: System,
        category: String,
        services: Vec<String>,
    },

    /// Creating or updating the remote rule of one service failed.
    #[error("Dispatch: remote write failed for service '{service}': {message}")]
    RemoteWrite { service: String, message: String },

    /// A request would break a template invariant; nothing was changed.
    #[error("Dispatch: {0}")]
    InvariantViolation(String),

    /// Every service of the call failed its remote write.
    #[error("Dispatch: all services failed: {failed:?}")]
    AllFailed { failed: BTreeMap<String, String> },

    #[error(transparent)]
    Storage(#[from] oxapm_storage::error::StorageError),

    /// A collaborator (topology, relations, query templates, remote rules,
    /// user groups) returned an error.
    #[error("Dispatch: upstream error: {0:#}")]
    Upstream(#[from] anyhow::Error),

    #[error("Dispatch: JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DispatchError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

/// Convenience `Result` alias for dispatch operations.
pub type Result<T> = std::result::Result<T, DispatchError>;
