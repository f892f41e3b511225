// Cross-store sagas: create, update and delete flows spanning the graph,
// the search index, the cache and the blob store.

pub mod authorization;
pub mod cascade;
pub mod delete;
pub mod pending;
pub mod write;

use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tracing::warn;

use crate::config::LimitsConfig;
use crate::core::models::VertexId;
use crate::error::{AppError, AppResult};
use crate::infrastructure::traits::{
    BlobStore, CacheStore, GraphStore, IdentityVerifier, SearchIndex, Verification,
};
use crate::infrastructure::viewer::ViewerContext;

pub use authorization::{AccessDecision, AuthorizationGate};
pub use cascade::CascadingDeletionEngine;
pub use delete::{DeleteOrchestrator, DeleteStatus};
pub use pending::PendingMutation;
pub use write::WriteOrchestrator;

/// Handles to every store a saga may touch.
#[derive(Clone)]
pub struct Stores {
    pub graph: Arc<dyn GraphStore>,
    pub search: Arc<dyn SearchIndex>,
    pub cache: Arc<dyn CacheStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub identity: Arc<dyn IdentityVerifier>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteLimits {
    pub max_body_len: usize,
    pub max_media: usize,
}

impl Default for WriteLimits {
    fn default() -> Self {
        Self {
            max_body_len: 5000,
            max_media: 4,
        }
    }
}

impl From<&LimitsConfig> for WriteLimits {
    fn from(config: &LimitsConfig) -> Self {
        Self {
            max_body_len: config.max_body_len,
            max_media: config.max_media,
        }
    }
}

/// Runs a saga on its own task so that dropping the caller's future cannot
/// leave it half-applied.
pub(crate) async fn spawn_saga<T, F>(operation: &'static str, saga: F) -> AppResult<T>
where
    T: Send + 'static,
    F: Future<Output = AppResult<T>> + Send + 'static,
{
    tokio::spawn(saga)
        .await
        .map_err(|e| AppError::Internal(format!("{} task aborted: {}", operation, e)))?
}

/// Checks the viewer's proof against the id they claim and returns that id.
pub(crate) async fn authenticate(stores: &Stores, viewer: &ViewerContext) -> AppResult<VertexId> {
    match stores.identity.verify(&viewer.proof, viewer.user_id).await? {
        Verification::Valid => Ok(viewer.user_id),
        Verification::Invalid => Err(AppError::Unauthorized(
            "identity proof does not match the requesting user".to_string(),
        )),
    }
}

/// Write-through of a denormalized record under every key it lives at.
/// The cache is best effort: failures are logged and swallowed.
pub(crate) async fn cache_put<T: Serialize>(cache: &dyn CacheStore, keys: &[String], record: &T) {
    let payload = match serde_json::to_string(record) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(error = %e, "Failed to serialize cache record");
            cache_invalidate(cache, keys).await;
            return;
        }
    };
    for key in keys {
        if let Err(e) = cache.set(key, payload.clone()).await {
            warn!(key = %key, error = %e, "Cache write failed");
        }
    }
}

pub(crate) async fn cache_invalidate(cache: &dyn CacheStore, keys: &[String]) {
    for key in keys {
        if let Err(e) = cache.del(key).await {
            warn!(key = %key, error = %e, "Cache invalidation failed");
        }
    }
}

/// Maps an internal failure to what the caller is allowed to see. Caller
/// errors and integrity violations pass through; store failures become a
/// generic failure for the operation.
pub(crate) fn surface(operation: &'static str, err: AppError) -> AppError {
    match err {
        err if err.is_caller_error() => err,
        err @ AppError::ConsistencyViolation(_) => err,
        err => {
            warn!(operation, error = %err, "Operation failed");
            AppError::OperationFailed(format!("{} could not be completed", operation))
        }
    }
}
