// Bounded retry for transient store failures, applied as decorators over a
// store client so orchestrators never retry on their own.

use async_trait::async_trait;
use rand::Rng;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::config::RetryConfig;
use crate::core::models::DocId;
use crate::error::AppResult;
use crate::infrastructure::traits::{BlobStore, IndexResult, IndexWrite, SearchIndex, StoredBlob};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }

    /// A policy that makes exactly one attempt.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Exponential backoff with up to 50% jitter, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        let capped = exp.min(self.max_delay);
        let jitter_ceiling = (capped.as_millis() / 2) as u64;
        let jitter = if jitter_ceiling == 0 {
            0
        } else {
            rand::rng().random_range(0..=jitter_ceiling)
        };
        (capped + Duration::from_millis(jitter)).min(self.max_delay)
    }
}

/// Runs `operation` until it succeeds, fails permanently, or the policy's
/// attempts are used up.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, label: &str, mut operation: F) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let mut attempt = 1;
    loop {
        match operation().await {
            Err(err) if err.is_transient() && attempt < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    "{} attempt {}/{} failed: {}; retrying in {:?}",
                    label, attempt, policy.max_attempts, err, delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}

pub struct RetryingSearchIndex {
    inner: Arc<dyn SearchIndex>,
    policy: RetryPolicy,
}

impl RetryingSearchIndex {
    pub fn new(inner: Arc<dyn SearchIndex>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl SearchIndex for RetryingSearchIndex {
    async fn insert(&self, document: Value) -> AppResult<IndexWrite> {
        with_retry(&self.policy, "search.insert", || self.inner.insert(document.clone())).await
    }

    async fn update(&self, doc_id: &str, patch: Value) -> AppResult<IndexResult> {
        with_retry(&self.policy, "search.update", || {
            self.inner.update(doc_id, patch.clone())
        })
        .await
    }

    async fn delete(&self, doc_id: &str) -> AppResult<IndexResult> {
        with_retry(&self.policy, "search.delete", || self.inner.delete(doc_id)).await
    }

    async fn get(&self, doc_id: &str) -> AppResult<Option<Value>> {
        with_retry(&self.policy, "search.get", || self.inner.get(doc_id)).await
    }

    async fn restore(&self, doc_id: &str, document: Value) -> AppResult<IndexResult> {
        with_retry(&self.policy, "search.restore", || {
            self.inner.restore(doc_id, document.clone())
        })
        .await
    }

    async fn find(&self, field: &str, value: &Value) -> AppResult<Vec<(DocId, Value)>> {
        with_retry(&self.policy, "search.find", || self.inner.find(field, value)).await
    }

    async fn list_ids(&self) -> AppResult<Vec<DocId>> {
        with_retry(&self.policy, "search.list_ids", || self.inner.list_ids()).await
    }
}

pub struct RetryingBlobStore {
    inner: Arc<dyn BlobStore>,
    policy: RetryPolicy,
}

impl RetryingBlobStore {
    pub fn new(inner: Arc<dyn BlobStore>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl BlobStore for RetryingBlobStore {
    async fn upload(&self, bytes: Vec<u8>, key: &str) -> AppResult<StoredBlob> {
        with_retry(&self.policy, "blob.upload", || {
            self.inner.upload(bytes.clone(), key)
        })
        .await
    }

    async fn remove(&self, url: &str) -> AppResult<()> {
        with_retry(&self.policy, "blob.remove", || self.inner.remove(url)).await
    }

    async fn exists(&self, url: &str) -> AppResult<bool> {
        with_retry(&self.policy, "blob.exists", || self.inner.exists(url)).await
    }
}
