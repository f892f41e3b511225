#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use tao_content::{
    core::{CreatedEntity, MediaUpload, NewComment, NewPost, NewProfile},
    error::{AppError, AppResult, StoreKind},
    infrastructure::{
        CacheStore, FailPoints, GraphStore, InMemoryBlobStore, InMemoryGraphStore, InMemorySearchIndex,
        JwtIdentityVerifier, LruCacheStore, ViewerContext,
    },
    orchestration::Stores,
    AppState, Config,
};

pub const SECRET: &str = "integration-test-secret-0123";
pub const ISSUER: &str = "content-service";

/// In-memory stores sharing one set of fail points, plus the concrete
/// handles tests inspect directly.
pub struct Harness {
    pub state: AppState,
    pub fail_points: FailPoints,
    pub graph: Arc<InMemoryGraphStore>,
    pub search: Arc<InMemorySearchIndex>,
    pub cache: Arc<LruCacheStore>,
    pub blobs: Arc<InMemoryBlobStore>,
    pub tokens: Arc<JwtIdentityVerifier>,
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.identity.secret = SECRET.to_string();
    config.identity.issuer = ISSUER.to_string();
    config
}

impl Harness {
    pub fn new() -> Self {
        Self::build(None, |graph| graph as Arc<dyn GraphStore>)
    }

    /// Same stores, but cache calls go to `cache` instead of the LRU.
    pub fn with_cache(cache: Arc<dyn CacheStore>) -> Self {
        Self::build(Some(cache), |graph| graph as Arc<dyn GraphStore>)
    }

    /// Orchestrators see the graph through `wrap`; `graph` stays the
    /// unwrapped store.
    pub fn with_graph(
        wrap: impl FnOnce(Arc<InMemoryGraphStore>) -> Arc<dyn GraphStore>,
    ) -> Self {
        Self::build(None, wrap)
    }

    fn build(
        cache_override: Option<Arc<dyn CacheStore>>,
        wrap: impl FnOnce(Arc<InMemoryGraphStore>) -> Arc<dyn GraphStore>,
    ) -> Self {
        let fail_points = FailPoints::new();
        let graph = Arc::new(InMemoryGraphStore::with_fail_points(fail_points.clone()));
        let search = Arc::new(InMemorySearchIndex::with_fail_points(fail_points.clone()));
        let cache = Arc::new(LruCacheStore::new(128, Duration::from_secs(60)).unwrap());
        let blobs = Arc::new(InMemoryBlobStore::with_fail_points(fail_points.clone()));
        let tokens = Arc::new(JwtIdentityVerifier::new(SECRET, ISSUER, Duration::from_secs(600)));

        let stores = Stores {
            graph: wrap(graph.clone()),
            search: search.clone(),
            cache: cache_override.unwrap_or_else(|| cache.clone() as Arc<dyn CacheStore>),
            blobs: blobs.clone(),
            identity: tokens.clone(),
        };

        Self {
            state: AppState::from_stores(test_config(), stores),
            fail_points,
            graph,
            search,
            cache,
            blobs,
            tokens,
        }
    }

    pub fn viewer(&self, user_id: i64) -> ViewerContext {
        ViewerContext::new(user_id, self.tokens.issue_token(user_id).unwrap())
    }

    pub async fn register(&self, username: &str) -> ViewerContext {
        let created = self
            .state
            .writes
            .create_profile(NewProfile {
                username: username.to_string(),
                display_name: username.to_uppercase(),
                bio: None,
                avatar: None,
            })
            .await
            .unwrap();
        self.viewer(created.entity_id)
    }

    pub async fn post(&self, viewer: &ViewerContext, body: &str) -> CreatedEntity {
        self.state
            .writes
            .create_post(
                viewer,
                NewPost {
                    body: body.to_string(),
                    media: Vec::new(),
                },
            )
            .await
            .unwrap()
    }

    pub async fn comment(&self, viewer: &ViewerContext, parent_id: i64, body: &str) -> CreatedEntity {
        self.state
            .writes
            .add_comment(
                viewer,
                NewComment {
                    parent_id,
                    body: body.to_string(),
                },
            )
            .await
            .unwrap()
    }

    /// Vertex, document and blob counts, for asserting nothing was left behind.
    pub async fn footprint(&self) -> (usize, usize, usize) {
        (
            self.graph.vertex_count().await,
            self.search.len().await,
            self.blobs.len().await,
        )
    }
}

pub fn media(name: &str) -> MediaUpload {
    MediaUpload::new(name, "image/png", vec![0x89, 0x50, 0x4e, 0x47])
}

/// A cache that is always down.
pub struct BrokenCache;

#[async_trait]
impl CacheStore for BrokenCache {
    async fn get(&self, _key: &str) -> AppResult<Option<String>> {
        Err(AppError::unavailable(StoreKind::Cache, "connection refused"))
    }

    async fn set(&self, _key: &str, _value: String) -> AppResult<()> {
        Err(AppError::unavailable(StoreKind::Cache, "connection refused"))
    }

    async fn del(&self, _key: &str) -> AppResult<()> {
        Err(AppError::unavailable(StoreKind::Cache, "connection refused"))
    }
}
