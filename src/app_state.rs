use std::sync::Arc;
use tracing::info;

use crate::{
    config::Config,
    error::AppResult,
    infrastructure::{
        FsBlobStore, InMemorySearchIndex, JwtIdentityVerifier, LruCacheStore, RetryPolicy,
        RetryingBlobStore, RetryingSearchIndex, SqliteGraphStore,
    },
    orchestration::{DeleteOrchestrator, Stores, WriteLimits, WriteOrchestrator},
    services::{ConsistencyAuditor, ContentReader, RelationshipService},
};

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub stores: Stores,
    pub writes: WriteOrchestrator,
    pub deletes: DeleteOrchestrator,
    pub reader: ContentReader,
    pub relationships: RelationshipService,
    pub auditor: ConsistencyAuditor,
}

impl AppState {
    /// Wires the bundled backends: SQLite graph, in-memory index, LRU cache,
    /// filesystem blobs and JWT identity proofs. Index and blob clients retry
    /// transient failures according to `config.retry`.
    pub async fn new(config: Config) -> AppResult<Self> {
        let graph = SqliteGraphStore::connect(&config.graph.url, config.graph.max_connections).await?;
        let blobs = FsBlobStore::new(&config.blobs.root).await?;
        let cache = LruCacheStore::new(config.cache.capacity, config.cache_ttl())?;
        let policy = RetryPolicy::from_config(&config.retry);

        let stores = Stores {
            graph: Arc::new(graph),
            search: Arc::new(RetryingSearchIndex::new(
                Arc::new(InMemorySearchIndex::new()),
                policy,
            )),
            cache: Arc::new(cache),
            blobs: Arc::new(RetryingBlobStore::new(Arc::new(blobs), policy)),
            identity: Arc::new(JwtIdentityVerifier::from_config(&config.identity)),
        };

        info!(
            graph = %config.graph.url,
            blobs = %config.blobs.root,
            "Content stores initialized"
        );
        Ok(Self::from_stores(config, stores))
    }

    /// Builds the orchestrators and services over caller-supplied stores.
    pub fn from_stores(config: Config, stores: Stores) -> Self {
        let limits = WriteLimits::from(&config.limits);
        Self {
            writes: WriteOrchestrator::new(stores.clone(), limits),
            deletes: DeleteOrchestrator::new(stores.clone(), config.verify_deletes),
            reader: ContentReader::new(stores.clone()),
            relationships: RelationshipService::new(stores.clone()),
            auditor: ConsistencyAuditor::new(stores.clone()),
            stores,
            config,
        }
    }
}
