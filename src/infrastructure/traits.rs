// Store client contracts. Every orchestrator talks to the outside world
// through these traits; backends translate their own failures into AppError.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeSet;

use crate::core::models::{Direction, DocId, EntityKind, Properties, Vertex, VertexId};
use crate::core::relations::Relation;
use crate::error::AppResult;

/// Read side of the graph store plus the transaction factory.
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn begin_transaction(&self) -> AppResult<Box<dyn GraphTransaction>>;

    async fn get_vertex(&self, id: VertexId) -> AppResult<Option<Vertex>>;

    async fn get_property(&self, id: VertexId, key: &str) -> AppResult<Option<Value>> {
        Ok(self
            .get_vertex(id)
            .await?
            .and_then(|vertex| vertex.properties.get(key).cloned()))
    }

    /// Ids adjacent to `start` over `relation` in the given direction.
    async fn traverse(
        &self,
        start: VertexId,
        relation: Relation,
        direction: Direction,
    ) -> AppResult<BTreeSet<VertexId>>;

    async fn list_vertices(&self, label: EntityKind) -> AppResult<Vec<Vertex>>;
}

/// A single graph transaction. Writes are invisible to readers until
/// `commit`; a transaction that is dropped without committing is discarded.
///
/// Methods take `&self` so that independent writes of one step can be
/// issued concurrently and awaited together.
#[async_trait]
pub trait GraphTransaction: Send + Sync {
    async fn add_vertex(&self, label: EntityKind, properties: Properties) -> AppResult<VertexId>;

    /// Merge `properties` into an existing vertex.
    async fn set_properties(&self, id: VertexId, properties: Properties) -> AppResult<()>;

    /// Writes `from -relation-> to` and `to -inverse-> from`.
    async fn add_edge_pair(&self, from: VertexId, to: VertexId, relation: Relation) -> AppResult<()>;

    async fn drop_edge_pair(&self, from: VertexId, to: VertexId, relation: Relation)
        -> AppResult<()>;

    /// Drops every edge with either endpoint in `ids`.
    async fn drop_edges(&self, ids: &[VertexId]) -> AppResult<()>;

    async fn drop_vertices(&self, ids: &[VertexId]) -> AppResult<()>;

    async fn commit(&self) -> AppResult<()>;

    async fn rollback(&self) -> AppResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexResult {
    Created,
    Updated,
    Deleted,
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexWrite {
    pub doc_id: DocId,
    pub result: IndexResult,
}

#[async_trait]
pub trait SearchIndex: Send + Sync {
    async fn insert(&self, document: Value) -> AppResult<IndexWrite>;

    /// Shallow-merges `patch` into the document. `NotFound` if it is gone.
    async fn update(&self, doc_id: &str, patch: Value) -> AppResult<IndexResult>;

    async fn delete(&self, doc_id: &str) -> AppResult<IndexResult>;

    async fn get(&self, doc_id: &str) -> AppResult<Option<Value>>;

    /// Puts a document back under its original id (used by compensation).
    async fn restore(&self, doc_id: &str, document: Value) -> AppResult<IndexResult>;

    /// Documents whose top-level `field` equals `value`.
    async fn find(&self, field: &str, value: &Value) -> AppResult<Vec<(DocId, Value)>>;

    async fn list_ids(&self) -> AppResult<Vec<DocId>>;
}

/// Best-effort key/value cache. No transactional guarantees.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> AppResult<Option<String>>;
    async fn set(&self, key: &str, value: String) -> AppResult<()>;
    async fn del(&self, key: &str) -> AppResult<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub url: String,
    pub etag: String,
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn upload(&self, bytes: Vec<u8>, key: &str) -> AppResult<StoredBlob>;

    /// Removing a missing blob succeeds.
    async fn remove(&self, url: &str) -> AppResult<()>;

    async fn exists(&self, url: &str) -> AppResult<bool>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    Valid,
    Invalid,
}

/// Checks a proof against a claimed user id. Knows nothing about ownership.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, proof: &str, claimed_owner_id: VertexId) -> AppResult<Verification>;
}
