// Store contracts and the bundled backends
pub mod traits;                // Store client contracts
pub mod fail_points;           // Failure injection for in-memory backends
pub mod memory_graph;          // In-memory graph with buffered transactions
pub mod sqlite_graph;          // SQLite graph store
pub mod search_index;          // In-memory document index
pub mod cache_layer;           // LRU read cache
pub mod blob_store;            // Filesystem and in-memory blob stores
pub mod identity;              // JWT identity proofs
pub mod retry;                 // Retrying store decorators
pub mod viewer;                // Viewer context

pub use traits::{
    BlobStore, CacheStore, GraphStore, GraphTransaction, IdentityVerifier, IndexResult,
    IndexWrite, SearchIndex, StoredBlob, Verification,
};
pub use fail_points::FailPoints;
pub use memory_graph::InMemoryGraphStore;
pub use sqlite_graph::SqliteGraphStore;
pub use search_index::InMemorySearchIndex;
pub use cache_layer::{CacheMetrics, LruCacheStore};
pub use blob_store::{FsBlobStore, InMemoryBlobStore};
pub use identity::JwtIdentityVerifier;
pub use retry::{RetryPolicy, RetryingBlobStore, RetryingSearchIndex};
pub use viewer::ViewerContext;
