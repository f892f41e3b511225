// Side effects performed by one in-flight saga, kept so they can be undone.

use serde_json::Value;
use tracing::{debug, error};

use crate::core::models::DocId;
use crate::error::{AppError, AppResult, StoreKind};
use crate::infrastructure::traits::GraphTransaction;
use crate::orchestration::Stores;

/// Owned by a single saga invocation and discarded when it finishes.
///
/// Compensation runs in reverse dependency order: the graph transaction is
/// rolled back first, then index documents are restored or removed, then
/// uploaded blobs are deleted. A failing compensation step is logged as an
/// integrity signal and the remaining steps still run.
pub struct PendingMutation {
    operation: &'static str,
    blobs: Vec<String>,
    created_docs: Vec<DocId>,
    snapshots: Vec<(DocId, Value)>,
    graph_tx: Option<Box<dyn GraphTransaction>>,
}

impl PendingMutation {
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            blobs: Vec::new(),
            created_docs: Vec::new(),
            snapshots: Vec::new(),
            graph_tx: None,
        }
    }

    pub fn operation(&self) -> &'static str {
        self.operation
    }

    pub fn record_blob(&mut self, url: String) {
        self.blobs.push(url);
    }

    pub fn record_created_doc(&mut self, doc_id: DocId) {
        self.created_docs.push(doc_id);
    }

    /// Remember a document's state before it is patched or deleted.
    pub fn record_snapshot(&mut self, doc_id: DocId, document: Value) {
        self.snapshots.push((doc_id, document));
    }

    pub fn attach_tx(&mut self, tx: Box<dyn GraphTransaction>) {
        self.graph_tx = Some(tx);
    }

    pub fn tx(&self) -> AppResult<&dyn GraphTransaction> {
        self.graph_tx.as_deref().ok_or_else(|| {
            AppError::dependency(
                StoreKind::Graph,
                format!("{} has no open graph transaction", self.operation),
            )
        })
    }

    /// Commits the attached transaction. Whatever the outcome, the
    /// transaction is no longer owned here, so a failed commit is never
    /// rolled back a second time.
    pub async fn commit(&mut self) -> AppResult<()> {
        let tx = self.graph_tx.take().ok_or_else(|| {
            AppError::dependency(
                StoreKind::Graph,
                format!("{} has no open graph transaction", self.operation),
            )
        })?;
        tx.commit().await
    }

    /// The saga finished; nothing is left to undo.
    pub fn complete(self) {
        debug!(
            operation = self.operation,
            blobs = self.blobs.len(),
            documents = self.created_docs.len(),
            "Saga completed"
        );
    }

    pub async fn compensate(mut self, stores: &Stores) {
        let operation = self.operation;

        if let Some(tx) = self.graph_tx.take() {
            if let Err(e) = tx.rollback().await {
                error!(integrity = true, operation, error = %e, "Graph rollback failed");
            }
        }

        while let Some((doc_id, document)) = self.snapshots.pop() {
            if let Err(e) = stores.search.restore(&doc_id, document).await {
                error!(integrity = true, operation, doc_id = %doc_id, error = %e, "Failed to restore search document");
            }
        }

        while let Some(doc_id) = self.created_docs.pop() {
            if let Err(e) = stores.search.delete(&doc_id).await {
                error!(integrity = true, operation, doc_id = %doc_id, error = %e, "Failed to delete search document");
            }
        }

        while let Some(url) = self.blobs.pop() {
            if let Err(e) = stores.blobs.remove(&url).await {
                error!(integrity = true, operation, url = %url, error = %e, "Failed to remove orphaned blob");
            }
        }

        debug!(operation, "Compensation finished");
    }
}
