// Delete saga: ownership check, cascade, graph drop, index delete, commit,
// cache invalidation. The graph commit is the last step that can fail the
// operation, so a failure anywhere before it leaves both stores as they were.

use futures::future::try_join_all;
use tracing::{error, info, instrument, warn};

use crate::core::models::{EntityKind, Vertex, VertexId};
use crate::core::records::post_key;
use crate::core::relations::Relation;
use crate::error::{AppError, AppResult, StoreKind};
use crate::infrastructure::traits::IndexResult;
use crate::infrastructure::viewer::ViewerContext;
use crate::orchestration::authorization::{resolve_owner, AuthorizationGate};
use crate::orchestration::cascade::CascadingDeletionEngine;
use crate::orchestration::pending::PendingMutation;
use crate::orchestration::{authenticate, cache_invalidate, spawn_saga, surface, Stores};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteStatus {
    /// Root first, then every cascaded descendant.
    Deleted { entity_ids: Vec<VertexId> },
    /// Nothing to delete; treated as success.
    NotFound,
}

#[derive(Clone)]
pub struct DeleteOrchestrator {
    stores: Stores,
    cascade: CascadingDeletionEngine,
    verify_deletes: bool,
}

impl DeleteOrchestrator {
    pub fn new(stores: Stores, verify_deletes: bool) -> Self {
        let cascade = CascadingDeletionEngine::new(stores.graph.clone());
        Self {
            stores,
            cascade,
            verify_deletes,
        }
    }

    /// Deletes a post or comment together with every reply beneath it.
    #[instrument(skip(self, viewer), fields(requester = viewer.user_id))]
    pub async fn delete_entity(
        &self,
        viewer: &ViewerContext,
        entity_id: VertexId,
    ) -> AppResult<DeleteStatus> {
        self.spawn_delete("delete_entity", viewer, entity_id, None)
            .await
    }

    #[instrument(skip(self, viewer), fields(requester = viewer.user_id))]
    pub async fn delete_post(&self, viewer: &ViewerContext, post_id: VertexId) -> AppResult<DeleteStatus> {
        self.spawn_delete("delete_post", viewer, post_id, Some(EntityKind::Post))
            .await
    }

    #[instrument(skip(self, viewer), fields(requester = viewer.user_id))]
    pub async fn delete_comment(
        &self,
        viewer: &ViewerContext,
        comment_id: VertexId,
    ) -> AppResult<DeleteStatus> {
        self.spawn_delete("delete_comment", viewer, comment_id, Some(EntityKind::Comment))
            .await
    }

    async fn spawn_delete(
        &self,
        operation: &'static str,
        viewer: &ViewerContext,
        entity_id: VertexId,
        expected: Option<EntityKind>,
    ) -> AppResult<DeleteStatus> {
        let this = self.clone();
        let viewer = viewer.clone();
        spawn_saga(operation, async move {
            this.run_delete(operation, &viewer, entity_id, expected)
                .await
        })
        .await
        .map_err(|e| surface(operation, e))
    }

    async fn run_delete(
        &self,
        operation: &'static str,
        viewer: &ViewerContext,
        entity_id: VertexId,
        expected: Option<EntityKind>,
    ) -> AppResult<DeleteStatus> {
        let requester = authenticate(&self.stores, viewer).await?;

        let root = match self.stores.graph.get_vertex(entity_id).await? {
            Some(vertex) => vertex,
            None => {
                info!(entity_id, "Entity already gone");
                return Ok(DeleteStatus::NotFound);
            }
        };
        match (root.label, expected) {
            (EntityKind::User, _) => {
                return Err(AppError::Validation(
                    "profiles cannot be deleted through this operation".to_string(),
                ))
            }
            (label, Some(kind)) if label != kind => {
                return Err(AppError::Validation(format!(
                    "{} is a {}, not a {}",
                    entity_id, label, kind
                )))
            }
            _ => {}
        }

        let owner = resolve_owner(self.stores.graph.as_ref(), &root).await?;
        AuthorizationGate::require(Some(requester), owner, entity_id)?;

        let reachable = self
            .cascade
            .compute_reachable_set(entity_id, Relation::HasComment)
            .await?;
        if reachable.is_empty() {
            return Ok(DeleteStatus::NotFound);
        }

        let vertices: Vec<Option<Vertex>> = try_join_all(
            reachable
                .iter()
                .map(|id| self.stores.graph.get_vertex(*id)),
        )
        .await?;

        let mut pending = PendingMutation::new(operation);
        if let Err(e) = self.delete_steps(&mut pending, &reachable, &vertices).await {
            pending.compensate(&self.stores).await;
            return Err(e);
        }
        pending.complete();

        if self.verify_deletes {
            self.verify_removed(entity_id).await?;
        }

        self.invalidate_cache(&root).await;
        info!(
            entity_id,
            cascaded = reachable.len() - 1,
            "Deleted {}",
            root.label
        );
        Ok(DeleteStatus::Deleted {
            entity_ids: reachable,
        })
    }

    async fn delete_steps(
        &self,
        pending: &mut PendingMutation,
        reachable: &[VertexId],
        vertices: &[Option<Vertex>],
    ) -> AppResult<()> {
        pending.attach_tx(self.stores.graph.begin_transaction().await?);
        let tx = pending.tx()?;
        tx.drop_edges(reachable).await?;
        tx.drop_vertices(reachable).await?;

        // Leaves first.
        for (id, vertex) in reachable.iter().zip(vertices).rev() {
            let doc_id = match vertex.as_ref().and_then(Vertex::doc_id) {
                Some(doc_id) => doc_id.to_string(),
                None => {
                    warn!(integrity = true, vertex_id = *id, "Vertex has no doc_id to delete");
                    continue;
                }
            };
            if let Some(snapshot) = self.stores.search.get(&doc_id).await? {
                pending.record_snapshot(doc_id.clone(), snapshot);
            }
            if self.stores.search.delete(&doc_id).await? == IndexResult::NotFound {
                warn!(vertex_id = *id, doc_id = %doc_id, "Search document was already gone");
            }
        }

        // A reply committed after the walk would lose its parent edge and
        // survive as an orphan vertex.
        let current = self
            .cascade
            .compute_reachable_set(reachable[0], Relation::HasComment)
            .await?;
        if let Some(late) = current.iter().find(|id| !reachable.contains(id)) {
            warn!(root = reachable[0], late_reply = *late, "Thread grew during delete");
            return Err(AppError::dependency(
                StoreKind::Graph,
                format!("thread {} changed while it was being deleted", reachable[0]),
            ));
        }

        pending.commit().await
    }

    async fn verify_removed(&self, entity_id: VertexId) -> AppResult<()> {
        match self.stores.graph.get_vertex(entity_id).await {
            Ok(Some(_)) => {
                error!(integrity = true, entity_id, "Vertex still resolves after delete committed");
                Err(AppError::ConsistencyViolation(format!(
                    "entity {} survived its delete",
                    entity_id
                )))
            }
            Ok(None) => Ok(()),
            Err(e) => {
                warn!(entity_id, error = %e, "Could not verify delete");
                Ok(())
            }
        }
    }

    async fn invalidate_cache(&self, root: &Vertex) {
        let keys = match root.label {
            EntityKind::Post => vec![post_key(root.id)],
            EntityKind::Comment => root.post_id().map(post_key).into_iter().collect(),
            EntityKind::User => Vec::new(),
        };
        cache_invalidate(self.stores.cache.as_ref(), &keys).await;
    }
}
