// RelationshipService - follow and like edges between existing vertices.
// Only the graph is written; the cache records that embed counts are dropped.

use tracing::{info, instrument};

use crate::core::models::{EntityKind, Vertex, VertexId};
use crate::core::records::{post_key, profile_id_key, profile_name_key};
use crate::core::relations::Relation;
use crate::error::{AppError, AppResult};
use crate::infrastructure::viewer::ViewerContext;
use crate::orchestration::{
    authenticate, cache_invalidate, spawn_saga, surface, PendingMutation, Stores,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EdgeChange {
    Add,
    Drop,
}

#[derive(Clone)]
pub struct RelationshipService {
    stores: Stores,
}

fn profile_keys(vertex: &Vertex) -> Vec<String> {
    let mut keys = vec![profile_id_key(vertex.id)];
    keys.extend(vertex.username().map(profile_name_key));
    keys
}

impl RelationshipService {
    pub fn new(stores: Stores) -> Self {
        Self { stores }
    }

    #[instrument(skip(self, viewer), fields(requester = viewer.user_id))]
    pub async fn follow(&self, viewer: &ViewerContext, user_id: VertexId) -> AppResult<()> {
        self.spawn_change("follow", viewer, user_id, Relation::Follows, EdgeChange::Add)
            .await
    }

    #[instrument(skip(self, viewer), fields(requester = viewer.user_id))]
    pub async fn unfollow(&self, viewer: &ViewerContext, user_id: VertexId) -> AppResult<()> {
        self.spawn_change("unfollow", viewer, user_id, Relation::Follows, EdgeChange::Drop)
            .await
    }

    #[instrument(skip(self, viewer), fields(requester = viewer.user_id))]
    pub async fn like(&self, viewer: &ViewerContext, target_id: VertexId) -> AppResult<()> {
        self.spawn_change("like", viewer, target_id, Relation::Likes, EdgeChange::Add)
            .await
    }

    #[instrument(skip(self, viewer), fields(requester = viewer.user_id))]
    pub async fn unlike(&self, viewer: &ViewerContext, target_id: VertexId) -> AppResult<()> {
        self.spawn_change("unlike", viewer, target_id, Relation::Likes, EdgeChange::Drop)
            .await
    }

    async fn spawn_change(
        &self,
        operation: &'static str,
        viewer: &ViewerContext,
        target_id: VertexId,
        relation: Relation,
        change: EdgeChange,
    ) -> AppResult<()> {
        let this = self.clone();
        let viewer = viewer.clone();
        spawn_saga(operation, async move {
            this.apply_change(operation, &viewer, target_id, relation, change)
                .await
        })
        .await
        .map_err(|e| surface(operation, e))
    }

    async fn apply_change(
        &self,
        operation: &'static str,
        viewer: &ViewerContext,
        target_id: VertexId,
        relation: Relation,
        change: EdgeChange,
    ) -> AppResult<()> {
        let requester_id = authenticate(&self.stores, viewer).await?;
        if requester_id == target_id {
            return Err(AppError::Validation(format!("cannot {} yourself", operation)));
        }

        let (requester, target) = futures::try_join!(
            self.stores.graph.get_vertex(requester_id),
            self.stores.graph.get_vertex(target_id),
        )?;
        let requester = match requester {
            Some(vertex) if vertex.label == EntityKind::User => vertex,
            _ => return Err(AppError::Validation(format!("unknown user {}", requester_id))),
        };
        let target = target.ok_or_else(|| AppError::NotFound(format!("entity {}", target_id)))?;
        let target_allowed = match relation {
            Relation::Follows => target.label == EntityKind::User,
            _ => target.label != EntityKind::User,
        };
        if !target_allowed {
            return Err(AppError::Validation(format!(
                "cannot {} a {}",
                operation, target.label
            )));
        }

        let mut pending = PendingMutation::new(operation);
        if let Err(e) = self
            .write_edge(&mut pending, requester_id, target_id, relation, change)
            .await
        {
            pending.compensate(&self.stores).await;
            return Err(e);
        }
        pending.complete();

        let keys = match relation {
            Relation::Follows => {
                let mut keys = profile_keys(&requester);
                keys.extend(profile_keys(&target));
                keys
            }
            _ if target.label == EntityKind::Post => vec![post_key(target_id)],
            _ => Vec::new(),
        };
        cache_invalidate(self.stores.cache.as_ref(), &keys).await;

        info!(requester_id, target_id, relation = %relation, ?change, "Relationship updated");
        Ok(())
    }

    async fn write_edge(
        &self,
        pending: &mut PendingMutation,
        from: VertexId,
        to: VertexId,
        relation: Relation,
        change: EdgeChange,
    ) -> AppResult<()> {
        pending.attach_tx(self.stores.graph.begin_transaction().await?);
        let tx = pending.tx()?;
        match change {
            EdgeChange::Add => tx.add_edge_pair(from, to, relation).await?,
            EdgeChange::Drop => tx.drop_edge_pair(from, to, relation).await?,
        }
        pending.commit().await
    }
}
