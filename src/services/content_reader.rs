// ContentReader - read-through access to posts, profiles and comment threads.
// Cache first; on a miss the record is rebuilt from graph + index and cached.

use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, instrument, warn};

use crate::core::documents::{
    document_graph_id, document_kind, from_document, CommentDocument, PostDocument,
    ProfileDocument, FIELD_USERNAME,
};
use crate::core::models::{Direction, DocId, EntityKind, Vertex, VertexId};
use crate::core::records::{post_key, profile_id_key, profile_name_key, PostRecord, ProfileRecord};
use crate::core::relations::Relation;
use crate::error::{AppError, AppResult};
use crate::orchestration::{cache_invalidate, cache_put, CascadingDeletionEngine, Stores};

/// A direct reply as returned by `list_comments`. Not cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentView {
    pub id: VertexId,
    pub doc_id: DocId,
    pub author_id: VertexId,
    pub author_username: String,
    pub parent_id: VertexId,
    pub body: String,
    pub reply_count: usize,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct ContentReader {
    stores: Stores,
    cascade: CascadingDeletionEngine,
}

impl ContentReader {
    pub fn new(stores: Stores) -> Self {
        let cascade = CascadingDeletionEngine::new(stores.graph.clone());
        Self { stores, cascade }
    }

    #[instrument(skip(self))]
    pub async fn get_post(&self, post_id: VertexId) -> AppResult<PostRecord> {
        let key = post_key(post_id);
        if let Some(record) = self.cached::<PostRecord>(&key).await {
            return Ok(record);
        }

        let vertex = self.vertex_of_kind(post_id, EntityKind::Post).await?;
        let (doc_id, document) = self.document_of::<PostDocument>(&vertex).await?;
        let (thread, likes) = futures::try_join!(
            self.cascade
                .compute_reachable_set(post_id, Relation::HasComment),
            self.stores
                .graph
                .traverse(post_id, Relation::LikedBy, Direction::Outbound),
        )?;

        let comment_count = thread.len().saturating_sub(1);
        let record = PostRecord::from_document(post_id, doc_id, document, comment_count, likes.len());
        self.cache_if_present(post_id, &[key], &record).await?;
        Ok(record)
    }

    #[instrument(skip(self))]
    pub async fn get_profile(&self, user_id: VertexId) -> AppResult<ProfileRecord> {
        if let Some(record) = self.cached::<ProfileRecord>(&profile_id_key(user_id)).await {
            return Ok(record);
        }
        self.load_profile(user_id).await
    }

    #[instrument(skip(self))]
    pub async fn get_profile_by_name(&self, username: &str) -> AppResult<ProfileRecord> {
        if let Some(record) = self.cached::<ProfileRecord>(&profile_name_key(username)).await {
            return Ok(record);
        }

        let user_id = self
            .stores
            .search
            .find(FIELD_USERNAME, &json!(username))
            .await?
            .iter()
            .filter(|(_, document)| document_kind(document) == Some(EntityKind::User))
            .find_map(|(_, document)| document_graph_id(document))
            .ok_or_else(|| AppError::NotFound(format!("user '{}'", username)))?;

        let record = self.load_profile(user_id).await?;
        if record.username != username {
            // The index matched a stale name; the vertex is authoritative.
            return Err(AppError::NotFound(format!("user '{}'", username)));
        }
        Ok(record)
    }

    /// Direct replies to a post or comment, oldest first.
    #[instrument(skip(self))]
    pub async fn list_comments(&self, parent_id: VertexId) -> AppResult<Vec<CommentView>> {
        let parent = self
            .stores
            .graph
            .get_vertex(parent_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("entity {}", parent_id)))?;
        if parent.label == EntityKind::User {
            return Err(AppError::Validation(format!("{} is not a post or comment", parent_id)));
        }

        let children = self
            .stores
            .graph
            .traverse(parent_id, Relation::HasComment, Direction::Outbound)
            .await?;
        let mut comments = try_join_all(children.into_iter().map(|id| self.load_comment(id))).await?
            .into_iter()
            .flatten()
            .collect::<Vec<_>>();
        comments.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(comments)
    }

    async fn load_profile(&self, user_id: VertexId) -> AppResult<ProfileRecord> {
        let vertex = self.vertex_of_kind(user_id, EntityKind::User).await?;
        let (doc_id, document) = self.document_of::<ProfileDocument>(&vertex).await?;
        let (followers, following) = futures::try_join!(
            self.stores
                .graph
                .traverse(user_id, Relation::FollowedBy, Direction::Outbound),
            self.stores
                .graph
                .traverse(user_id, Relation::Follows, Direction::Outbound),
        )?;

        let record = ProfileRecord::from_document(
            user_id,
            doc_id,
            document,
            followers.len(),
            following.len(),
        );
        self.cache_if_present(user_id, &record.cache_keys(), &record).await?;
        Ok(record)
    }

    /// `None` when the comment vanished between traversal and lookup.
    async fn load_comment(&self, comment_id: VertexId) -> AppResult<Option<CommentView>> {
        let vertex = match self.stores.graph.get_vertex(comment_id).await? {
            Some(vertex) => vertex,
            None => return Ok(None),
        };
        let (doc_id, document) = match self.document_of::<CommentDocument>(&vertex).await {
            Ok(found) => found,
            Err(AppError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        let replies = self
            .stores
            .graph
            .traverse(comment_id, Relation::HasComment, Direction::Outbound)
            .await?;

        Ok(Some(CommentView {
            id: comment_id,
            doc_id,
            author_id: document.author_id,
            author_username: document.author_username,
            parent_id: document.parent_id,
            body: document.body,
            reply_count: replies.len(),
            created_at: document.created_at,
        }))
    }

    /// Caches `record`, then confirms its vertex still exists. A delete
    /// invalidates after it commits, so a record built from a vertex deleted
    /// mid-read is either removed by that delete or caught here.
    async fn cache_if_present<T: Serialize>(
        &self,
        id: VertexId,
        keys: &[String],
        record: &T,
    ) -> AppResult<()> {
        cache_put(self.stores.cache.as_ref(), keys, record).await;
        if self.stores.graph.get_vertex(id).await?.is_none() {
            debug!(id, "Vertex deleted during read, dropping cached record");
            cache_invalidate(self.stores.cache.as_ref(), keys).await;
            return Err(AppError::NotFound(format!("entity {}", id)));
        }
        Ok(())
    }

    async fn cached<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.stores.cache.get(key).await {
            Ok(Some(payload)) => match serde_json::from_str(&payload) {
                Ok(record) => {
                    debug!(key, "Cache hit");
                    Some(record)
                }
                Err(e) => {
                    warn!(key, error = %e, "Discarding unreadable cache record");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(key, error = %e, "Cache read failed, falling back to stores");
                None
            }
        }
    }

    async fn vertex_of_kind(&self, id: VertexId, kind: EntityKind) -> AppResult<Vertex> {
        match self.stores.graph.get_vertex(id).await? {
            Some(vertex) if vertex.label == kind => Ok(vertex),
            _ => Err(AppError::NotFound(format!("{} {}", kind, id))),
        }
    }

    async fn document_of<T: DeserializeOwned>(&self, vertex: &Vertex) -> AppResult<(DocId, T)> {
        let doc_id = vertex
            .doc_id()
            .ok_or_else(|| AppError::NotFound(format!("{} {} has no document", vertex.label, vertex.id)))?
            .to_string();
        let document = self.stores.search.get(&doc_id).await?.ok_or_else(|| {
            warn!(integrity = true, vertex_id = vertex.id, doc_id = %doc_id, "Vertex references a missing document");
            AppError::NotFound(format!("{} {}", vertex.label, vertex.id))
        })?;
        Ok((doc_id, from_document(document)?))
    }
}
