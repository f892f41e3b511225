// Create and update sagas.
//
// Every write runs the same gated sequence: upload media, index the
// document, write the vertex and its edge pairs in a graph transaction,
// link the document back to the vertex, commit, then refresh the cache.
// A failure at any step before the cache undoes everything done so far.

use chrono::Utc;
use futures::future::{join_all, try_join_all};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::core::documents::{
    document_kind, from_document, to_document, CommentDocument, PostDocument, ProfileDocument,
    FIELD_GRAPH_ID, FIELD_USERNAME,
};
use crate::core::models::{
    CreatedEntity, Direction, EntityKind, MediaUpload, NewComment, NewPost, NewProfile,
    Properties, ProfileUpdate, Vertex, VertexId, PROP_DOC_ID, PROP_POST_ID, PROP_USERNAME,
};
use crate::core::records::{post_key, profile_name_key, PostRecord, ProfileRecord};
use crate::core::relations::Relation;
use crate::error::{AppError, AppResult, StoreKind};
use crate::infrastructure::traits::IndexResult;
use crate::infrastructure::viewer::ViewerContext;
use crate::orchestration::authorization::{resolve_owner, AuthorizationGate};
use crate::orchestration::pending::PendingMutation;
use crate::orchestration::{
    authenticate, cache_invalidate, cache_put, spawn_saga, surface, Stores, WriteLimits,
};

static USERNAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9_]{3,32}$").expect("username pattern is valid"));

const MAX_DISPLAY_NAME_LEN: usize = 64;

pub fn validate_username(username: &str) -> AppResult<()> {
    if USERNAME_PATTERN.is_match(username) {
        Ok(())
    } else {
        Err(AppError::Validation(format!(
            "username '{}' must be 3-32 lowercase letters, digits or underscores",
            username
        )))
    }
}

fn validate_display_name(display_name: &str) -> AppResult<()> {
    let trimmed = display_name.trim();
    if trimmed.is_empty() {
        return Err(AppError::Validation("display name must not be empty".to_string()));
    }
    if trimmed.chars().count() > MAX_DISPLAY_NAME_LEN {
        return Err(AppError::Validation(format!(
            "display name exceeds {} characters",
            MAX_DISPLAY_NAME_LEN
        )));
    }
    Ok(())
}

/// Blob keys keep only a conservative subset of the client's file name.
fn sanitize_file_name(file_name: &str) -> String {
    let cleaned: String = file_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.trim_matches('.').is_empty() {
        "file".to_string()
    } else {
        cleaned
    }
}

fn doc_properties(doc_id: &str) -> Properties {
    let mut properties = Properties::new();
    properties.insert(PROP_DOC_ID.to_string(), json!(doc_id));
    properties
}

fn missing_document(id: VertexId) -> AppError {
    error!(integrity = true, vertex_id = id, "Vertex has no live search document");
    AppError::ConsistencyViolation(format!("entity {} has no search document", id))
}

#[derive(Clone)]
pub struct WriteOrchestrator {
    stores: Stores,
    limits: WriteLimits,
}

impl WriteOrchestrator {
    pub fn new(stores: Stores, limits: WriteLimits) -> Self {
        Self { stores, limits }
    }

    /// Registers a user: profile document plus user vertex.
    #[instrument(skip(self, profile), fields(username = %profile.username))]
    pub async fn create_profile(&self, profile: NewProfile) -> AppResult<CreatedEntity> {
        validate_username(&profile.username)?;
        validate_display_name(&profile.display_name)?;
        if let Some(bio) = &profile.bio {
            self.validate_length("bio", bio)?;
        }
        if let Some(avatar) = &profile.avatar {
            self.validate_media(std::slice::from_ref(avatar))?;
        }

        let this = self.clone();
        spawn_saga("create_profile", async move {
            this.ensure_username_free(&profile.username).await?;
            this.run_create_profile(profile).await
        })
        .await
        .map_err(|e| surface("create_profile", e))
    }

    #[instrument(skip(self, viewer, post), fields(user_id = viewer.user_id))]
    pub async fn create_post(&self, viewer: &ViewerContext, post: NewPost) -> AppResult<CreatedEntity> {
        self.validate_body(&post.body)?;
        self.validate_media(&post.media)?;

        let this = self.clone();
        let viewer = viewer.clone();
        spawn_saga("create_post", async move {
            let author = this.resolve_author(&viewer).await?;
            this.run_create_post(author, post).await
        })
        .await
        .map_err(|e| surface("create_post", e))
    }

    /// Adds a comment under a post or as a reply to another comment.
    #[instrument(skip(self, viewer, comment), fields(user_id = viewer.user_id, parent_id = comment.parent_id))]
    pub async fn add_comment(
        &self,
        viewer: &ViewerContext,
        comment: NewComment,
    ) -> AppResult<CreatedEntity> {
        self.validate_body(&comment.body)?;

        let this = self.clone();
        let viewer = viewer.clone();
        spawn_saga("add_comment", async move {
            let author = this.resolve_author(&viewer).await?;
            let parent = this
                .stores
                .graph
                .get_vertex(comment.parent_id)
                .await?
                .ok_or_else(|| {
                    AppError::Validation(format!("unknown parent {}", comment.parent_id))
                })?;
            let post_id = match parent.label {
                EntityKind::Post => parent.id,
                EntityKind::Comment => parent.post_id().ok_or_else(|| {
                    AppError::Validation(format!("comment {} is not attached to a post", parent.id))
                })?,
                EntityKind::User => {
                    return Err(AppError::Validation(
                        "comments must reply to a post or a comment".to_string(),
                    ))
                }
            };
            this.run_add_comment(author, parent.id, post_id, comment.body)
                .await
        })
        .await
        .map_err(|e| surface("add_comment", e))
    }

    #[instrument(skip(self, viewer, update), fields(requester = viewer.user_id))]
    pub async fn update_profile(
        &self,
        viewer: &ViewerContext,
        user_id: VertexId,
        update: ProfileUpdate,
    ) -> AppResult<ProfileRecord> {
        if update.is_empty() {
            return Err(AppError::Validation("profile update is empty".to_string()));
        }
        if let Some(username) = &update.username {
            validate_username(username)?;
        }
        if let Some(display_name) = &update.display_name {
            validate_display_name(display_name)?;
        }
        if let Some(bio) = &update.bio {
            self.validate_length("bio", bio)?;
        }
        if let Some(avatar) = &update.avatar {
            self.validate_media(std::slice::from_ref(avatar))?;
        }

        let this = self.clone();
        let viewer = viewer.clone();
        spawn_saga("update_profile", async move {
            let requester = authenticate(&this.stores, &viewer).await?;
            let vertex = this
                .stores
                .graph
                .get_vertex(user_id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("user {}", user_id)))?;
            if vertex.label != EntityKind::User {
                return Err(AppError::Validation(format!("{} is not a user", user_id)));
            }

            let owner = resolve_owner(this.stores.graph.as_ref(), &vertex).await?;
            AuthorizationGate::require(Some(requester), owner, user_id)?;

            let doc_id = vertex
                .doc_id()
                .map(str::to_string)
                .ok_or_else(|| missing_document(user_id))?;
            if let Some(username) = &update.username {
                if vertex.username() != Some(username.as_str()) {
                    this.ensure_username_free(username).await?;
                }
            }
            this.run_update_profile(user_id, doc_id, update).await
        })
        .await
        .map_err(|e| surface("update_profile", e))
    }

    async fn run_create_profile(&self, profile: NewProfile) -> AppResult<CreatedEntity> {
        let mut pending = PendingMutation::new("create_profile");
        match self.create_profile_steps(&mut pending, profile).await {
            Ok((created, record)) => {
                pending.complete();
                cache_put(self.stores.cache.as_ref(), &record.cache_keys(), &record).await;
                info!(user_id = created.entity_id, "Created profile");
                Ok(created)
            }
            Err(e) => {
                pending.compensate(&self.stores).await;
                Err(e)
            }
        }
    }

    async fn create_profile_steps(
        &self,
        pending: &mut PendingMutation,
        profile: NewProfile,
    ) -> AppResult<(CreatedEntity, ProfileRecord)> {
        let media_urls = self
            .upload_all(pending, "avatars", profile.avatar.into_iter().collect())
            .await?;

        let now = Utc::now();
        let mut document = ProfileDocument {
            kind: EntityKind::User,
            graph_id: None,
            username: profile.username,
            display_name: profile.display_name.trim().to_string(),
            bio: profile.bio,
            avatar_url: media_urls.first().cloned(),
            created_at: now,
            updated_at: now,
        };
        let write = self.stores.search.insert(to_document(&document)?).await?;
        pending.record_created_doc(write.doc_id.clone());

        pending.attach_tx(self.stores.graph.begin_transaction().await?);
        let mut properties = doc_properties(&write.doc_id);
        properties.insert(PROP_USERNAME.to_string(), json!(document.username));
        let user_id = pending.tx()?.add_vertex(EntityKind::User, properties).await?;

        self.link_document(&write.doc_id, user_id).await?;
        pending.commit().await?;

        document.graph_id = Some(user_id);
        let record = ProfileRecord::from_document(user_id, write.doc_id.clone(), document, 0, 0);
        Ok((
            CreatedEntity {
                entity_id: user_id,
                doc_id: write.doc_id,
                media_urls,
            },
            record,
        ))
    }

    async fn run_create_post(&self, author: Vertex, post: NewPost) -> AppResult<CreatedEntity> {
        let mut pending = PendingMutation::new("create_post");
        match self.create_post_steps(&mut pending, &author, post).await {
            Ok((created, record)) => {
                pending.complete();
                cache_put(self.stores.cache.as_ref(), &[record.cache_key()], &record).await;
                info!(post_id = created.entity_id, author_id = author.id, "Created post");
                Ok(created)
            }
            Err(e) => {
                pending.compensate(&self.stores).await;
                Err(e)
            }
        }
    }

    async fn create_post_steps(
        &self,
        pending: &mut PendingMutation,
        author: &Vertex,
        post: NewPost,
    ) -> AppResult<(CreatedEntity, PostRecord)> {
        let prefix = format!("media/{}", author.id);
        let media_urls = self.upload_all(pending, &prefix, post.media).await?;

        let mut document = PostDocument {
            kind: EntityKind::Post,
            graph_id: None,
            author_id: author.id,
            author_username: author.username().unwrap_or_default().to_string(),
            body: post.body,
            media: media_urls.clone(),
            created_at: Utc::now(),
        };
        let write = self.stores.search.insert(to_document(&document)?).await?;
        pending.record_created_doc(write.doc_id.clone());

        pending.attach_tx(self.stores.graph.begin_transaction().await?);
        let tx = pending.tx()?;
        let post_id = tx
            .add_vertex(EntityKind::Post, doc_properties(&write.doc_id))
            .await?;
        tx.add_edge_pair(author.id, post_id, Relation::Authored).await?;

        self.link_document(&write.doc_id, post_id).await?;
        pending.commit().await?;

        document.graph_id = Some(post_id);
        let record = PostRecord::from_document(post_id, write.doc_id.clone(), document, 0, 0);
        Ok((
            CreatedEntity {
                entity_id: post_id,
                doc_id: write.doc_id,
                media_urls,
            },
            record,
        ))
    }

    async fn run_add_comment(
        &self,
        author: Vertex,
        parent_id: VertexId,
        post_id: VertexId,
        body: String,
    ) -> AppResult<CreatedEntity> {
        let mut pending = PendingMutation::new("add_comment");
        let document = CommentDocument {
            kind: EntityKind::Comment,
            graph_id: None,
            author_id: author.id,
            author_username: author.username().unwrap_or_default().to_string(),
            post_id,
            parent_id,
            body,
            created_at: Utc::now(),
        };
        match self.add_comment_steps(&mut pending, author.id, document).await {
            Ok(created) => {
                pending.complete();
                // The root post's comment count changed.
                cache_invalidate(self.stores.cache.as_ref(), &[post_key(post_id)]).await;
                info!(comment_id = created.entity_id, parent_id, post_id, "Added comment");
                Ok(created)
            }
            Err(e) => {
                pending.compensate(&self.stores).await;
                Err(e)
            }
        }
    }

    async fn add_comment_steps(
        &self,
        pending: &mut PendingMutation,
        author_id: VertexId,
        document: CommentDocument,
    ) -> AppResult<CreatedEntity> {
        let write = self.stores.search.insert(to_document(&document)?).await?;
        pending.record_created_doc(write.doc_id.clone());

        pending.attach_tx(self.stores.graph.begin_transaction().await?);
        let tx = pending.tx()?;
        let mut properties = doc_properties(&write.doc_id);
        properties.insert(PROP_POST_ID.to_string(), json!(document.post_id));
        let comment_id = tx.add_vertex(EntityKind::Comment, properties).await?;

        // Owner and parent pairs are independent; both must land.
        try_join_all(vec![
            tx.add_edge_pair(author_id, comment_id, Relation::Authored),
            tx.add_edge_pair(document.parent_id, comment_id, Relation::HasComment),
        ])
        .await?;

        self.link_document(&write.doc_id, comment_id).await?;
        pending.commit().await?;

        Ok(CreatedEntity {
            entity_id: comment_id,
            doc_id: write.doc_id,
            media_urls: Vec::new(),
        })
    }

    async fn run_update_profile(
        &self,
        user_id: VertexId,
        doc_id: String,
        update: ProfileUpdate,
    ) -> AppResult<ProfileRecord> {
        let mut pending = PendingMutation::new("update_profile");
        match self
            .update_profile_steps(&mut pending, user_id, &doc_id, update)
            .await
        {
            Ok((previous, updated)) => {
                pending.complete();
                let record = self
                    .refresh_profile_cache(user_id, doc_id, updated, &previous.username)
                    .await;
                if let Some(old_avatar) = previous.avatar_url {
                    if record.avatar_url.as_deref() != Some(old_avatar.as_str()) {
                        if let Err(e) = self.stores.blobs.remove(&old_avatar).await {
                            warn!(url = %old_avatar, error = %e, "Failed to remove replaced avatar");
                        }
                    }
                }
                info!(user_id, "Updated profile");
                Ok(record)
            }
            Err(e) => {
                pending.compensate(&self.stores).await;
                Err(e)
            }
        }
    }

    async fn update_profile_steps(
        &self,
        pending: &mut PendingMutation,
        user_id: VertexId,
        doc_id: &str,
        update: ProfileUpdate,
    ) -> AppResult<(ProfileDocument, ProfileDocument)> {
        let snapshot = self
            .stores
            .search
            .get(doc_id)
            .await?
            .ok_or_else(|| missing_document(user_id))?;
        let previous: ProfileDocument = from_document(snapshot.clone())?;

        let avatar_url = match update.avatar {
            Some(avatar) => {
                let prefix = format!("avatars/{}", user_id);
                self.upload_all(pending, &prefix, vec![avatar])
                    .await?
                    .into_iter()
                    .next()
            }
            None => previous.avatar_url.clone(),
        };

        let mut updated = previous.clone();
        if let Some(username) = update.username {
            updated.username = username;
        }
        if let Some(display_name) = update.display_name {
            updated.display_name = display_name.trim().to_string();
        }
        if let Some(bio) = update.bio {
            updated.bio = Some(bio);
        }
        updated.avatar_url = avatar_url;
        updated.graph_id = Some(user_id);
        updated.updated_at = Utc::now();

        pending.record_snapshot(doc_id.to_string(), snapshot);
        if self
            .stores
            .search
            .update(doc_id, to_document(&updated)?)
            .await?
            == IndexResult::NotFound
        {
            return Err(missing_document(user_id));
        }

        pending.attach_tx(self.stores.graph.begin_transaction().await?);
        let mut properties = Properties::new();
        properties.insert(PROP_USERNAME.to_string(), json!(updated.username));
        pending.tx()?.set_properties(user_id, properties).await?;
        pending.commit().await?;

        Ok((previous, updated))
    }

    /// Rewrites both profile keys and drops the name key a rename left behind.
    async fn refresh_profile_cache(
        &self,
        user_id: VertexId,
        doc_id: String,
        document: ProfileDocument,
        previous_username: &str,
    ) -> ProfileRecord {
        let graph = &self.stores.graph;
        let counts = futures::try_join!(
            graph.traverse(user_id, Relation::FollowedBy, Direction::Outbound),
            graph.traverse(user_id, Relation::Follows, Direction::Outbound),
        );
        let cache = self.stores.cache.as_ref();

        let record = match counts {
            Ok((followers, following)) => {
                let record = ProfileRecord::from_document(
                    user_id,
                    doc_id,
                    document,
                    followers.len(),
                    following.len(),
                );
                cache_put(cache, &record.cache_keys(), &record).await;
                record
            }
            Err(e) => {
                warn!(user_id, error = %e, "Could not count follows, invalidating profile instead");
                let record = ProfileRecord::from_document(user_id, doc_id, document, 0, 0);
                cache_invalidate(cache, &record.cache_keys()).await;
                record
            }
        };

        if record.username != previous_username {
            cache_invalidate(cache, &[profile_name_key(previous_username)]).await;
        }
        record
    }

    async fn resolve_author(&self, viewer: &ViewerContext) -> AppResult<Vertex> {
        let author_id = authenticate(&self.stores, viewer).await?;
        match self.stores.graph.get_vertex(author_id).await? {
            Some(vertex) if vertex.label == EntityKind::User => Ok(vertex),
            _ => Err(AppError::Validation(format!("unknown author {}", author_id))),
        }
    }

    /// Best-effort uniqueness: two concurrent registrations can still race.
    async fn ensure_username_free(&self, username: &str) -> AppResult<()> {
        let taken = self
            .stores
            .search
            .find(FIELD_USERNAME, &json!(username))
            .await?
            .iter()
            .any(|(_, document)| document_kind(document) == Some(EntityKind::User));
        if taken {
            Err(AppError::Validation(format!(
                "username '{}' is already taken",
                username
            )))
        } else {
            Ok(())
        }
    }

    /// Uploads every file concurrently. Each successful upload is recorded
    /// for compensation even when a sibling fails.
    async fn upload_all(
        &self,
        pending: &mut PendingMutation,
        prefix: &str,
        media: Vec<MediaUpload>,
    ) -> AppResult<Vec<String>> {
        let uploads = media.into_iter().map(|upload| {
            let blobs = Arc::clone(&self.stores.blobs);
            let key = format!(
                "{}/{}-{}",
                prefix,
                Uuid::new_v4(),
                sanitize_file_name(&upload.file_name)
            );
            async move { blobs.upload(upload.bytes, &key).await }
        });

        let mut urls = Vec::new();
        let mut failure = None;
        for result in join_all(uploads).await {
            match result {
                Ok(stored) => {
                    pending.record_blob(stored.url.clone());
                    urls.push(stored.url);
                }
                Err(e) => {
                    failure.get_or_insert(e);
                }
            }
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(urls),
        }
    }

    /// Patches the new vertex id into its document.
    async fn link_document(&self, doc_id: &str, graph_id: VertexId) -> AppResult<()> {
        let mut patch = Map::new();
        patch.insert(FIELD_GRAPH_ID.to_string(), json!(graph_id));
        match self.stores.search.update(doc_id, Value::Object(patch)).await? {
            IndexResult::NotFound => Err(AppError::dependency(
                StoreKind::Search,
                format!("document {} vanished before it was linked", doc_id),
            )),
            _ => Ok(()),
        }
    }

    fn validate_body(&self, body: &str) -> AppResult<()> {
        if body.trim().is_empty() {
            return Err(AppError::Validation("body must not be empty".to_string()));
        }
        self.validate_length("body", body)
    }

    fn validate_length(&self, field: &str, text: &str) -> AppResult<()> {
        if text.chars().count() > self.limits.max_body_len {
            return Err(AppError::Validation(format!(
                "{} exceeds {} characters",
                field, self.limits.max_body_len
            )));
        }
        Ok(())
    }

    fn validate_media(&self, media: &[MediaUpload]) -> AppResult<()> {
        if media.len() > self.limits.max_media {
            return Err(AppError::Validation(format!(
                "at most {} media files are allowed",
                self.limits.max_media
            )));
        }
        if let Some(empty) = media.iter().find(|upload| upload.bytes.is_empty()) {
            return Err(AppError::Validation(format!(
                "media file '{}' is empty",
                empty.file_name
            )));
        }
        Ok(())
    }
}
