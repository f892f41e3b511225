// Denormalized cache records and the keys they live under

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::documents::{PostDocument, ProfileDocument};
use crate::core::models::{DocId, VertexId};

pub fn profile_id_key(id: VertexId) -> String {
    format!("profile:id:{}", id)
}

pub fn profile_name_key(username: &str) -> String {
    format!("profile:name:{}", username)
}

pub fn post_key(id: VertexId) -> String {
    format!("post:{}", id)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileRecord {
    pub id: VertexId,
    pub doc_id: DocId,
    pub username: String,
    pub display_name: String,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
    pub follower_count: usize,
    pub following_count: usize,
}

impl ProfileRecord {
    pub fn from_document(
        id: VertexId,
        doc_id: DocId,
        document: ProfileDocument,
        follower_count: usize,
        following_count: usize,
    ) -> Self {
        Self {
            id,
            doc_id,
            username: document.username,
            display_name: document.display_name,
            bio: document.bio,
            avatar_url: document.avatar_url,
            follower_count,
            following_count,
        }
    }

    /// Every key this profile is reachable under; written and dropped together.
    pub fn cache_keys(&self) -> [String; 2] {
        [profile_id_key(self.id), profile_name_key(&self.username)]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostRecord {
    pub id: VertexId,
    pub doc_id: DocId,
    pub author_id: VertexId,
    pub author_username: String,
    pub body: String,
    pub media: Vec<String>,
    pub comment_count: usize,
    pub like_count: usize,
    pub created_at: DateTime<Utc>,
}

impl PostRecord {
    pub fn from_document(
        id: VertexId,
        doc_id: DocId,
        document: PostDocument,
        comment_count: usize,
        like_count: usize,
    ) -> Self {
        Self {
            id,
            doc_id,
            author_id: document.author_id,
            author_username: document.author_username,
            body: document.body,
            media: document.media,
            comment_count,
            like_count,
            created_at: document.created_at,
        }
    }

    pub fn cache_key(&self) -> String {
        post_key(self.id)
    }
}
