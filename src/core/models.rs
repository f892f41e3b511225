// Graph-facing entity types and write payloads

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::AppError;

/// Graph-assigned vertex identifier.
pub type VertexId = i64;

/// Search-index-assigned document identifier.
pub type DocId = String;

/// Vertex properties as stored by the graph backend.
pub type Properties = BTreeMap<String, Value>;

pub const PROP_DOC_ID: &str = "doc_id";
pub const PROP_USERNAME: &str = "username";
pub const PROP_POST_ID: &str = "post_id";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    User,
    Post,
    Comment,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::User => "user",
            EntityKind::Post => "post",
            EntityKind::Comment => "comment",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(EntityKind::User),
            "post" => Ok(EntityKind::Post),
            "comment" => Ok(EntityKind::Comment),
            other => Err(AppError::SerializationError(format!(
                "unknown vertex label '{}'",
                other
            ))),
        }
    }
}

/// Traversal direction relative to the start vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outbound,
    Inbound,
    Both,
}

/// Typed vertex record decoded at the graph store boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vertex {
    pub id: VertexId,
    pub label: EntityKind,
    pub properties: Properties,
}

impl Vertex {
    pub fn doc_id(&self) -> Option<&str> {
        self.properties.get(PROP_DOC_ID).and_then(Value::as_str)
    }

    pub fn username(&self) -> Option<&str> {
        self.properties.get(PROP_USERNAME).and_then(Value::as_str)
    }

    /// Root post of a comment vertex.
    pub fn post_id(&self) -> Option<VertexId> {
        self.properties.get(PROP_POST_ID).and_then(Value::as_i64)
    }
}

/// A media file attached to a write request.
#[derive(Debug, Clone)]
pub struct MediaUpload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl MediaUpload {
    pub fn new(file_name: impl Into<String>, content_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.into(),
            bytes,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewProfile {
    pub username: String,
    pub display_name: String,
    pub bio: Option<String>,
    pub avatar: Option<MediaUpload>,
}

#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub username: Option<String>,
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub avatar: Option<MediaUpload>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.username.is_none()
            && self.display_name.is_none()
            && self.bio.is_none()
            && self.avatar.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct NewPost {
    pub body: String,
    pub media: Vec<MediaUpload>,
}

/// `parent_id` is either the post or the comment being replied to.
#[derive(Debug, Clone)]
pub struct NewComment {
    pub parent_id: VertexId,
    pub body: String,
}

/// Result of a successful create: both halves of the two-way reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedEntity {
    pub entity_id: VertexId,
    pub doc_id: DocId,
    pub media_urls: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_vertex_property_accessors() {
        let mut properties = Properties::new();
        properties.insert(PROP_DOC_ID.to_string(), json!("doc-1"));
        properties.insert(PROP_POST_ID.to_string(), json!(99));
        let vertex = Vertex {
            id: 5,
            label: EntityKind::Comment,
            properties,
        };
        assert_eq!(vertex.doc_id(), Some("doc-1"));
        assert_eq!(vertex.post_id(), Some(99));
        assert_eq!(vertex.username(), None);
    }

    #[test]
    fn test_entity_kind_parsing() {
        assert_eq!("post".parse::<EntityKind>().unwrap(), EntityKind::Post);
        assert!("group".parse::<EntityKind>().is_err());
    }
}
