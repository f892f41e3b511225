// Denormalized search documents, one per indexed vertex

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::models::{EntityKind, VertexId};
use crate::error::{AppError, AppResult};

pub const FIELD_KIND: &str = "kind";
pub const FIELD_GRAPH_ID: &str = "graph_id";
pub const FIELD_USERNAME: &str = "username";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileDocument {
    pub kind: EntityKind,
    /// Filled in once the graph vertex exists.
    #[serde(default)]
    pub graph_id: Option<VertexId>,
    pub username: String,
    pub display_name: String,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostDocument {
    pub kind: EntityKind,
    #[serde(default)]
    pub graph_id: Option<VertexId>,
    pub author_id: VertexId,
    pub author_username: String,
    pub body: String,
    #[serde(default)]
    pub media: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentDocument {
    pub kind: EntityKind,
    #[serde(default)]
    pub graph_id: Option<VertexId>,
    pub author_id: VertexId,
    pub author_username: String,
    pub post_id: VertexId,
    pub parent_id: VertexId,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

pub fn to_document<T: Serialize>(document: &T) -> AppResult<Value> {
    Ok(serde_json::to_value(document)?)
}

pub fn from_document<T: DeserializeOwned>(document: Value) -> AppResult<T> {
    serde_json::from_value(document)
        .map_err(|e| AppError::SerializationError(format!("malformed search document: {}", e)))
}

/// Cross-reference from a document back to its vertex, if patched yet.
pub fn document_graph_id(document: &Value) -> Option<VertexId> {
    document.get(FIELD_GRAPH_ID).and_then(Value::as_i64)
}

pub fn document_kind(document: &Value) -> Option<EntityKind> {
    document
        .get(FIELD_KIND)
        .and_then(Value::as_str)
        .and_then(|kind| kind.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unpatched_document_has_no_graph_id() {
        let document = PostDocument {
            kind: EntityKind::Post,
            graph_id: None,
            author_id: 1,
            author_username: "ada".into(),
            body: "hello".into(),
            media: vec![],
            created_at: Utc::now(),
        };
        let value = to_document(&document).unwrap();
        assert_eq!(document_graph_id(&value), None);
        assert_eq!(document_kind(&value), Some(EntityKind::Post));

        let mut patched = value.clone();
        patched[FIELD_GRAPH_ID] = json!(77);
        assert_eq!(document_graph_id(&patched), Some(77));
        let decoded: PostDocument = from_document(patched).unwrap();
        assert_eq!(decoded.graph_id, Some(77));
    }

    #[test]
    fn test_malformed_document_is_a_serialization_error() {
        let result: AppResult<ProfileDocument> = from_document(json!({"kind": "user"}));
        assert!(matches!(result, Err(AppError::SerializationError(_))));
    }
}
