use tracing::{debug, warn};

use crate::core::models::{Direction, EntityKind, Vertex, VertexId};
use crate::core::relations::Relation;
use crate::error::{AppError, AppResult};
use crate::infrastructure::traits::GraphStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    Allow,
    Deny,
}

/// Owner-only gate for mutations. The owner always comes from the graph;
/// the requester is whoever the identity proof vouched for.
pub struct AuthorizationGate;

impl AuthorizationGate {
    /// Denies when either side is unknown or they differ.
    pub fn authorize(requester: Option<VertexId>, owner: Option<VertexId>) -> AccessDecision {
        match (requester, owner) {
            (Some(requester), Some(owner)) if requester == owner => AccessDecision::Allow,
            _ => AccessDecision::Deny,
        }
    }

    pub fn require(
        requester: Option<VertexId>,
        owner: Option<VertexId>,
        entity_id: VertexId,
    ) -> AppResult<()> {
        match Self::authorize(requester, owner) {
            AccessDecision::Allow => Ok(()),
            AccessDecision::Deny => {
                debug!(?requester, ?owner, entity_id, "Authorization denied");
                Err(AppError::Forbidden(format!(
                    "not allowed to modify entity {}",
                    entity_id
                )))
            }
        }
    }
}

/// Owner of a vertex as recorded in the graph. Users own themselves; posts
/// and comments are owned by the single user on their `authored_by` edge.
/// A missing or ambiguous author resolves to `None`.
pub async fn resolve_owner(graph: &dyn GraphStore, vertex: &Vertex) -> AppResult<Option<VertexId>> {
    if vertex.label == EntityKind::User {
        return Ok(Some(vertex.id));
    }

    let authors = graph
        .traverse(vertex.id, Relation::AuthoredBy, Direction::Outbound)
        .await?;
    let mut authors = authors.into_iter();
    match (authors.next(), authors.next()) {
        (Some(owner), None) => Ok(Some(owner)),
        (None, _) => Ok(None),
        (Some(_), Some(_)) => {
            warn!(integrity = true, vertex_id = vertex.id, "Vertex has more than one author");
            Ok(None)
        }
    }
}
