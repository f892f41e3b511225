// Edge relations - every edge is written as a forward/inverse pair so
// traversal works from either endpoint

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::core::models::VertexId;
use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    /// user -> post/comment
    Authored,
    AuthoredBy,
    /// post/comment -> direct child comment
    HasComment,
    CommentOn,
    Follows,
    FollowedBy,
    Likes,
    LikedBy,
}

impl Relation {
    pub const ALL: [Relation; 8] = [
        Relation::Authored,
        Relation::AuthoredBy,
        Relation::HasComment,
        Relation::CommentOn,
        Relation::Follows,
        Relation::FollowedBy,
        Relation::Likes,
        Relation::LikedBy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Relation::Authored => "authored",
            Relation::AuthoredBy => "authored_by",
            Relation::HasComment => "has_comment",
            Relation::CommentOn => "comment_on",
            Relation::Follows => "follows",
            Relation::FollowedBy => "followed_by",
            Relation::Likes => "likes",
            Relation::LikedBy => "liked_by",
        }
    }

    /// The relation stored on the opposite edge of the pair.
    pub fn inverse(&self) -> Relation {
        match self {
            Relation::Authored => Relation::AuthoredBy,
            Relation::AuthoredBy => Relation::Authored,
            Relation::HasComment => Relation::CommentOn,
            Relation::CommentOn => Relation::HasComment,
            Relation::Follows => Relation::FollowedBy,
            Relation::FollowedBy => Relation::Follows,
            Relation::Likes => Relation::LikedBy,
            Relation::LikedBy => Relation::Likes,
        }
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Relation {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Relation::ALL
            .iter()
            .copied()
            .find(|relation| relation.as_str() == s)
            .ok_or_else(|| AppError::SerializationError(format!("unknown relation '{}'", s)))
    }
}

/// One directed edge plus its inverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgePair {
    pub from: VertexId,
    pub to: VertexId,
    pub relation: Relation,
}

impl EdgePair {
    pub fn new(from: VertexId, to: VertexId, relation: Relation) -> Self {
        Self { from, to, relation }
    }

    /// Both stored edges as `(out, relation, in)` triples.
    pub fn edges(&self) -> [(VertexId, Relation, VertexId); 2] {
        [
            (self.from, self.relation, self.to),
            (self.to, self.relation.inverse(), self.from),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inverse_mapping() {
        for relation in Relation::ALL {
            assert_eq!(relation.inverse().inverse(), relation);
            assert_ne!(relation.inverse(), relation);
        }
        assert_eq!(Relation::HasComment.inverse(), Relation::CommentOn);
        assert_eq!(Relation::Follows.inverse(), Relation::FollowedBy);
    }

    #[test]
    fn test_round_trips_through_str() {
        for relation in Relation::ALL {
            assert_eq!(relation.as_str().parse::<Relation>().unwrap(), relation);
        }
        assert!("friendship".parse::<Relation>().is_err());
    }

    #[test]
    fn test_edge_pair_expands_to_both_directions() {
        let pair = EdgePair::new(1, 2, Relation::Likes);
        assert_eq!(
            pair.edges(),
            [(1, Relation::Likes, 2), (2, Relation::LikedBy, 1)]
        );
    }
}
