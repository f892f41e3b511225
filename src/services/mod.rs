// Read path, relationship edges and cross-store auditing built on top of the stores

pub mod consistency_audit;
pub mod content_reader;
pub mod relationship_service;

pub use consistency_audit::{AuditFinding, AuditReport, ConsistencyAuditor};
pub use content_reader::{CommentView, ContentReader};
pub use relationship_service::RelationshipService;
