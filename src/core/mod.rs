// Core types and primitives shared by stores and orchestrators

pub mod documents;
pub mod id_generator;
pub mod models;
pub mod records;
pub mod relations;

// Re-export commonly used types
pub use id_generator::VertexIdGenerator;
pub use models::{
    CreatedEntity, Direction, DocId, EntityKind, MediaUpload, NewComment, NewPost, NewProfile,
    Properties, ProfileUpdate, Vertex, VertexId,
};
pub use records::{PostRecord, ProfileRecord};
pub use relations::{EdgePair, Relation};
