use crate::core::models::VertexId;

/// Who is making a request: the claimed user id and the proof backing it.
#[derive(Clone)]
pub struct ViewerContext {
    pub user_id: VertexId,
    pub proof: String,
}

impl ViewerContext {
    pub fn new(user_id: VertexId, proof: impl Into<String>) -> Self {
        ViewerContext {
            user_id,
            proof: proof.into(),
        }
    }
}

impl std::fmt::Debug for ViewerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewerContext")
            .field("user_id", &self.user_id)
            .field("proof", &"<redacted>")
            .finish()
    }
}
