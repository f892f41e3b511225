use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::core::models::{Direction, VertexId};
use crate::core::relations::Relation;
use crate::error::AppResult;
use crate::infrastructure::traits::GraphStore;

/// Computes everything a delete has to take with it.
#[derive(Clone)]
pub struct CascadingDeletionEngine {
    graph: Arc<dyn GraphStore>,
}

impl CascadingDeletionEngine {
    pub fn new(graph: Arc<dyn GraphStore>) -> Self {
        Self { graph }
    }

    /// Breadth-first walk of outbound `child_relation` edges from `root`.
    ///
    /// The result starts with the root and lists every descendant once, in
    /// visit order. Ids already seen are never expanded again, so a cycle in
    /// a malformed graph terminates. Empty only when the root does not exist.
    #[instrument(skip(self))]
    pub async fn compute_reachable_set(
        &self,
        root: VertexId,
        child_relation: Relation,
    ) -> AppResult<Vec<VertexId>> {
        if self.graph.get_vertex(root).await?.is_none() {
            return Ok(Vec::new());
        }

        let mut visited: HashSet<VertexId> = HashSet::new();
        let mut queue: VecDeque<VertexId> = VecDeque::new();
        let mut reachable: Vec<VertexId> = Vec::new();
        visited.insert(root);
        queue.push_back(root);

        while let Some(id) = queue.pop_front() {
            reachable.push(id);
            let children = self
                .graph
                .traverse(id, child_relation, Direction::Outbound)
                .await?;
            for child in children {
                if visited.insert(child) {
                    queue.push_back(child);
                }
            }
        }

        debug!(root, count = reachable.len(), "Computed reachable set");
        Ok(reachable)
    }
}
