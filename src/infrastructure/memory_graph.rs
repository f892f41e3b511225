// In-memory graph store. Transactions buffer their mutations and apply them
// atomically at commit, re-validating every referenced vertex against the
// committed state so a vertex deleted by a concurrent transaction makes the
// commit fail instead of resurrecting dangling edges.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::RwLock;
use tracing::debug;

use crate::core::id_generator::VertexIdGenerator;
use crate::core::models::{Direction, EntityKind, Properties, Vertex, VertexId};
use crate::core::relations::{EdgePair, Relation};
use crate::error::{AppError, AppResult, StoreKind};
use crate::infrastructure::fail_points::FailPoints;
use crate::infrastructure::traits::{GraphStore, GraphTransaction};

type Edge = (VertexId, Relation, VertexId);

#[derive(Debug, Clone, Default)]
struct GraphState {
    vertices: HashMap<VertexId, Vertex>,
    edges: BTreeSet<Edge>,
}

/// Buffered graph write, applied in order at commit.
#[derive(Debug, Clone)]
enum GraphMutation {
    AddVertex(Vertex),
    SetProperties { id: VertexId, properties: Properties },
    AddEdgePair(EdgePair),
    DropEdgePair(EdgePair),
    DropEdges(Vec<VertexId>),
    DropVertices(Vec<VertexId>),
}

fn conflict(message: String) -> AppError {
    AppError::dependency(StoreKind::Graph, format!("transaction conflict: {}", message))
}

impl GraphState {
    fn require_vertex(&self, id: VertexId) -> AppResult<()> {
        if self.vertices.contains_key(&id) {
            Ok(())
        } else {
            Err(conflict(format!("vertex {} does not exist", id)))
        }
    }

    fn apply(&mut self, mutation: GraphMutation) -> AppResult<()> {
        match mutation {
            GraphMutation::AddVertex(vertex) => {
                if self.vertices.contains_key(&vertex.id) {
                    return Err(conflict(format!("vertex {} already exists", vertex.id)));
                }
                self.vertices.insert(vertex.id, vertex);
            }
            GraphMutation::SetProperties { id, properties } => {
                let vertex = self
                    .vertices
                    .get_mut(&id)
                    .ok_or_else(|| conflict(format!("vertex {} does not exist", id)))?;
                vertex.properties.extend(properties);
            }
            GraphMutation::AddEdgePair(pair) => {
                self.require_vertex(pair.from)?;
                self.require_vertex(pair.to)?;
                for edge in pair.edges() {
                    self.edges.insert(edge);
                }
            }
            GraphMutation::DropEdgePair(pair) => {
                for edge in pair.edges() {
                    self.edges.remove(&edge);
                }
            }
            GraphMutation::DropEdges(ids) => {
                let ids: HashSet<VertexId> = ids.into_iter().collect();
                self.edges
                    .retain(|(out_id, _, in_id)| !ids.contains(out_id) && !ids.contains(in_id));
            }
            GraphMutation::DropVertices(ids) => {
                for id in ids {
                    if self
                        .edges
                        .iter()
                        .any(|(out_id, _, in_id)| *out_id == id || *in_id == id)
                    {
                        return Err(AppError::dependency(
                            StoreKind::Graph,
                            format!("vertex {} still has edges", id),
                        ));
                    }
                    self.vertices.remove(&id);
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct InMemoryGraphStore {
    state: Arc<RwLock<GraphState>>,
    ids: Arc<VertexIdGenerator>,
    fail_points: FailPoints,
}

impl Default for InMemoryGraphStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::with_fail_points(FailPoints::new())
    }

    pub fn with_fail_points(fail_points: FailPoints) -> Self {
        Self {
            state: Arc::new(RwLock::new(GraphState::default())),
            ids: Arc::new(VertexIdGenerator::new(0)),
            fail_points,
        }
    }

    pub async fn vertex_count(&self) -> usize {
        self.state.read().await.vertices.len()
    }

    pub async fn edge_count(&self) -> usize {
        self.state.read().await.edges.len()
    }

    /// Writes a single directed edge without its inverse. Only useful for
    /// building malformed graphs in tests.
    pub async fn insert_raw_edge(&self, from: VertexId, relation: Relation, to: VertexId) {
        self.state.write().await.edges.insert((from, relation, to));
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn begin_transaction(&self) -> AppResult<Box<dyn GraphTransaction>> {
        self.fail_points.check("graph.begin", StoreKind::Graph)?;
        Ok(Box::new(InMemoryGraphTransaction {
            state: Arc::clone(&self.state),
            ids: Arc::clone(&self.ids),
            fail_points: self.fail_points.clone(),
            pending: Mutex::new(Some(Vec::new())),
        }))
    }

    async fn get_vertex(&self, id: VertexId) -> AppResult<Option<Vertex>> {
        self.fail_points.check("graph.read", StoreKind::Graph)?;
        Ok(self.state.read().await.vertices.get(&id).cloned())
    }

    async fn traverse(
        &self,
        start: VertexId,
        relation: Relation,
        direction: Direction,
    ) -> AppResult<BTreeSet<VertexId>> {
        self.fail_points.check("graph.read", StoreKind::Graph)?;
        let state = self.state.read().await;
        let mut result = BTreeSet::new();

        if matches!(direction, Direction::Outbound | Direction::Both) {
            result.extend(
                state
                    .edges
                    .range((start, relation, VertexId::MIN)..=(start, relation, VertexId::MAX))
                    .map(|(_, _, in_id)| *in_id),
            );
        }
        if matches!(direction, Direction::Inbound | Direction::Both) {
            result.extend(
                state
                    .edges
                    .iter()
                    .filter(|(_, edge_relation, in_id)| *in_id == start && *edge_relation == relation)
                    .map(|(out_id, _, _)| *out_id),
            );
        }
        Ok(result)
    }

    async fn list_vertices(&self, label: EntityKind) -> AppResult<Vec<Vertex>> {
        self.fail_points.check("graph.read", StoreKind::Graph)?;
        let state = self.state.read().await;
        let mut vertices: Vec<Vertex> = state
            .vertices
            .values()
            .filter(|vertex| vertex.label == label)
            .cloned()
            .collect();
        vertices.sort_by_key(|vertex| vertex.id);
        Ok(vertices)
    }
}

pub struct InMemoryGraphTransaction {
    state: Arc<RwLock<GraphState>>,
    ids: Arc<VertexIdGenerator>,
    fail_points: FailPoints,
    /// `None` once committed or rolled back.
    pending: Mutex<Option<Vec<GraphMutation>>>,
}

impl InMemoryGraphTransaction {
    fn pending(&self) -> MutexGuard<'_, Option<Vec<GraphMutation>>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn stage(&self, fail_point: &str, mutation: GraphMutation) -> AppResult<()> {
        self.fail_points.check(fail_point, StoreKind::Graph)?;
        match self.pending().as_mut() {
            Some(mutations) => {
                mutations.push(mutation);
                Ok(())
            }
            None => Err(finished()),
        }
    }

    fn take(&self) -> AppResult<Vec<GraphMutation>> {
        self.pending().take().ok_or_else(finished)
    }
}

fn finished() -> AppError {
    AppError::dependency(StoreKind::Graph, "transaction already finished")
}

#[async_trait]
impl GraphTransaction for InMemoryGraphTransaction {
    async fn add_vertex(&self, label: EntityKind, properties: Properties) -> AppResult<VertexId> {
        let id = self.ids.next_id();
        self.stage(
            "graph.add_vertex",
            GraphMutation::AddVertex(Vertex {
                id,
                label,
                properties,
            }),
        )?;
        Ok(id)
    }

    async fn set_properties(&self, id: VertexId, properties: Properties) -> AppResult<()> {
        self.stage(
            "graph.set_properties",
            GraphMutation::SetProperties { id, properties },
        )
    }

    async fn add_edge_pair(&self, from: VertexId, to: VertexId, relation: Relation) -> AppResult<()> {
        self.stage(
            "graph.add_edge",
            GraphMutation::AddEdgePair(EdgePair::new(from, to, relation)),
        )
    }

    async fn drop_edge_pair(
        &self,
        from: VertexId,
        to: VertexId,
        relation: Relation,
    ) -> AppResult<()> {
        self.stage(
            "graph.drop_edge",
            GraphMutation::DropEdgePair(EdgePair::new(from, to, relation)),
        )
    }

    async fn drop_edges(&self, ids: &[VertexId]) -> AppResult<()> {
        self.stage("graph.drop_edges", GraphMutation::DropEdges(ids.to_vec()))
    }

    async fn drop_vertices(&self, ids: &[VertexId]) -> AppResult<()> {
        self.stage(
            "graph.drop_vertices",
            GraphMutation::DropVertices(ids.to_vec()),
        )
    }

    async fn commit(&self) -> AppResult<()> {
        let mutations = self.take()?;
        self.fail_points.check("graph.commit", StoreKind::Graph)?;

        let mut state = self.state.write().await;
        let mut next = state.clone();
        let count = mutations.len();
        for mutation in mutations {
            next.apply(mutation)?;
        }
        *state = next;
        debug!("Committed in-memory graph transaction with {} mutations", count);
        Ok(())
    }

    async fn rollback(&self) -> AppResult<()> {
        let discarded = self.take()?;
        self.fail_points.check("graph.rollback", StoreKind::Graph)?;
        debug!(
            "Rolled back in-memory graph transaction, discarded {} mutations",
            discarded.len()
        );
        Ok(())
    }
}
