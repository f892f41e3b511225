// ConsistencyAuditor - cross-checks the graph against the search index and
// reports entities that lost their other half.

use serde::Serialize;
use std::collections::HashMap;
use tracing::{error, info, instrument};

use crate::core::documents::{document_graph_id, document_kind};
use crate::core::models::{DocId, EntityKind, VertexId};
use crate::error::AppResult;
use crate::orchestration::Stores;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "finding", rename_all = "snake_case")]
pub enum AuditFinding {
    /// Vertex whose `doc_id` is absent or points at no live document.
    MissingDocument {
        vertex_id: VertexId,
        kind: EntityKind,
        doc_id: Option<DocId>,
    },
    /// Document that names a vertex the graph does not have.
    OrphanDocument { doc_id: DocId, graph_id: VertexId },
    /// Document that was never patched with its vertex id.
    UnlinkedDocument { doc_id: DocId },
    /// Vertex and document point at different partners.
    MismatchedReference {
        vertex_id: VertexId,
        doc_id: DocId,
        graph_id: Option<VertexId>,
    },
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AuditReport {
    pub vertices_scanned: usize,
    pub documents_scanned: usize,
    pub findings: Vec<AuditFinding>,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }
}

#[derive(Clone)]
pub struct ConsistencyAuditor {
    stores: Stores,
}

impl ConsistencyAuditor {
    pub fn new(stores: Stores) -> Self {
        Self { stores }
    }

    /// Point-in-time scan. Sagas still in flight can show up as unlinked
    /// documents.
    #[instrument(skip(self))]
    pub async fn audit(&self) -> AppResult<AuditReport> {
        let mut report = AuditReport::default();

        let mut vertex_docs: HashMap<VertexId, (EntityKind, Option<DocId>)> = HashMap::new();
        for kind in [EntityKind::User, EntityKind::Post, EntityKind::Comment] {
            for vertex in self.stores.graph.list_vertices(kind).await? {
                vertex_docs.insert(vertex.id, (kind, vertex.doc_id().map(str::to_string)));
            }
        }
        report.vertices_scanned = vertex_docs.len();

        let mut documents: HashMap<DocId, Option<VertexId>> = HashMap::new();
        for doc_id in self.stores.search.list_ids().await? {
            if let Some(document) = self.stores.search.get(&doc_id).await? {
                if document_kind(&document).is_some() {
                    documents.insert(doc_id, document_graph_id(&document));
                }
            }
        }
        report.documents_scanned = documents.len();

        let mut vertex_ids: Vec<&VertexId> = vertex_docs.keys().collect();
        vertex_ids.sort();
        for vertex_id in vertex_ids {
            let (kind, doc_id) = &vertex_docs[vertex_id];
            match doc_id.as_ref().and_then(|id| documents.get(id).map(|graph_id| (id, graph_id))) {
                None => report.findings.push(AuditFinding::MissingDocument {
                    vertex_id: *vertex_id,
                    kind: *kind,
                    doc_id: doc_id.clone(),
                }),
                Some((doc_id, graph_id)) if *graph_id != Some(*vertex_id) && graph_id.is_some() => {
                    report.findings.push(AuditFinding::MismatchedReference {
                        vertex_id: *vertex_id,
                        doc_id: doc_id.clone(),
                        graph_id: *graph_id,
                    });
                }
                Some(_) => {}
            }
        }

        let mut doc_ids: Vec<&DocId> = documents.keys().collect();
        doc_ids.sort();
        for doc_id in doc_ids {
            match documents[doc_id] {
                None => report.findings.push(AuditFinding::UnlinkedDocument {
                    doc_id: doc_id.clone(),
                }),
                Some(graph_id) if !vertex_docs.contains_key(&graph_id) => {
                    report.findings.push(AuditFinding::OrphanDocument {
                        doc_id: doc_id.clone(),
                        graph_id,
                    })
                }
                Some(_) => {}
            }
        }

        for finding in &report.findings {
            error!(integrity = true, ?finding, "Cross-store inconsistency");
        }
        info!(
            vertices = report.vertices_scanned,
            documents = report.documents_scanned,
            findings = report.findings.len(),
            "Consistency audit finished"
        );
        Ok(report)
    }
}
