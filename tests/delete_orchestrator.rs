mod common;

use async_trait::async_trait;
use common::{media, Harness};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use tao_content::{
    core::{records::post_key, Direction, EntityKind, NewPost, Properties, Relation, Vertex},
    error::AppResult,
    infrastructure::{
        BlobStore, CacheStore, GraphStore, GraphTransaction, InMemoryGraphStore, SearchIndex,
    },
    orchestration::DeleteStatus,
    AppError,
};

/// Commits one extra reply under the armed root the next time a
/// transaction is opened, as a concurrent writer would.
struct GrowingGraph {
    inner: Arc<InMemoryGraphStore>,
    armed: Mutex<Option<i64>>,
    late_reply: Mutex<Option<i64>>,
}

#[async_trait]
impl GraphStore for GrowingGraph {
    async fn begin_transaction(&self) -> AppResult<Box<dyn GraphTransaction>> {
        let root = self.armed.lock().unwrap().take();
        if let Some(root) = root {
            let tx = self.inner.begin_transaction().await?;
            let reply = tx.add_vertex(EntityKind::Comment, Properties::new()).await?;
            tx.add_edge_pair(root, reply, Relation::HasComment).await?;
            tx.commit().await?;
            *self.late_reply.lock().unwrap() = Some(reply);
        }
        self.inner.begin_transaction().await
    }

    async fn get_vertex(&self, id: i64) -> AppResult<Option<Vertex>> {
        self.inner.get_vertex(id).await
    }

    async fn traverse(
        &self,
        start: i64,
        relation: Relation,
        direction: Direction,
    ) -> AppResult<BTreeSet<i64>> {
        self.inner.traverse(start, relation, direction).await
    }

    async fn list_vertices(&self, label: EntityKind) -> AppResult<Vec<Vertex>> {
        self.inner.list_vertices(label).await
    }
}

#[tokio::test]
async fn test_delete_post_cascades_through_thread() {
    let h = Harness::new();
    let ada = h.register("ada").await;
    let alan = h.register("alan").await;

    let p = h.post(&ada, "P").await;
    let c1 = h.comment(&alan, p.entity_id, "C1").await;
    let c2 = h.comment(&ada, c1.entity_id, "C2").await;
    h.state.reader.get_post(p.entity_id).await.unwrap();

    let status = h.state.deletes.delete_post(&ada, p.entity_id).await.unwrap();
    let DeleteStatus::Deleted { entity_ids } = status else {
        panic!("expected a delete, got {:?}", status);
    };
    let mut removed = entity_ids.clone();
    removed.sort();
    let mut expected = vec![p.entity_id, c1.entity_id, c2.entity_id];
    expected.sort();
    assert_eq!(removed, expected);
    assert_eq!(entity_ids[0], p.entity_id);

    for created in [&p, &c1, &c2] {
        assert!(h.graph.get_vertex(created.entity_id).await.unwrap().is_none());
        assert!(h.search.get(&created.doc_id).await.unwrap().is_none());
    }
    assert!(h
        .graph
        .traverse(p.entity_id, Relation::HasComment, Direction::Outbound)
        .await
        .unwrap()
        .is_empty());
    assert!(h
        .graph
        .traverse(ada.user_id, Relation::Authored, Direction::Outbound)
        .await
        .unwrap()
        .is_empty());
    assert!(h.cache.get(&post_key(p.entity_id)).await.unwrap().is_none());
    assert!(h.state.auditor.audit().await.unwrap().is_clean());
}

#[tokio::test]
async fn test_delete_is_idempotent() {
    let h = Harness::new();
    let ada = h.register("ada").await;
    let post = h.post(&ada, "short lived").await;

    assert!(matches!(
        h.state.deletes.delete_post(&ada, post.entity_id).await.unwrap(),
        DeleteStatus::Deleted { .. }
    ));
    assert_eq!(
        h.state.deletes.delete_post(&ada, post.entity_id).await.unwrap(),
        DeleteStatus::NotFound
    );
    assert_eq!(
        h.state.deletes.delete_entity(&ada, 777_777).await.unwrap(),
        DeleteStatus::NotFound
    );
}

#[tokio::test]
async fn test_non_owner_cannot_delete() {
    let h = Harness::new();
    let ada = h.register("ada").await;
    let alan = h.register("alan").await;
    let post = h.post(&ada, "mine").await;
    h.comment(&alan, post.entity_id, "nice").await;

    let before = h.footprint().await;
    let edges = h.graph.edge_count().await;

    let result = h.state.deletes.delete_post(&alan, post.entity_id).await;
    assert!(matches!(result, Err(AppError::Forbidden(_))));
    assert_eq!(h.footprint().await, before);
    assert_eq!(h.graph.edge_count().await, edges);
}

#[tokio::test]
async fn test_unowned_vertex_is_denied() {
    let h = Harness::new();
    let ada = h.register("ada").await;
    let post = h.post(&ada, "soon orphaned").await;

    // Strip the ownership edges behind the orchestrator's back.
    let tx = h.graph.begin_transaction().await.unwrap();
    tx.drop_edge_pair(ada.user_id, post.entity_id, Relation::Authored)
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let result = h.state.deletes.delete_post(&ada, post.entity_id).await;
    assert!(matches!(result, Err(AppError::Forbidden(_))));
    assert!(h.graph.get_vertex(post.entity_id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_index_failure_rolls_back_both_stores() {
    let h = Harness::new();
    let ada = h.register("ada").await;
    let p = h.post(&ada, "P").await;
    let c1 = h.comment(&ada, p.entity_id, "C1").await;
    let c2 = h.comment(&ada, c1.entity_id, "C2").await;

    let before = h.footprint().await;
    let edges = h.graph.edge_count().await;

    // The leaf reply goes first and succeeds; the next document delete fails.
    h.fail_points.fail_after("search.delete", 1);
    let result = h.state.deletes.delete_post(&ada, p.entity_id).await;
    h.fail_points.clear_all();

    assert!(matches!(result, Err(AppError::OperationFailed(_))));
    assert_eq!(h.footprint().await, before);
    assert_eq!(h.graph.edge_count().await, edges);
    for created in [&p, &c1, &c2] {
        assert!(h.graph.get_vertex(created.entity_id).await.unwrap().is_some());
        assert!(h.search.get(&created.doc_id).await.unwrap().is_some());
    }
    assert!(h.state.auditor.audit().await.unwrap().is_clean());
}

#[tokio::test]
async fn test_each_delete_step_failure_changes_nothing() {
    for fail_point in [
        "graph.begin",
        "graph.drop_edges",
        "graph.drop_vertices",
        "search.delete",
        "graph.commit",
    ] {
        let h = Harness::new();
        let ada = h.register("ada").await;
        let p = h.post(&ada, "P").await;
        h.comment(&ada, p.entity_id, "C1").await;
        let before = h.footprint().await;
        let edges = h.graph.edge_count().await;

        h.fail_points.fail(fail_point);
        let result = h.state.deletes.delete_post(&ada, p.entity_id).await;
        h.fail_points.clear_all();

        assert!(matches!(result, Err(AppError::OperationFailed(_))), "{}", fail_point);
        assert_eq!(h.footprint().await, before, "{}", fail_point);
        assert_eq!(h.graph.edge_count().await, edges, "{}", fail_point);
        assert!(h.state.auditor.audit().await.unwrap().is_clean(), "{}", fail_point);
    }
}

#[tokio::test]
async fn test_commit_failure_restores_deleted_documents() {
    let h = Harness::new();
    let ada = h.register("ada").await;
    let p = h.post(&ada, "P").await;
    let c1 = h.comment(&ada, p.entity_id, "C1").await;
    let original = h.search.get(&c1.doc_id).await.unwrap().unwrap();

    h.fail_points.fail("graph.commit");
    assert!(h.state.deletes.delete_post(&ada, p.entity_id).await.is_err());
    h.fail_points.clear_all();

    assert_eq!(h.search.get(&c1.doc_id).await.unwrap().unwrap(), original);
    assert!(h.graph.get_vertex(c1.entity_id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_delete_comment_keeps_post_and_siblings() {
    let h = Harness::new();
    let ada = h.register("ada").await;
    let alan = h.register("alan").await;
    let p = h.post(&ada, "P").await;
    let c1 = h.comment(&alan, p.entity_id, "C1").await;
    let reply = h.comment(&ada, c1.entity_id, "reply").await;
    let sibling = h.comment(&ada, p.entity_id, "C2").await;
    h.state.reader.get_post(p.entity_id).await.unwrap();

    // Only the comment author may delete it, not the post author.
    assert!(matches!(
        h.state.deletes.delete_comment(&ada, c1.entity_id).await,
        Err(AppError::Forbidden(_))
    ));

    let status = h.state.deletes.delete_comment(&alan, c1.entity_id).await.unwrap();
    assert_eq!(
        status,
        DeleteStatus::Deleted {
            entity_ids: vec![c1.entity_id, reply.entity_id]
        }
    );
    assert!(h.cache.get(&post_key(p.entity_id)).await.unwrap().is_none());

    let record = h.state.reader.get_post(p.entity_id).await.unwrap();
    assert_eq!(record.comment_count, 1);
    assert!(h.graph.get_vertex(sibling.entity_id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_kind_mismatch_and_profiles_are_rejected() {
    let h = Harness::new();
    let ada = h.register("ada").await;
    let p = h.post(&ada, "P").await;
    let c = h.comment(&ada, p.entity_id, "C").await;

    assert!(matches!(
        h.state.deletes.delete_post(&ada, c.entity_id).await,
        Err(AppError::Validation(_))
    ));
    assert!(matches!(
        h.state.deletes.delete_comment(&ada, p.entity_id).await,
        Err(AppError::Validation(_))
    ));
    assert!(matches!(
        h.state.deletes.delete_entity(&ada, ada.user_id).await,
        Err(AppError::Validation(_))
    ));
}

#[tokio::test]
async fn test_cyclic_thread_is_deleted_once() {
    let h = Harness::new();
    let ada = h.register("ada").await;
    let p = h.post(&ada, "P").await;
    let c1 = h.comment(&ada, p.entity_id, "C1").await;
    let c2 = h.comment(&ada, c1.entity_id, "C2").await;
    h.graph
        .insert_raw_edge(c2.entity_id, Relation::HasComment, c1.entity_id)
        .await;

    let status = h.state.deletes.delete_post(&ada, p.entity_id).await.unwrap();
    let DeleteStatus::Deleted { entity_ids } = status else {
        panic!("expected a delete");
    };
    assert_eq!(entity_ids.len(), 3);
    assert_eq!(h.graph.vertex_count().await, 1);
    assert_eq!(h.search.len().await, 1);
}

#[tokio::test]
async fn test_delete_leaves_media_blobs_in_place() {
    let h = Harness::new();
    let ada = h.register("ada").await;
    let created = h
        .state
        .writes
        .create_post(
            &ada,
            NewPost {
                body: "with photo".to_string(),
                media: vec![media("p.png")],
            },
        )
        .await
        .unwrap();

    h.state.deletes.delete_post(&ada, created.entity_id).await.unwrap();
    assert!(h.blobs.exists(&created.media_urls[0]).await.unwrap());
}

#[tokio::test]
async fn test_reply_added_during_delete_aborts_it() {
    let growing = Arc::new(Mutex::new(None::<Arc<GrowingGraph>>));
    let slot = growing.clone();
    let h = Harness::with_graph(move |inner| {
        let graph = Arc::new(GrowingGraph {
            inner,
            armed: Mutex::new(None),
            late_reply: Mutex::new(None),
        });
        *slot.lock().unwrap() = Some(graph.clone());
        graph as Arc<dyn GraphStore>
    });
    let graph = growing.lock().unwrap().clone().unwrap();

    let ada = h.register("ada").await;
    let p = h.post(&ada, "P").await;
    let c1 = h.comment(&ada, p.entity_id, "C1").await;

    *graph.armed.lock().unwrap() = Some(p.entity_id);
    let result = h.state.deletes.delete_post(&ada, p.entity_id).await;
    assert!(matches!(result, Err(AppError::OperationFailed(_))));

    let late = graph.late_reply.lock().unwrap().unwrap();
    for id in [p.entity_id, c1.entity_id, late] {
        assert!(h.graph.get_vertex(id).await.unwrap().is_some());
    }
    let replies = h
        .graph
        .traverse(p.entity_id, Relation::HasComment, Direction::Outbound)
        .await
        .unwrap();
    assert!(replies.contains(&c1.entity_id));
    assert!(replies.contains(&late));
    for created in [&p, &c1] {
        assert!(h.search.get(&created.doc_id).await.unwrap().is_some());
    }

    // With the thread settled the delete takes the late reply too.
    let status = h.state.deletes.delete_post(&ada, p.entity_id).await.unwrap();
    let DeleteStatus::Deleted { entity_ids } = status else {
        panic!("expected a delete");
    };
    assert!(entity_ids.contains(&late));
    assert!(h.graph.get_vertex(late).await.unwrap().is_none());
}
