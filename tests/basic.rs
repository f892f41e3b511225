use tao_content::{
    core::{MediaUpload, NewComment, NewPost, NewProfile},
    infrastructure::{BlobStore, GraphStore, JwtIdentityVerifier, SearchIndex, ViewerContext},
    orchestration::DeleteStatus,
    AppState, Config,
};
use tempfile::TempDir;

async fn sqlite_state(dir: &TempDir) -> (AppState, JwtIdentityVerifier) {
    let mut config = Config::default();
    config.graph.url = format!("sqlite://{}", dir.path().join("graph.db").display());
    config.blobs.root = dir.path().join("blobs").display().to_string();
    let tokens = JwtIdentityVerifier::from_config(&config.identity);
    (AppState::new(config).await.unwrap(), tokens)
}

#[tokio::test]
async fn test_thread_lifecycle_on_bundled_backends() {
    let dir = TempDir::new().unwrap();
    let (state, tokens) = sqlite_state(&dir).await;

    let mut viewers = Vec::new();
    for username in ["ada", "alan"] {
        let created = state
            .writes
            .create_profile(NewProfile {
                username: username.to_string(),
                display_name: username.to_string(),
                bio: None,
                avatar: None,
            })
            .await
            .unwrap();
        viewers.push(ViewerContext::new(
            created.entity_id,
            tokens.issue_token(created.entity_id).unwrap(),
        ));
    }
    let (ada, alan) = (&viewers[0], &viewers[1]);

    let post = state
        .writes
        .create_post(
            ada,
            NewPost {
                body: "Notes".to_string(),
                media: vec![MediaUpload::new("fig.txt", "text/plain", b"figure".to_vec())],
            },
        )
        .await
        .unwrap();
    assert!(state.stores.blobs.exists(&post.media_urls[0]).await.unwrap());

    let c1 = state
        .writes
        .add_comment(
            alan,
            NewComment {
                parent_id: post.entity_id,
                body: "C1".to_string(),
            },
        )
        .await
        .unwrap();
    let c2 = state
        .writes
        .add_comment(
            ada,
            NewComment {
                parent_id: c1.entity_id,
                body: "C2".to_string(),
            },
        )
        .await
        .unwrap();

    state.relationships.like(alan, post.entity_id).await.unwrap();
    let record = state.reader.get_post(post.entity_id).await.unwrap();
    assert_eq!(record.comment_count, 2);
    assert_eq!(record.like_count, 1);

    let status = state.deletes.delete_post(ada, post.entity_id).await.unwrap();
    assert!(matches!(status, DeleteStatus::Deleted { ref entity_ids } if entity_ids.len() == 3));
    for created in [&post, &c1, &c2] {
        assert!(state.stores.graph.get_vertex(created.entity_id).await.unwrap().is_none());
        assert!(state.stores.search.get(&created.doc_id).await.unwrap().is_none());
    }
    assert_eq!(
        state.deletes.delete_post(ada, post.entity_id).await.unwrap(),
        DeleteStatus::NotFound
    );

    let report = state.auditor.audit().await.unwrap();
    assert!(report.is_clean(), "{:?}", report.findings);
    assert_eq!(report.vertices_scanned, 2);
}
