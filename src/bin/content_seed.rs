use std::path::Path;
use tao_content::{
    core::{MediaUpload, NewComment, NewPost, NewProfile, ProfileUpdate},
    infrastructure::{JwtIdentityVerifier, ViewerContext},
    orchestration::DeleteStatus,
    AppState, Config,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// SQLite will not create missing directories for its database file.
fn ensure_database_dir(url: &str) -> std::io::Result<()> {
    let path = url
        .trim_start_matches("sqlite:")
        .trim_start_matches("//")
        .split('?')
        .next()
        .unwrap_or_default();
    match Path::new(path).parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;
    ensure_database_dir(&config.graph.url)?;
    let tokens = JwtIdentityVerifier::from_config(&config.identity);
    let state = AppState::new(config).await?;

    info!("Seeding sample content");

    let mut viewers = Vec::new();
    for (username, display_name) in [("ada", "Ada Lovelace"), ("alan", "Alan Turing"), ("grace", "Grace Hopper")] {
        let created = state
            .writes
            .create_profile(NewProfile {
                username: username.to_string(),
                display_name: display_name.to_string(),
                bio: None,
                avatar: None,
            })
            .await?;
        let token = tokens.issue_token(created.entity_id)?;
        viewers.push(ViewerContext::new(created.entity_id, token));
    }
    let (ada, alan, grace) = (&viewers[0], &viewers[1], &viewers[2]);

    state.relationships.follow(alan, ada.user_id).await?;
    state.relationships.follow(grace, ada.user_id).await?;
    state
        .writes
        .update_profile(
            ada,
            ada.user_id,
            ProfileUpdate {
                bio: Some("First programmer".to_string()),
                ..Default::default()
            },
        )
        .await?;

    let notes = state
        .writes
        .create_post(
            ada,
            NewPost {
                body: "Notes on the Analytical Engine".to_string(),
                media: vec![MediaUpload::new(
                    "diagram.txt",
                    "text/plain",
                    b"Bernoulli numbers, step by step".to_vec(),
                )],
            },
        )
        .await?;
    let draft = state
        .writes
        .create_post(
            ada,
            NewPost {
                body: "A draft that will be withdrawn".to_string(),
                media: Vec::new(),
            },
        )
        .await?;

    let question = state
        .writes
        .add_comment(
            alan,
            NewComment {
                parent_id: notes.entity_id,
                body: "Can it think?".to_string(),
            },
        )
        .await?;
    state
        .writes
        .add_comment(
            grace,
            NewComment {
                parent_id: question.entity_id,
                body: "It can certainly compile.".to_string(),
            },
        )
        .await?;
    state
        .writes
        .add_comment(
            alan,
            NewComment {
                parent_id: draft.entity_id,
                body: "Interesting draft".to_string(),
            },
        )
        .await?;
    state.relationships.like(grace, notes.entity_id).await?;

    let post = state.reader.get_post(notes.entity_id).await?;
    info!(
        post_id = post.id,
        comments = post.comment_count,
        likes = post.like_count,
        "Seeded post"
    );
    let profile = state.reader.get_profile(ada.user_id).await?;
    info!(username = %profile.username, followers = profile.follower_count, "Seeded profile");

    match state.deletes.delete_post(ada, draft.entity_id).await? {
        DeleteStatus::Deleted { entity_ids } => {
            info!(removed = entity_ids.len(), "Withdrew draft with its thread")
        }
        DeleteStatus::NotFound => info!("Draft was already gone"),
    }

    let report = state.auditor.audit().await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
