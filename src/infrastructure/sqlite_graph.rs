use async_trait::async_trait;
use sqlx::sqlite::{Sqlite, SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Transaction};
use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use crate::core::id_generator::VertexIdGenerator;
use crate::core::models::{Direction, EntityKind, Properties, Vertex, VertexId};
use crate::core::relations::Relation;
use crate::error::{AppError, AppResult, StoreKind};
use crate::infrastructure::traits::{GraphStore, GraphTransaction};

/// Ids bound per statement. Stays under SQLite's host-parameter limit,
/// which is 999 on builds older than 3.32.
const MAX_BOUND_IDS: usize = 900;

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn decode_vertex(row: &SqliteRow) -> AppResult<Vertex> {
    let label: String = row.try_get("label")?;
    let properties: String = row.try_get("properties")?;
    Ok(Vertex {
        id: row.try_get("id")?,
        label: label.parse()?,
        properties: serde_json::from_str(&properties)?,
    })
}

/// SQLite implementation of the graph store. Edges reference vertices through
/// foreign keys, so a vertex cannot be dropped while edges still touch it and
/// an edge cannot be written to a vertex another transaction removed.
pub struct SqliteGraphStore {
    pool: SqlitePool,
    ids: Arc<VertexIdGenerator>,
}

impl SqliteGraphStore {
    pub async fn connect(url: &str, max_connections: u32) -> AppResult<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| {
                AppError::ConfigurationError(format!("Invalid graph database url {}: {}", url, e))
            })?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await
            .map_err(|e| {
                AppError::dependency(
                    StoreKind::Graph,
                    format!("Failed to connect to graph database: {}", e),
                )
            })?;

        let store = Self::from_pool(pool);
        store.initialize().await?;
        info!("SQLite graph store ready at {}", url);
        Ok(store)
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            ids: Arc::new(VertexIdGenerator::new(0)),
        }
    }

    /// Create graph tables if they do not exist yet
    pub async fn initialize(&self) -> AppResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS graph_vertices (
                id INTEGER PRIMARY KEY,
                label TEXT NOT NULL,
                properties TEXT NOT NULL,
                time_created INTEGER NOT NULL,
                time_updated INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::dependency(StoreKind::Graph, format!("Failed to create vertices table: {}", e))
        })?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS graph_edges (
                out_id INTEGER NOT NULL REFERENCES graph_vertices(id),
                relation TEXT NOT NULL,
                in_id INTEGER NOT NULL REFERENCES graph_vertices(id),
                time_created INTEGER NOT NULL,
                PRIMARY KEY (out_id, relation, in_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::dependency(StoreKind::Graph, format!("Failed to create edges table: {}", e))
        })?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_graph_edges_in ON graph_edges(in_id, relation)")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                AppError::dependency(StoreKind::Graph, format!("Failed to create edge index: {}", e))
            })?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_graph_vertices_label ON graph_vertices(label)")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                AppError::dependency(StoreKind::Graph, format!("Failed to create label index: {}", e))
            })?;

        Ok(())
    }

    async fn adjacent(&self, sql: &str, start: VertexId, relation: Relation) -> AppResult<Vec<VertexId>> {
        let rows = sqlx::query(sql)
            .bind(start)
            .bind(relation.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| row.try_get::<i64, _>(0).map_err(AppError::from))
            .collect()
    }
}

#[async_trait]
impl GraphStore for SqliteGraphStore {
    async fn begin_transaction(&self) -> AppResult<Box<dyn GraphTransaction>> {
        let tx = self.pool.begin().await.map_err(|e| {
            AppError::dependency(StoreKind::Graph, format!("Failed to begin transaction: {}", e))
        })?;
        Ok(Box::new(SqliteGraphTransaction {
            tx: Mutex::new(Some(tx)),
            ids: Arc::clone(&self.ids),
        }))
    }

    async fn get_vertex(&self, id: VertexId) -> AppResult<Option<Vertex>> {
        let row = sqlx::query("SELECT id, label, properties FROM graph_vertices WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(decode_vertex).transpose()
    }

    #[instrument(skip(self))]
    async fn traverse(
        &self,
        start: VertexId,
        relation: Relation,
        direction: Direction,
    ) -> AppResult<BTreeSet<VertexId>> {
        const OUTBOUND: &str = "SELECT in_id FROM graph_edges WHERE out_id = ? AND relation = ?";
        const INBOUND: &str = "SELECT out_id FROM graph_edges WHERE in_id = ? AND relation = ?";

        let mut result = BTreeSet::new();
        if matches!(direction, Direction::Outbound | Direction::Both) {
            result.extend(self.adjacent(OUTBOUND, start, relation).await?);
        }
        if matches!(direction, Direction::Inbound | Direction::Both) {
            result.extend(self.adjacent(INBOUND, start, relation).await?);
        }
        Ok(result)
    }

    async fn list_vertices(&self, label: EntityKind) -> AppResult<Vec<Vertex>> {
        let rows = sqlx::query(
            "SELECT id, label, properties FROM graph_vertices WHERE label = ? ORDER BY id",
        )
        .bind(label.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(decode_vertex).collect()
    }
}

pub struct SqliteGraphTransaction {
    /// `None` once committed or rolled back.
    tx: Mutex<Option<Transaction<'static, Sqlite>>>,
    ids: Arc<VertexIdGenerator>,
}

fn finished() -> AppError {
    AppError::dependency(StoreKind::Graph, "transaction already finished")
}

#[async_trait]
impl GraphTransaction for SqliteGraphTransaction {
    async fn add_vertex(&self, label: EntityKind, properties: Properties) -> AppResult<VertexId> {
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(finished)?;

        let id = self.ids.next_id();
        let now = now_millis();
        sqlx::query(
            "INSERT INTO graph_vertices (id, label, properties, time_created, time_updated) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(label.as_str())
        .bind(serde_json::to_string(&properties)?)
        .bind(now)
        .bind(now)
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            AppError::dependency(StoreKind::Graph, format!("Failed to add {} vertex: {}", label, e))
        })?;
        Ok(id)
    }

    async fn set_properties(&self, id: VertexId, properties: Properties) -> AppResult<()> {
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(finished)?;

        let row = sqlx::query("SELECT properties FROM graph_vertices WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?
            .ok_or_else(|| {
                AppError::dependency(StoreKind::Graph, format!("vertex {} does not exist", id))
            })?;
        let current: String = row.try_get("properties")?;
        let mut merged: Properties = serde_json::from_str(&current)?;
        merged.extend(properties);

        sqlx::query("UPDATE graph_vertices SET properties = ?, time_updated = ? WHERE id = ?")
            .bind(serde_json::to_string(&merged)?)
            .bind(now_millis())
            .bind(id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn add_edge_pair(&self, from: VertexId, to: VertexId, relation: Relation) -> AppResult<()> {
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(finished)?;

        let existing: i64 =
            sqlx::query("SELECT COUNT(*) FROM graph_vertices WHERE id IN (?, ?)")
                .bind(from)
                .bind(to)
                .fetch_one(&mut **tx)
                .await?
                .try_get(0)?;
        let expected = if from == to { 1 } else { 2 };
        if existing != expected {
            return Err(AppError::dependency(
                StoreKind::Graph,
                format!("cannot link {} -{}-> {}: endpoint missing", from, relation, to),
            ));
        }

        let now = now_millis();
        for (out_id, edge_relation, in_id) in [
            (from, relation, to),
            (to, relation.inverse(), from),
        ] {
            sqlx::query(
                "INSERT OR IGNORE INTO graph_edges (out_id, relation, in_id, time_created) VALUES (?, ?, ?, ?)",
            )
            .bind(out_id)
            .bind(edge_relation.as_str())
            .bind(in_id)
            .bind(now)
            .execute(&mut **tx)
            .await
            .map_err(|e| {
                AppError::dependency(StoreKind::Graph, format!("Failed to add edge: {}", e))
            })?;
        }
        Ok(())
    }

    async fn drop_edge_pair(
        &self,
        from: VertexId,
        to: VertexId,
        relation: Relation,
    ) -> AppResult<()> {
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(finished)?;

        for (out_id, edge_relation, in_id) in [
            (from, relation, to),
            (to, relation.inverse(), from),
        ] {
            sqlx::query("DELETE FROM graph_edges WHERE out_id = ? AND relation = ? AND in_id = ?")
                .bind(out_id)
                .bind(edge_relation.as_str())
                .bind(in_id)
                .execute(&mut **tx)
                .await?;
        }
        Ok(())
    }

    async fn drop_edges(&self, ids: &[VertexId]) -> AppResult<()> {
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(finished)?;

        // Each id is bound twice, once per endpoint column.
        let mut dropped = 0;
        for chunk in ids.chunks(MAX_BOUND_IDS / 2) {
            let mut qb = QueryBuilder::<Sqlite>::new("DELETE FROM graph_edges WHERE out_id IN (");
            let mut separated = qb.separated(",");
            for id in chunk {
                separated.push_bind(*id);
            }
            qb.push(") OR in_id IN (");
            let mut separated = qb.separated(",");
            for id in chunk {
                separated.push_bind(*id);
            }
            qb.push(")");

            let result = qb.build().execute(&mut **tx).await.map_err(|e| {
                AppError::dependency(StoreKind::Graph, format!("Failed to drop edges: {}", e))
            })?;
            dropped += result.rows_affected();
        }
        debug!("Dropped {} edges touching {} vertices", dropped, ids.len());
        Ok(())
    }

    async fn drop_vertices(&self, ids: &[VertexId]) -> AppResult<()> {
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(finished)?;

        for chunk in ids.chunks(MAX_BOUND_IDS) {
            let mut qb = QueryBuilder::<Sqlite>::new("DELETE FROM graph_vertices WHERE id IN (");
            let mut separated = qb.separated(",");
            for id in chunk {
                separated.push_bind(*id);
            }
            qb.push(")");

            qb.build().execute(&mut **tx).await.map_err(|e| {
                AppError::dependency(StoreKind::Graph, format!("Failed to drop vertices: {}", e))
            })?;
        }
        Ok(())
    }

    async fn commit(&self) -> AppResult<()> {
        let tx = self.tx.lock().await.take().ok_or_else(finished)?;
        tx.commit().await.map_err(|e| {
            AppError::dependency(StoreKind::Graph, format!("Failed to commit transaction: {}", e))
        })
    }

    async fn rollback(&self) -> AppResult<()> {
        let tx = self.tx.lock().await.take().ok_or_else(finished)?;
        tx.rollback().await.map_err(|e| {
            AppError::dependency(StoreKind::Graph, format!("Failed to rollback transaction: {}", e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn store(dir: &tempfile::TempDir) -> SqliteGraphStore {
        let url = format!("sqlite://{}", dir.path().join("graph.db").display());
        SqliteGraphStore::connect(&url, 2).await.unwrap()
    }

    fn props(doc_id: &str) -> Properties {
        let mut properties = Properties::new();
        properties.insert("doc_id".to_string(), json!(doc_id));
        properties
    }

    #[tokio::test]
    async fn test_vertex_and_edge_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let graph = store(&dir).await;

        let tx = graph.begin_transaction().await.unwrap();
        let user = tx.add_vertex(EntityKind::User, props("u")).await.unwrap();
        let post = tx.add_vertex(EntityKind::Post, props("p")).await.unwrap();
        tx.add_edge_pair(user, post, Relation::Authored).await.unwrap();
        tx.commit().await.unwrap();

        let vertex = graph.get_vertex(post).await.unwrap().unwrap();
        assert_eq!(vertex.label, EntityKind::Post);
        assert_eq!(vertex.doc_id(), Some("p"));

        let owners = graph
            .traverse(post, Relation::AuthoredBy, Direction::Outbound)
            .await
            .unwrap();
        assert_eq!(owners.into_iter().collect::<Vec<_>>(), vec![user]);
        assert_eq!(
            graph
                .get_property(post, "doc_id")
                .await
                .unwrap(),
            Some(json!("p"))
        );
    }

    #[tokio::test]
    async fn test_rollback_leaves_no_rows() {
        let dir = tempfile::tempdir().unwrap();
        let graph = store(&dir).await;

        let tx = graph.begin_transaction().await.unwrap();
        let user = tx.add_vertex(EntityKind::User, props("u")).await.unwrap();
        tx.rollback().await.unwrap();

        assert!(graph.get_vertex(user).await.unwrap().is_none());
        assert!(graph.list_vertices(EntityKind::User).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_edge_to_missing_vertex_fails() {
        let dir = tempfile::tempdir().unwrap();
        let graph = store(&dir).await;

        let tx = graph.begin_transaction().await.unwrap();
        let user = tx.add_vertex(EntityKind::User, props("u")).await.unwrap();
        let result = tx.add_edge_pair(user, 12345, Relation::Follows).await;
        assert!(matches!(result, Err(AppError::Dependency { .. })));
    }

    #[tokio::test]
    async fn test_drop_edges_then_vertices() {
        let dir = tempfile::tempdir().unwrap();
        let graph = store(&dir).await;

        let tx = graph.begin_transaction().await.unwrap();
        let user = tx.add_vertex(EntityKind::User, props("u")).await.unwrap();
        let post = tx.add_vertex(EntityKind::Post, props("p")).await.unwrap();
        tx.add_edge_pair(user, post, Relation::Authored).await.unwrap();
        tx.commit().await.unwrap();

        let tx = graph.begin_transaction().await.unwrap();
        tx.drop_edges(&[post]).await.unwrap();
        tx.drop_vertices(&[post]).await.unwrap();
        tx.commit().await.unwrap();

        assert!(graph.get_vertex(post).await.unwrap().is_none());
        assert!(graph
            .traverse(user, Relation::Authored, Direction::Outbound)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_set_properties_merges() {
        let dir = tempfile::tempdir().unwrap();
        let graph = store(&dir).await;

        let tx = graph.begin_transaction().await.unwrap();
        let user = tx.add_vertex(EntityKind::User, props("u")).await.unwrap();
        tx.commit().await.unwrap();

        let tx = graph.begin_transaction().await.unwrap();
        let mut update = Properties::new();
        update.insert("username".to_string(), json!("ada"));
        tx.set_properties(user, update).await.unwrap();
        tx.commit().await.unwrap();

        let vertex = graph.get_vertex(user).await.unwrap().unwrap();
        assert_eq!(vertex.username(), Some("ada"));
        assert_eq!(vertex.doc_id(), Some("u"));
    }

    #[tokio::test]
    async fn test_drop_large_thread_in_one_transaction() {
        let dir = tempfile::tempdir().unwrap();
        let graph = store(&dir).await;

        let tx = graph.begin_transaction().await.unwrap();
        let root = tx.add_vertex(EntityKind::Post, props("root")).await.unwrap();
        let mut ids = vec![root];
        for i in 0..17_000 {
            let comment = tx
                .add_vertex(EntityKind::Comment, props(&format!("c{}", i)))
                .await
                .unwrap();
            tx.add_edge_pair(root, comment, Relation::HasComment)
                .await
                .unwrap();
            ids.push(comment);
        }
        tx.commit().await.unwrap();

        let tx = graph.begin_transaction().await.unwrap();
        tx.drop_edges(&ids).await.unwrap();
        tx.drop_vertices(&ids).await.unwrap();
        tx.commit().await.unwrap();

        assert!(graph.get_vertex(root).await.unwrap().is_none());
        assert!(graph.list_vertices(EntityKind::Comment).await.unwrap().is_empty());
        assert!(graph.list_vertices(EntityKind::Post).await.unwrap().is_empty());
    }
}
