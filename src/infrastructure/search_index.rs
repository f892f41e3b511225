// In-memory document index holding denormalized JSON documents

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::core::models::DocId;
use crate::error::{AppError, AppResult, StoreKind};
use crate::infrastructure::fail_points::FailPoints;
use crate::infrastructure::traits::{IndexResult, IndexWrite, SearchIndex};

#[derive(Debug, Default)]
pub struct InMemorySearchIndex {
    documents: RwLock<HashMap<DocId, Value>>,
    fail_points: FailPoints,
}

fn require_object(document: &Value) -> AppResult<()> {
    if document.is_object() {
        Ok(())
    } else {
        Err(AppError::dependency(
            StoreKind::Search,
            "documents must be JSON objects",
        ))
    }
}

impl InMemorySearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fail_points(fail_points: FailPoints) -> Self {
        Self {
            documents: RwLock::new(HashMap::new()),
            fail_points,
        }
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }
}

#[async_trait]
impl SearchIndex for InMemorySearchIndex {
    async fn insert(&self, document: Value) -> AppResult<IndexWrite> {
        self.fail_points.check("search.insert", StoreKind::Search)?;
        require_object(&document)?;

        let doc_id = Uuid::new_v4().to_string();
        self.documents
            .write()
            .await
            .insert(doc_id.clone(), document);
        debug!("Indexed document {}", doc_id);
        Ok(IndexWrite {
            doc_id,
            result: IndexResult::Created,
        })
    }

    async fn update(&self, doc_id: &str, patch: Value) -> AppResult<IndexResult> {
        self.fail_points.check("search.update", StoreKind::Search)?;
        let fields = match patch {
            Value::Object(fields) => fields,
            _ => {
                return Err(AppError::dependency(
                    StoreKind::Search,
                    "patches must be JSON objects",
                ))
            }
        };

        let mut documents = self.documents.write().await;
        match documents.get_mut(doc_id).and_then(Value::as_object_mut) {
            Some(document) => {
                for (key, value) in fields {
                    document.insert(key, value);
                }
                Ok(IndexResult::Updated)
            }
            None => Ok(IndexResult::NotFound),
        }
    }

    async fn delete(&self, doc_id: &str) -> AppResult<IndexResult> {
        self.fail_points.check("search.delete", StoreKind::Search)?;
        match self.documents.write().await.remove(doc_id) {
            Some(_) => Ok(IndexResult::Deleted),
            None => Ok(IndexResult::NotFound),
        }
    }

    async fn get(&self, doc_id: &str) -> AppResult<Option<Value>> {
        self.fail_points.check("search.get", StoreKind::Search)?;
        Ok(self.documents.read().await.get(doc_id).cloned())
    }

    async fn restore(&self, doc_id: &str, document: Value) -> AppResult<IndexResult> {
        self.fail_points.check("search.restore", StoreKind::Search)?;
        require_object(&document)?;
        match self
            .documents
            .write()
            .await
            .insert(doc_id.to_string(), document)
        {
            Some(_) => Ok(IndexResult::Updated),
            None => Ok(IndexResult::Created),
        }
    }

    async fn find(&self, field: &str, value: &Value) -> AppResult<Vec<(DocId, Value)>> {
        self.fail_points.check("search.find", StoreKind::Search)?;
        let documents = self.documents.read().await;
        let mut matches: Vec<(DocId, Value)> = documents
            .iter()
            .filter(|(_, document)| document.get(field) == Some(value))
            .map(|(doc_id, document)| (doc_id.clone(), document.clone()))
            .collect();
        matches.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(matches)
    }

    async fn list_ids(&self) -> AppResult<Vec<DocId>> {
        self.fail_points.check("search.get", StoreKind::Search)?;
        let mut ids: Vec<DocId> = self.documents.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}
