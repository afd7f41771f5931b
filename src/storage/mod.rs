//! # Storage Collaborators
//!
//! The embedded storage engine is an external collaborator. The runtime only
//! talks to it through the [`StorageEngine`] trait: transactional key-value
//! access plus a query-execute primitive.
//!
//! [`MemoryStorage`] is an ordered in-memory key-value engine. It has no SQL
//! engine attached, so `exec` fails with a configuration error.

use crate::framework::{Result, RpcError};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Rows and metadata returned by a query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub rows: Vec<Value>,
    pub rows_read: u64,
    pub rows_written: u64,
}

/// Range and paging options for [`StorageEngine::list`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListOptions {
    pub prefix: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub limit: Option<usize>,
    pub reverse: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub notnull: bool,
    pub pk: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub name: String,
    pub columns: Vec<ColumnDescriptor>,
    pub indexes: Vec<IndexDescriptor>,
}

/// Storage Schema Descriptor: tables, columns and indexes of the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageSchema {
    pub tables: Vec<TableDescriptor>,
}

/// The durable storage engine backing one actor.
#[async_trait]
pub trait StorageEngine: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    async fn get_many(&self, keys: &[String]) -> Result<BTreeMap<String, Value>> {
        let mut found = BTreeMap::new();
        for key in keys {
            if let Some(value) = self.get(key).await? {
                found.insert(key.clone(), value);
            }
        }
        Ok(found)
    }

    async fn put(&self, key: &str, value: Value) -> Result<()>;

    async fn put_many(&self, entries: BTreeMap<String, Value>) -> Result<()> {
        for (key, value) in entries {
            self.put(&key, value).await?;
        }
        Ok(())
    }

    /// Returns `true` when the key existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Returns the number of keys that existed.
    async fn delete_many(&self, keys: &[String]) -> Result<usize> {
        let mut deleted = 0;
        for key in keys {
            if self.delete(key).await? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn list(&self, options: &ListOptions) -> Result<Vec<(String, Value)>>;

    /// Executes a query with positional parameters.
    async fn exec(&self, query: &str, params: &[Value]) -> Result<QueryResult>;

    async fn schema(&self) -> Result<StorageSchema>;
}

/// Ordered in-memory key-value engine.
#[derive(Default)]
pub struct MemoryStorage {
    entries: RwLock<BTreeMap<String, Value>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl StorageEngine for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn put(&self, key: &str, value: Value) -> Result<()> {
        self.entries.write().insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.entries.write().remove(key).is_some())
    }

    async fn list(&self, options: &ListOptions) -> Result<Vec<(String, Value)>> {
        let entries = self.entries.read();
        let mut out: Vec<(String, Value)> = entries
            .iter()
            .filter(|(k, _)| options.prefix.as_deref().is_none_or(|p| k.starts_with(p)))
            .filter(|(k, _)| options.start.as_deref().is_none_or(|s| k.as_str() >= s))
            .filter(|(k, _)| options.end.as_deref().is_none_or(|e| k.as_str() < e))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if options.reverse {
            out.reverse();
        }
        if let Some(limit) = options.limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    async fn exec(&self, _query: &str, _params: &[Value]) -> Result<QueryResult> {
        Err(RpcError::Configuration(
            "no SQL engine is attached to in-memory storage".into(),
        ))
    }

    async fn schema(&self) -> Result<StorageSchema> {
        Ok(StorageSchema::default())
    }
}

/// Host state handle passed to every plugin at initialization.
///
/// Owns the storage engine and the one-shot schema marker for document
/// collections, so that schema setup runs once per store regardless of how
/// many collection handles are built over it.
#[derive(Clone)]
pub struct ActorState {
    id: String,
    storage: Arc<dyn StorageEngine>,
    collections_schema: Arc<OnceCell<()>>,
}

impl ActorState {
    pub fn new(id: impl Into<String>, storage: Arc<dyn StorageEngine>) -> Self {
        Self {
            id: id.into(),
            storage,
            collections_schema: Arc::new(OnceCell::new()),
        }
    }

    /// A fresh actor over [`MemoryStorage`].
    pub fn in_memory(id: impl Into<String>) -> Self {
        Self::new(id, Arc::new(MemoryStorage::new()))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn storage(&self) -> &Arc<dyn StorageEngine> {
        &self.storage
    }

    pub(crate) fn collections_schema(&self) -> &OnceCell<()> {
        &self.collections_schema
    }
}

impl std::fmt::Debug for ActorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorState").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn list_honors_prefix_limit_and_reverse() {
        let storage = MemoryStorage::new();
        for key in ["a:1", "a:2", "a:3", "b:1"] {
            storage.put(key, json!(key)).await.unwrap();
        }

        let options = ListOptions {
            prefix: Some("a:".into()),
            limit: Some(2),
            reverse: true,
            ..Default::default()
        };
        let keys: Vec<String> = storage
            .list(&options)
            .await
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec!["a:3", "a:2"]);
    }

    #[tokio::test]
    async fn delete_many_counts_existing_keys() {
        let storage = MemoryStorage::new();
        storage.put("x", json!(1)).await.unwrap();
        let deleted = storage
            .delete_many(&["x".to_string(), "y".to_string()])
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn exec_without_sql_engine_is_a_configuration_error() {
        let storage = MemoryStorage::new();
        let err = storage.exec("SELECT 1", &[]).await.unwrap_err();
        assert_eq!(err.code(), "CONFIGURATION_ERROR");
    }
}
