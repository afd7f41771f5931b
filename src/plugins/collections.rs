//! # Collections Plugin
//!
//! Named JSON document collections kept in the key-value engine. Each
//! document lives under `__col:<collection>:<id>`. Queries run the filter
//! evaluator from [`super::filter`] over the stored documents.
//!
//! The backing store is prepared once per [`ActorState`], no matter how many
//! [`Collections`] handles are built over it.

use crate::framework::internal::{
    COLLECTION_CLEAR, COLLECTION_COUNT, COLLECTION_DELETE, COLLECTION_FIND, COLLECTION_GET,
    COLLECTION_HAS, COLLECTION_KEYS, COLLECTION_LIST, COLLECTION_NAMES, COLLECTION_PUT,
    COLLECTION_STATS,
};
use crate::framework::{
    arg, method_fn, opt_arg, ContextExtension, InitContext, MethodFn, Plugin, Result, RpcContext,
    RpcError,
};
use crate::plugins::filter;
use crate::storage::{ActorState, ListOptions};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::{debug, info};

pub const FIELD: &str = "collections";

const KEY_PREFIX: &str = "__col:";
const SCHEMA_KEY: &str = "__col_schema";
const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SortField {
    pub field: String,
    #[serde(default)]
    pub descending: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FindOptions {
    pub limit: Option<usize>,
    pub skip: Option<usize>,
    pub sort: Vec<SortField>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionStats {
    pub name: String,
    pub count: usize,
}

fn check_name(kind: &str, value: &str) -> Result<()> {
    if value.is_empty() || value.contains(':') {
        return Err(RpcError::Validation(format!(
            "{kind} '{value}' must be non-empty and must not contain ':'"
        )));
    }
    Ok(())
}

/// Entry point to every collection of one actor.
#[derive(Debug, Clone)]
pub struct Collections {
    state: ActorState,
}

impl Collections {
    pub fn new(state: ActorState) -> Self {
        Self { state }
    }

    /// Writes the schema marker on first use of this store.
    async fn ensure_schema(&self) -> Result<()> {
        let storage = self.state.storage().clone();
        self.state
            .collections_schema()
            .get_or_try_init(|| async move {
                storage
                    .put(SCHEMA_KEY, json!({ "version": SCHEMA_VERSION }))
                    .await?;
                info!(version = SCHEMA_VERSION, "Collections schema initialized");
                Ok::<(), RpcError>(())
            })
            .await?;
        Ok(())
    }

    pub async fn collection(&self, name: &str) -> Result<Collection> {
        check_name("collection", name)?;
        self.ensure_schema().await?;
        Ok(Collection {
            name: name.to_string(),
            state: self.state.clone(),
        })
    }

    /// Names of every collection holding at least one document.
    pub async fn names(&self) -> Result<Vec<String>> {
        Ok(self.stats().await?.into_iter().map(|s| s.name).collect())
    }

    pub async fn stats(&self) -> Result<Vec<CollectionStats>> {
        self.ensure_schema().await?;
        let options = ListOptions {
            prefix: Some(KEY_PREFIX.to_string()),
            ..Default::default()
        };
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for (key, _) in self.state.storage().list(&options).await? {
            if let Some((name, _)) = key[KEY_PREFIX.len()..].split_once(':') {
                *counts.entry(name.to_string()).or_default() += 1;
            }
        }
        Ok(counts
            .into_iter()
            .map(|(name, count)| CollectionStats { name, count })
            .collect())
    }
}

/// One named collection.
#[derive(Debug, Clone)]
pub struct Collection {
    name: String,
    state: ActorState,
}

impl Collection {
    pub fn name(&self) -> &str {
        &self.name
    }

    fn prefix(&self) -> String {
        format!("{KEY_PREFIX}{}:", self.name)
    }

    fn key(&self, id: &str) -> Result<String> {
        check_name("document id", id)?;
        Ok(format!("{}{id}", self.prefix()))
    }

    async fn entries(&self) -> Result<Vec<(String, Value)>> {
        let options = ListOptions {
            prefix: Some(self.prefix()),
            ..Default::default()
        };
        let prefix_len = self.prefix().len();
        Ok(self
            .state
            .storage()
            .list(&options)
            .await?
            .into_iter()
            .map(|(key, doc)| (key[prefix_len..].to_string(), doc))
            .collect())
    }

    pub async fn get(&self, id: &str) -> Result<Option<Value>> {
        self.state.storage().get(&self.key(id)?).await
    }

    pub async fn put(&self, id: &str, doc: Value) -> Result<()> {
        debug!(collection = %self.name, id, "Document stored");
        self.state.storage().put(&self.key(id)?, doc).await
    }

    pub async fn delete(&self, id: &str) -> Result<bool> {
        self.state.storage().delete(&self.key(id)?).await
    }

    pub async fn has(&self, id: &str) -> Result<bool> {
        Ok(self.get(id).await?.is_some())
    }

    /// Documents matching `filter`, sorted, skipped and limited per `options`.
    pub async fn find(&self, filter: &Value, options: &FindOptions) -> Result<Vec<Value>> {
        let mut docs = Vec::new();
        for (_, doc) in self.entries().await? {
            if filter::matches(&doc, filter)? {
                docs.push(doc);
            }
        }

        if !options.sort.is_empty() {
            docs.sort_by(|a, b| {
                options
                    .sort
                    .iter()
                    .map(|s| {
                        let ord = filter::sort_order(
                            filter::lookup(a, &s.field),
                            filter::lookup(b, &s.field),
                        );
                        if s.descending {
                            ord.reverse()
                        } else {
                            ord
                        }
                    })
                    .find(|ord| ord.is_ne())
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }

        Ok(docs
            .into_iter()
            .skip(options.skip.unwrap_or(0))
            .take(options.limit.unwrap_or(usize::MAX))
            .collect())
    }

    pub async fn count(&self, filter: &Value) -> Result<usize> {
        Ok(self.find(filter, &FindOptions::default()).await?.len())
    }

    /// All documents in id order, with skip/limit applied.
    pub async fn list(&self, options: &FindOptions) -> Result<Vec<Value>> {
        self.find(&Value::Null, options).await
    }

    pub async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.entries().await?.into_iter().map(|(id, _)| id).collect())
    }

    /// Removes every document, returning how many there were.
    pub async fn clear(&self) -> Result<usize> {
        let keys: Vec<String> = self
            .entries()
            .await?
            .into_iter()
            .map(|(id, _)| format!("{}{id}", self.prefix()))
            .collect();
        self.state.storage().delete_many(&keys).await
    }
}

async fn collection(ctx: &RpcContext, args: &[Value]) -> Result<Collection> {
    let name: String = arg(args, 0)?;
    ctx.require::<Collections>(FIELD)?
        .collection(&name)
        .await
}

#[derive(Debug, Default)]
pub struct CollectionsPlugin;

#[async_trait]
impl Plugin for CollectionsPlugin {
    fn name(&self) -> &str {
        "collections"
    }

    fn init(&self, ctx: &InitContext) -> Result<ContextExtension> {
        Ok(ContextExtension::new().with(FIELD, Collections::new(ctx.state.clone())))
    }

    fn internal_methods(&self) -> Vec<(&'static str, MethodFn)> {
        vec![
            (
                COLLECTION_GET,
                method_fn(|ctx, args| async move {
                    let id: String = arg(&args, 1)?;
                    let doc = collection(&ctx, &args).await?.get(&id).await?;
                    Ok(doc.unwrap_or(Value::Null))
                }),
            ),
            (
                COLLECTION_PUT,
                method_fn(|ctx, args| async move {
                    let id: String = arg(&args, 1)?;
                    let doc: Value = arg(&args, 2)?;
                    collection(&ctx, &args).await?.put(&id, doc).await?;
                    Ok(Value::Null)
                }),
            ),
            (
                COLLECTION_DELETE,
                method_fn(|ctx, args| async move {
                    let id: String = arg(&args, 1)?;
                    Ok(json!(collection(&ctx, &args).await?.delete(&id).await?))
                }),
            ),
            (
                COLLECTION_HAS,
                method_fn(|ctx, args| async move {
                    let id: String = arg(&args, 1)?;
                    Ok(json!(collection(&ctx, &args).await?.has(&id).await?))
                }),
            ),
            (
                COLLECTION_FIND,
                method_fn(|ctx, args| async move {
                    let filter: Value = opt_arg(&args, 1)?.unwrap_or(Value::Null);
                    let options: FindOptions = opt_arg(&args, 2)?.unwrap_or_default();
                    let docs = collection(&ctx, &args).await?.find(&filter, &options).await?;
                    Ok(Value::Array(docs))
                }),
            ),
            (
                COLLECTION_COUNT,
                method_fn(|ctx, args| async move {
                    let filter: Value = opt_arg(&args, 1)?.unwrap_or(Value::Null);
                    Ok(json!(collection(&ctx, &args).await?.count(&filter).await?))
                }),
            ),
            (
                COLLECTION_LIST,
                method_fn(|ctx, args| async move {
                    let options: FindOptions = opt_arg(&args, 1)?.unwrap_or_default();
                    Ok(Value::Array(collection(&ctx, &args).await?.list(&options).await?))
                }),
            ),
            (
                COLLECTION_KEYS,
                method_fn(|ctx, args| async move {
                    Ok(json!(collection(&ctx, &args).await?.keys().await?))
                }),
            ),
            (
                COLLECTION_CLEAR,
                method_fn(|ctx, args| async move {
                    Ok(json!(collection(&ctx, &args).await?.clear().await?))
                }),
            ),
            (
                COLLECTION_NAMES,
                method_fn(|ctx, _args| async move {
                    Ok(json!(ctx.require::<Collections>(FIELD)?.names().await?))
                }),
            ),
            (
                COLLECTION_STATS,
                method_fn(|ctx, _args| async move {
                    Ok(serde_json::to_value(
                        ctx.require::<Collections>(FIELD)?.stats().await?,
                    )?)
                }),
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framework::{compose, Environment};
    use crate::transport::Broadcaster;
    use std::sync::Arc;

    async fn users() -> Collection {
        let collections = Collections::new(ActorState::in_memory("docs"));
        let users = collections.collection("users").await.unwrap();
        for (id, name, age) in [("u1", "ada", 36), ("u2", "grace", 45), ("u3", "alan", 41)] {
            users
                .put(id, json!({"name": name, "age": age}))
                .await
                .unwrap();
        }
        users
    }

    #[tokio::test]
    async fn crud() {
        let users = users().await;
        assert!(users.has("u1").await.unwrap());
        assert_eq!(users.get("u2").await.unwrap().unwrap()["name"], "grace");
        assert!(users.delete("u2").await.unwrap());
        assert!(!users.has("u2").await.unwrap());
        assert_eq!(users.keys().await.unwrap(), vec!["u1", "u3"]);
    }

    #[tokio::test]
    async fn find_filters_sorts_and_pages() {
        let users = users().await;
        let options = FindOptions {
            sort: vec![SortField {
                field: "age".into(),
                descending: true,
            }],
            skip: Some(1),
            limit: Some(1),
        };
        let docs = users
            .find(&json!({"age": {"$gt": 30}}), &options)
            .await
            .unwrap();
        assert_eq!(docs, vec![json!({"name": "alan", "age": 41})]);
        assert_eq!(users.count(&json!({"name": {"$regex": "^a"}})).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn names_stats_and_clear() {
        let state = ActorState::in_memory("docs");
        let collections = Collections::new(state.clone());
        let a = collections.collection("a").await.unwrap();
        let b = collections.collection("b").await.unwrap();
        a.put("1", json!({})).await.unwrap();
        a.put("2", json!({})).await.unwrap();
        b.put("1", json!({})).await.unwrap();

        assert_eq!(collections.names().await.unwrap(), vec!["a", "b"]);
        assert_eq!(
            collections.stats().await.unwrap(),
            vec![
                CollectionStats { name: "a".into(), count: 2 },
                CollectionStats { name: "b".into(), count: 1 },
            ]
        );
        assert_eq!(a.clear().await.unwrap(), 2);
        assert_eq!(collections.names().await.unwrap(), vec!["b"]);
    }

    #[tokio::test]
    async fn schema_is_initialized_once_per_store() {
        let state = ActorState::in_memory("docs");
        assert!(!state.collections_schema().initialized());
        Collections::new(state.clone()).collection("x").await.unwrap();
        state.storage().delete(SCHEMA_KEY).await.unwrap();

        Collections::new(state.clone()).collection("y").await.unwrap();
        assert!(state.collections_schema().initialized());
        assert_eq!(state.storage().get(SCHEMA_KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn invalid_names_are_rejected() {
        let collections = Collections::new(ActorState::in_memory("docs"));
        assert!(collections.collection("").await.is_err());
        assert!(collections.collection("a:b").await.is_err());
        let c = collections.collection("ok").await.unwrap();
        assert!(c.put("bad:id", json!({})).await.is_err());
    }

    #[tokio::test]
    async fn remote_primitives() {
        let composed = compose(
            vec![Arc::new(CollectionsPlugin)],
            InitContext {
                state: ActorState::in_memory("docs"),
                env: Environment::default(),
            },
            Broadcaster::default(),
            vec![],
            vec![],
        )
        .unwrap();
        let invoke = |name: &'static str, args: Vec<Value>| {
            let internal = composed.internal.clone();
            let ctx = composed.context.clone();
            async move { internal.invoke(name, ctx, args).await }
        };

        invoke(COLLECTION_PUT, vec![json!("tasks"), json!("t1"), json!({"done": true})])
            .await
            .unwrap();
        invoke(COLLECTION_PUT, vec![json!("tasks"), json!("t2"), json!({"done": false})])
            .await
            .unwrap();

        let found = invoke(COLLECTION_FIND, vec![json!("tasks"), json!({"done": false})])
            .await
            .unwrap();
        assert_eq!(found, json!([{"done": false}]));
        assert_eq!(
            invoke(COLLECTION_COUNT, vec![json!("tasks")]).await.unwrap(),
            json!(2)
        );
        assert_eq!(
            invoke(COLLECTION_STATS, vec![]).await.unwrap(),
            json!([{"name": "tasks", "count": 2}])
        );
        assert_eq!(
            invoke(COLLECTION_GET, vec![json!("tasks"), json!("zz")]).await.unwrap(),
            Value::Null
        );
        let err = invoke(COLLECTION_FIND, vec![json!("tasks"), json!({"$bad": 1})])
            .await
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }
}
