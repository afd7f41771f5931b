//! # Storage Plugin
//!
//! Key-value access to the actor's durable storage as the `storage` context
//! field, plus the remote `__storage_*` primitives.

use crate::framework::internal::{
    STORAGE_DELETE, STORAGE_DELETE_MULTIPLE, STORAGE_GET, STORAGE_GET_MULTIPLE, STORAGE_KEYS,
    STORAGE_LIST, STORAGE_PUT, STORAGE_PUT_MULTIPLE,
};
use crate::framework::{
    arg, method_fn, opt_arg, ContextExtension, InitContext, MethodFn, Plugin, Result, RpcContext,
};
use crate::storage::{ActorState, ListOptions};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;

pub const FIELD: &str = "storage";

/// Typed view over the key-value engine. Values are stored as JSON.
#[derive(Debug, Clone)]
pub struct StorageHandle {
    state: ActorState,
}

impl StorageHandle {
    pub fn new(state: ActorState) -> Self {
        Self { state }
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.state.storage().get(key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub async fn get_many(&self, keys: &[String]) -> Result<BTreeMap<String, Value>> {
        self.state.storage().get_many(keys).await
    }

    pub async fn put<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        self.state
            .storage()
            .put(key, serde_json::to_value(value)?)
            .await
    }

    pub async fn put_many(&self, entries: BTreeMap<String, Value>) -> Result<()> {
        self.state.storage().put_many(entries).await
    }

    pub async fn delete(&self, key: &str) -> Result<bool> {
        self.state.storage().delete(key).await
    }

    pub async fn delete_many(&self, keys: &[String]) -> Result<usize> {
        self.state.storage().delete_many(keys).await
    }

    pub async fn list(&self, options: &ListOptions) -> Result<Vec<(String, Value)>> {
        self.state.storage().list(options).await
    }

    pub async fn keys(&self, options: &ListOptions) -> Result<Vec<String>> {
        Ok(self
            .list(options)
            .await?
            .into_iter()
            .map(|(k, _)| k)
            .collect())
    }
}

fn handle(ctx: &RpcContext) -> Result<StorageHandle> {
    ctx.require::<StorageHandle>(FIELD).cloned()
}

fn list_options(args: &[Value]) -> Result<ListOptions> {
    Ok(opt_arg(args, 0)?.unwrap_or_default())
}

#[derive(Debug, Default)]
pub struct StoragePlugin;

#[async_trait]
impl Plugin for StoragePlugin {
    fn name(&self) -> &str {
        "storage"
    }

    fn init(&self, ctx: &InitContext) -> Result<ContextExtension> {
        Ok(ContextExtension::new().with(FIELD, StorageHandle::new(ctx.state.clone())))
    }

    fn internal_methods(&self) -> Vec<(&'static str, MethodFn)> {
        vec![
            (
                STORAGE_GET,
                method_fn(|ctx, args| async move {
                    let key: String = arg(&args, 0)?;
                    Ok(handle(&ctx)?.get::<Value>(&key).await?.unwrap_or(Value::Null))
                }),
            ),
            (
                STORAGE_GET_MULTIPLE,
                method_fn(|ctx, args| async move {
                    let keys: Vec<String> = arg(&args, 0)?;
                    Ok(json!(handle(&ctx)?.get_many(&keys).await?))
                }),
            ),
            (
                STORAGE_PUT,
                method_fn(|ctx, args| async move {
                    let key: String = arg(&args, 0)?;
                    let value: Value = arg(&args, 1)?;
                    handle(&ctx)?.put(&key, &value).await?;
                    Ok(Value::Null)
                }),
            ),
            (
                STORAGE_PUT_MULTIPLE,
                method_fn(|ctx, args| async move {
                    let entries: BTreeMap<String, Value> = arg(&args, 0)?;
                    handle(&ctx)?.put_many(entries).await?;
                    Ok(Value::Null)
                }),
            ),
            (
                STORAGE_DELETE,
                method_fn(|ctx, args| async move {
                    let key: String = arg(&args, 0)?;
                    Ok(json!(handle(&ctx)?.delete(&key).await?))
                }),
            ),
            (
                STORAGE_DELETE_MULTIPLE,
                method_fn(|ctx, args| async move {
                    let keys: Vec<String> = arg(&args, 0)?;
                    Ok(json!(handle(&ctx)?.delete_many(&keys).await?))
                }),
            ),
            (
                STORAGE_LIST,
                method_fn(|ctx, args| async move {
                    let entries = handle(&ctx)?.list(&list_options(&args)?).await?;
                    Ok(Value::Array(
                        entries
                            .into_iter()
                            .map(|(key, value)| json!({"key": key, "value": value}))
                            .collect(),
                    ))
                }),
            ),
            (
                STORAGE_KEYS,
                method_fn(|ctx, args| async move {
                    Ok(json!(handle(&ctx)?.keys(&list_options(&args)?).await?))
                }),
            ),
        ]
    }
}
