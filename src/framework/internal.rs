//! # Internal Reserved Methods
//!
//! Protocol-level primitives behind the `__` prefix: remote SQL, remote
//! key-value storage, remote document collections, the storage schema and
//! topic streams (subscribe, unsubscribe, publish).
//!
//! The full name set is always present. Until a plugin registers the real
//! implementation, a name resolves to a handler that fails with a
//! configuration error at the point of use. These methods are dispatched
//! directly and never wrapped by user middleware.

use crate::framework::context::RpcContext;
use crate::framework::interface::{arg, method_fn, MethodFn, INTERNAL_PREFIX};
use crate::framework::{Result, RpcError};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::debug;

pub const SQL_EXEC: &str = "__sql_exec";
pub const SQL_FIRST: &str = "__sql_first";
pub const SQL_WRITE: &str = "__sql_write";

pub const STORAGE_GET: &str = "__storage_get";
pub const STORAGE_GET_MULTIPLE: &str = "__storage_get_multiple";
pub const STORAGE_PUT: &str = "__storage_put";
pub const STORAGE_PUT_MULTIPLE: &str = "__storage_put_multiple";
pub const STORAGE_DELETE: &str = "__storage_delete";
pub const STORAGE_DELETE_MULTIPLE: &str = "__storage_delete_multiple";
pub const STORAGE_LIST: &str = "__storage_list";
pub const STORAGE_KEYS: &str = "__storage_keys";
pub const STORAGE_SCHEMA: &str = "__storage_schema";

pub const COLLECTION_GET: &str = "__collection_get";
pub const COLLECTION_PUT: &str = "__collection_put";
pub const COLLECTION_DELETE: &str = "__collection_delete";
pub const COLLECTION_HAS: &str = "__collection_has";
pub const COLLECTION_FIND: &str = "__collection_find";
pub const COLLECTION_COUNT: &str = "__collection_count";
pub const COLLECTION_LIST: &str = "__collection_list";
pub const COLLECTION_KEYS: &str = "__collection_keys";
pub const COLLECTION_CLEAR: &str = "__collection_clear";
pub const COLLECTION_NAMES: &str = "__collection_names";
pub const COLLECTION_STATS: &str = "__collection_stats";

pub const SUBSCRIBE: &str = "__subscribe";
pub const UNSUBSCRIBE: &str = "__unsubscribe";
pub const PUBLISH: &str = "__publish";

/// Every reserved name, in a fixed order.
pub const RESERVED_NAMES: &[&str] = &[
    SQL_EXEC,
    SQL_FIRST,
    SQL_WRITE,
    STORAGE_GET,
    STORAGE_GET_MULTIPLE,
    STORAGE_PUT,
    STORAGE_PUT_MULTIPLE,
    STORAGE_DELETE,
    STORAGE_DELETE_MULTIPLE,
    STORAGE_LIST,
    STORAGE_KEYS,
    STORAGE_SCHEMA,
    COLLECTION_GET,
    COLLECTION_PUT,
    COLLECTION_DELETE,
    COLLECTION_HAS,
    COLLECTION_FIND,
    COLLECTION_COUNT,
    COLLECTION_LIST,
    COLLECTION_KEYS,
    COLLECTION_CLEAR,
    COLLECTION_NAMES,
    COLLECTION_STATS,
    SUBSCRIBE,
    UNSUBSCRIBE,
    PUBLISH,
];

fn capability_for(name: &str) -> &'static str {
    if name.starts_with("__sql") {
        "sql"
    } else if name.starts_with("__storage") {
        "storage"
    } else if name.starts_with("__collection") {
        "collections"
    } else {
        "unknown"
    }
}

fn unconfigured(name: &'static str) -> MethodFn {
    method_fn(move |_ctx, _args| async move {
        Err(RpcError::Configuration(format!(
            "{name} requires the '{}' plugin, which is not configured",
            capability_for(name)
        )))
    })
}

/// The reserved method table of one actor.
#[derive(Clone)]
pub struct InternalMethods {
    methods: BTreeMap<String, MethodFn>,
}

impl Default for InternalMethods {
    fn default() -> Self {
        let mut methods: BTreeMap<String, MethodFn> = RESERVED_NAMES
            .iter()
            .map(|name| (name.to_string(), unconfigured(*name)))
            .collect();

        methods.insert(
            STORAGE_SCHEMA.to_string(),
            method_fn(|ctx, _args| async move {
                let schema = ctx.state.storage().schema().await?;
                Ok(serde_json::to_value(schema)?)
            }),
        );
        methods.insert(
            SUBSCRIBE.to_string(),
            method_fn(|ctx, args| async move {
                let topic: String = arg(&args, 0)?;
                let caller = caller_of(&ctx)?;
                Ok(json!(ctx.broadcast.subscribe(&topic, caller)))
            }),
        );
        methods.insert(
            UNSUBSCRIBE.to_string(),
            method_fn(|ctx, args| async move {
                let topic: String = arg(&args, 0)?;
                let caller = caller_of(&ctx)?;
                Ok(json!(ctx.broadcast.unsubscribe(&topic, &caller)))
            }),
        );

        // `[topic, message]`; string messages go out verbatim, anything else as JSON
        methods.insert(
            PUBLISH.to_string(),
            method_fn(|ctx, args| async move {
                let topic: String = arg(&args, 0)?;
                let frame = match args.get(1) {
                    Some(Value::String(text)) => text.clone(),
                    Some(value) => value.to_string(),
                    None => return Err(RpcError::Validation("missing argument 1".into())),
                };
                Ok(json!(ctx.broadcast.broadcast_topic(&topic, &frame).await))
            }),
        );

        Self { methods }
    }
}

fn caller_of(ctx: &RpcContext) -> Result<crate::transport::TransportId> {
    ctx.caller
        .clone()
        .ok_or_else(|| RpcError::Validation("subscriptions require a socket session".into()))
}

impl InternalMethods {
    /// Installs the implementation of a reserved name.
    pub fn register(&mut self, name: &str, handler: MethodFn) -> Result<()> {
        if !name.starts_with(INTERNAL_PREFIX) {
            return Err(RpcError::Configuration(format!(
                "internal method '{name}' must start with '{INTERNAL_PREFIX}'"
            )));
        }
        debug!(method = name, "Internal method registered");
        self.methods.insert(name.to_string(), handler);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&MethodFn> {
        self.methods.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }

    /// Invokes `name` directly, bypassing middleware.
    pub async fn invoke(&self, name: &str, ctx: RpcContext, args: Vec<Value>) -> Result<Value> {
        let handler = self
            .methods
            .get(name)
            .ok_or_else(|| RpcError::UnknownMethod(name.to_string()))?;
        handler(ctx, args).await
    }
}
