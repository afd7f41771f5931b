//! # SQL Plugin
//!
//! Contributes the `sql` context field, a [`SqlHandle`] over the actor's
//! storage engine, and the remote `__sql_*` primitives.
//!
//! Every query is checked before it reaches the engine: the number of `?`
//! placeholders outside quoted literals must equal the number of parameters.

use crate::framework::internal::{SQL_EXEC, SQL_FIRST, SQL_WRITE};
use crate::framework::{
    arg, method_fn, opt_arg, ContextExtension, InitContext, MethodFn, Plugin, Result, RpcContext,
    RpcError,
};
use crate::storage::{ActorState, QueryResult};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

pub const FIELD: &str = "sql";

/// Counts `?` placeholders, ignoring any inside `'...'` or `"..."` literals.
pub fn count_placeholders(query: &str) -> usize {
    let mut quote: Option<char> = None;
    let mut count = 0;
    for c in query.chars() {
        match (quote, c) {
            (None, '\'' | '"') => quote = Some(c),
            (Some(q), c) if c == q => quote = None,
            (None, '?') => count += 1,
            _ => {}
        }
    }
    count
}

/// Fails with [`RpcError::ParamCount`] unless `params` fills every placeholder.
pub fn validate_params(query: &str, params: &[Value]) -> Result<()> {
    let expected = count_placeholders(query);
    if expected != params.len() {
        return Err(RpcError::ParamCount {
            expected,
            actual: params.len(),
        });
    }
    Ok(())
}

/// SQL access for methods running in the actor.
#[derive(Debug, Clone)]
pub struct SqlHandle {
    state: ActorState,
}

impl SqlHandle {
    pub fn new(state: ActorState) -> Self {
        Self { state }
    }

    pub async fn exec(&self, query: &str, params: &[Value]) -> Result<QueryResult> {
        validate_params(query, params)?;
        debug!(query, params = params.len(), "SQL exec");
        self.state.storage().exec(query, params).await
    }

    /// First row of the result, if any.
    pub async fn first(&self, query: &str, params: &[Value]) -> Result<Option<Value>> {
        Ok(self.exec(query, params).await?.rows.into_iter().next())
    }

    /// Number of rows written.
    pub async fn write(&self, query: &str, params: &[Value]) -> Result<u64> {
        Ok(self.exec(query, params).await?.rows_written)
    }
}

fn handle(ctx: &RpcContext) -> Result<SqlHandle> {
    ctx.require::<SqlHandle>(FIELD).cloned()
}

fn query_args(args: &[Value]) -> Result<(String, Vec<Value>)> {
    let query: String = arg(args, 0)?;
    let params: Vec<Value> = opt_arg(args, 1)?.unwrap_or_default();
    Ok((query, params))
}

#[derive(Debug, Default)]
pub struct SqlPlugin;

#[async_trait]
impl Plugin for SqlPlugin {
    fn name(&self) -> &str {
        "sql"
    }

    fn init(&self, ctx: &InitContext) -> Result<ContextExtension> {
        Ok(ContextExtension::new().with(FIELD, SqlHandle::new(ctx.state.clone())))
    }

    fn internal_methods(&self) -> Vec<(&'static str, MethodFn)> {
        vec![
            (
                SQL_EXEC,
                method_fn(|ctx, args| async move {
                    let (query, params) = query_args(&args)?;
                    let result = handle(&ctx)?.exec(&query, &params).await?;
                    Ok(serde_json::to_value(result)?)
                }),
            ),
            (
                SQL_FIRST,
                method_fn(|ctx, args| async move {
                    let (query, params) = query_args(&args)?;
                    let row = handle(&ctx)?.first(&query, &params).await?;
                    Ok(row.unwrap_or(Value::Null))
                }),
            ),
            (
                SQL_WRITE,
                method_fn(|ctx, args| async move {
                    let (query, params) = query_args(&args)?;
                    Ok(json!(handle(&ctx)?.write(&query, &params).await?))
                }),
            ),
        ]
    }
}
