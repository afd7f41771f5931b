//! # Middleware Pipeline
//!
//! Cross-cutting concerns (auth, logging, timing) run as ordered hooks around
//! every exposed method.
//!
//! - `on_request` hooks run in declaration order. The first failure
//!   short-circuits: later `on_request` hooks, the method itself, and every
//!   `on_response`/`on_error` hook are skipped, and the error reaches the caller.
//! - `on_response` hooks run in declaration order on success.
//! - `on_error` hooks run in **reverse** declaration order on failure, then the
//!   original error is returned unchanged.
//! - `on_response`/`on_error` failures (including panics) are logged and
//!   suppressed; a broken observer never breaks the call.
//!
//! Internal reserved-prefix methods never pass through this pipeline.

use crate::framework::context::RpcContext;
use crate::framework::interface::MethodFn;
use crate::framework::{Result, RpcError};
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Per-call view handed to every hook.
///
/// Built when the call starts, so it reflects the request and connection
/// count of *this* call rather than those seen when the method was wrapped.
#[derive(Debug, Clone)]
pub struct CallInfo {
    pub method: String,
    pub args: Vec<Value>,
    pub context: RpcContext,
    pub started_at: Instant,
}

/// A set of optional hooks around a call. Every hook defaults to a no-op.
#[async_trait]
pub trait Middleware: Send + Sync + 'static {
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    async fn on_request(&self, _call: &CallInfo) -> Result<()> {
        Ok(())
    }

    async fn on_response(&self, _call: &CallInfo, _result: &Value) -> Result<()> {
        Ok(())
    }

    async fn on_error(&self, _call: &CallInfo, _error: &RpcError) -> Result<()> {
        Ok(())
    }
}

/// Wraps `handler` with `hooks`. With no hooks the handler is returned as is.
pub fn wrap(method: &str, handler: MethodFn, hooks: &[Arc<dyn Middleware>]) -> MethodFn {
    if hooks.is_empty() {
        return handler;
    }
    let hooks: Arc<[Arc<dyn Middleware>]> = hooks.into();
    let method: Arc<str> = method.into();
    Arc::new(move |ctx: RpcContext, args: Vec<Value>| -> BoxFuture<'static, Result<Value>> {
        let hooks = hooks.clone();
        let handler = handler.clone();
        let method = method.clone();
        Box::pin(async move { run_pipeline(&method, &handler, &hooks, ctx, args).await })
    })
}

async fn run_pipeline(
    method: &str,
    handler: &MethodFn,
    hooks: &[Arc<dyn Middleware>],
    ctx: RpcContext,
    args: Vec<Value>,
) -> Result<Value> {
    let call = CallInfo {
        method: method.to_string(),
        args: args.clone(),
        context: ctx.clone(),
        started_at: Instant::now(),
    };

    for hook in hooks {
        hook.on_request(&call).await?;
    }

    match handler(ctx, args).await {
        Ok(result) => {
            for hook in hooks {
                let outcome = AssertUnwindSafe(hook.on_response(&call, &result))
                    .catch_unwind()
                    .await;
                report_hook_failure(hook.name(), "on_response", method, outcome);
            }
            Ok(result)
        }
        Err(error) => {
            for hook in hooks.iter().rev() {
                let outcome = AssertUnwindSafe(hook.on_error(&call, &error))
                    .catch_unwind()
                    .await;
                report_hook_failure(hook.name(), "on_error", method, outcome);
            }
            Err(error)
        }
    }
}

fn report_hook_failure(
    hook: &str,
    phase: &str,
    method: &str,
    outcome: std::thread::Result<Result<()>>,
) {
    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(hook, phase, method, error = %e, "Hook failed"),
        Err(_) => warn!(hook, phase, method, "Hook panicked"),
    }
}

/// Logs every call, its result and its failure.
#[derive(Debug, Default, Clone)]
pub struct LoggingMiddleware;

#[async_trait]
impl Middleware for LoggingMiddleware {
    fn name(&self) -> &str {
        "logging"
    }

    async fn on_request(&self, call: &CallInfo) -> Result<()> {
        debug!(method = %call.method, args = call.args.len(), "Call");
        Ok(())
    }

    async fn on_response(&self, call: &CallInfo, _result: &Value) -> Result<()> {
        info!(method = %call.method, "Call ok");
        Ok(())
    }

    async fn on_error(&self, call: &CallInfo, error: &RpcError) -> Result<()> {
        warn!(method = %call.method, code = error.code(), error = %error, "Call failed");
        Ok(())
    }
}

/// Records how long each call took.
#[derive(Debug, Default, Clone)]
pub struct TimingMiddleware;

#[async_trait]
impl Middleware for TimingMiddleware {
    fn name(&self) -> &str {
        "timing"
    }

    async fn on_response(&self, call: &CallInfo, _result: &Value) -> Result<()> {
        let elapsed_ms = call.started_at.elapsed().as_millis() as u64;
        info!(method = %call.method, elapsed_ms, "Timing");
        Ok(())
    }

    async fn on_error(&self, call: &CallInfo, _error: &RpcError) -> Result<()> {
        let elapsed_ms = call.started_at.elapsed().as_millis() as u64;
        info!(method = %call.method, elapsed_ms, failed = true, "Timing");
        Ok(())
    }
}
