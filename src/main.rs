//! # Actor RPC Demo
//!
//! Serves one demo actor over HTTP and WebSocket with every plugin enabled.
//!
//! ```bash
//! RUST_LOG=info cargo run
//!
//! curl localhost:8787/__schema
//! curl -X POST localhost:8787/rpc -d '{"method": "increment", "args": [2]}'
//! curl -X POST localhost:8787/rpc -d '{"method": "notes.add", "args": ["n1", "hello"]}'
//! ```
//!
//! Set `ACTOR_API_TOKEN` to require `Authorization: Bearer <token>` on every call.

use actor_rpc::config::{actor_env_from_process, RpcConfig};
use actor_rpc::framework::{
    arg, opt_arg, ActorDefinition, LoggingMiddleware, Middleware, Plugin, RpcError,
    TimingMiddleware,
};
use actor_rpc::http::router;
use actor_rpc::lifecycle::{setup_tracing, RpcActor};
use actor_rpc::plugins::{
    collections, AuthPlugin, Collections, CollectionsPlugin, FindOptions, LocalityPlugin,
    Principal, SqlPlugin, StaticTokens, StorageHandle, StoragePlugin,
};
use actor_rpc::storage::ActorState;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info};

struct Counter;

struct Notes {
    collection: &'static str,
}

fn definition() -> ActorDefinition {
    ActorDefinition::builder(Counter)
        .method("increment", 1, |_this, ctx, args| async move {
            let by: i64 = opt_arg(&args, 0)?.unwrap_or(1);
            let storage = ctx.require::<StorageHandle>("storage")?;
            let count = storage.get::<i64>("count").await?.unwrap_or(0) + by;
            storage.put("count", &count).await?;
            ctx.broadcast
                .broadcast_topic("count", &json!({ "count": count }).to_string())
                .await;
            Ok(json!(count))
        })
        .method("count", 0, |_this, ctx, _args| async move {
            let storage = ctx.require::<StorageHandle>("storage")?;
            Ok(json!(storage.get::<i64>("count").await?.unwrap_or(0)))
        })
        .method("connections", 0, |_this, ctx, _args| async move {
            Ok(json!(ctx.connection_count))
        })
        .method("_reset", 0, |_this, ctx, _args| async move {
            ctx.require::<StorageHandle>("storage")?.delete("count").await?;
            Ok(Value::Null)
        })
        .data("label")
        .namespace(
            "notes",
            Notes {
                collection: "notes",
            },
            |ns| {
                ns.method("add", 2, |notes, ctx, args| async move {
                    let id: String = arg(&args, 0)?;
                    let text: String = arg(&args, 1)?;
                    let col = ctx
                        .require::<Collections>(collections::FIELD)?
                        .collection(notes.collection)
                        .await?;
                    col.put(&id, json!({ "text": text })).await?;
                    Ok(json!(id))
                })
                .method("list", 0, |notes, ctx, _args| async move {
                    let col = ctx
                        .require::<Collections>(collections::FIELD)?
                        .collection(notes.collection)
                        .await?;
                    Ok(Value::Array(col.list(&FindOptions::default()).await?))
                })
                .data("collection")
            },
        )
        .build()
}

#[tokio::main]
async fn main() -> Result<(), String> {
    // Setup tracing once for the entire application
    setup_tracing();

    let config = RpcConfig::from_env_or_default();
    let env = actor_env_from_process();

    let mut plugins: Vec<Arc<dyn Plugin>> = vec![
        Arc::new(SqlPlugin),
        Arc::new(StoragePlugin),
        Arc::new(CollectionsPlugin),
        Arc::new(LocalityPlugin),
    ];
    if let Some(token) = env.get("API_TOKEN") {
        let tokens = StaticTokens::new().with_token(token, Principal::new("operator"));
        plugins.push(Arc::new(AuthPlugin::new(Arc::new(tokens))));
        info!("Bearer token auth enabled");
    }
    let middleware: Vec<Arc<dyn Middleware>> =
        vec![Arc::new(LoggingMiddleware), Arc::new(TimingMiddleware)];

    let actor = RpcActor::new(
        definition(),
        plugins,
        middleware,
        vec![],
        ActorState::in_memory("demo"),
        env,
    )
    .map_err(|e: RpcError| e.to_string())?;
    let actor = Arc::new(actor);

    let app = router(actor.clone(), &config);
    let listener = tokio::net::TcpListener::bind(config.listen_address())
        .await
        .map_err(|e| e.to_string())?;
    info!(address = %config.listen_address(), "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .map_err(|e| e.to_string())?;

    // Shutdown actor gracefully
    match Arc::try_unwrap(actor) {
        Ok(actor) => actor.shutdown().await.map_err(|e| e.to_string())?,
        Err(_) => error!("Actor still referenced at shutdown; sockets left to the OS"),
    }

    info!("Application completed successfully");
    Ok(())
}
