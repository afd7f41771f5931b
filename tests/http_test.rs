use actor_rpc::config::RpcConfig;
use actor_rpc::framework::{arg, ActorDefinition, Environment, Plugin};
use actor_rpc::http::router;
use actor_rpc::lifecycle::RpcActor;
use actor_rpc::plugins::{
    collections, AuthPlugin, Collections, CollectionsPlugin, Principal, SqlPlugin, StaticTokens,
    StoragePlugin,
};
use actor_rpc::storage::ActorState;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

struct Shop;

fn definition() -> ActorDefinition {
    ActorDefinition::builder(Shop)
        .method("add", 2, |_this, _ctx, args| async move {
            Ok(json!(arg::<i64>(&args, 0)? + arg::<i64>(&args, 1)?))
        })
        .method("hasSql", 0, |_this, ctx, _args| async move {
            Ok(json!(ctx.has("sql")))
        })
        .method("hasStorage", 0, |_this, ctx, _args| async move {
            Ok(json!(ctx.has("storage")))
        })
        .method("stock", 1, |_this, ctx, args| async move {
            let item: String = arg(&args, 0)?;
            let col = ctx
                .require::<Collections>(collections::FIELD)?
                .collection("stock")
                .await?;
            col.put(&item, json!({ "item": item, "qty": 1 })).await?;
            Ok(json!(col.count(&json!({})).await?))
        })
        .method("_audit", 0, |_this, _ctx, _args| async move { Ok(Value::Null) })
        .namespace("math", (), |ns| {
            ns.method("double", 1, |_ns, _ctx, args| async move {
                Ok(json!(arg::<i64>(&args, 0)? * 2))
            })
        })
        .build()
}

fn app(plugins: Vec<Arc<dyn Plugin>>) -> Router {
    let actor = RpcActor::new(
        definition(),
        plugins,
        vec![],
        vec![],
        ActorState::in_memory("shop"),
        Environment::default(),
    )
    .expect("actor should compose");
    router(Arc::new(actor), &RpcConfig::default())
}

fn post(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/rpc")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

#[tokio::test]
async fn post_call_returns_result() {
    let app = app(vec![]);

    let (status, body) = send(&app, post(json!({"method": "add", "args": [2, 3]}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"result": 5}));

    // Namespaced methods are addressed with a dotted name
    let (status, body) = send(&app, post(json!({"method": "math.double", "args": [21]}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"result": 42}));
}

#[tokio::test]
async fn other_verbs_on_the_rpc_path_are_rejected() {
    let app = app(vec![]);
    let request = Request::builder()
        .method("PUT")
        .uri("/rpc")
        .body(Body::empty())
        .unwrap();

    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn schema_describes_public_surface() {
    let app = app(vec![]);
    let request = Request::builder()
        .uri("/__schema")
        .body(Body::empty())
        .unwrap();

    let (status, schema) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(schema["version"], json!(1));

    let names: Vec<&str> = schema["methods"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|m| m["name"].as_str())
        .collect();
    assert!(names.contains(&"add"));
    assert!(!names.contains(&"_audit"));
    assert!(names.iter().all(|n| !n.starts_with("__")));

    let add = schema["methods"]
        .as_array()
        .unwrap()
        .iter()
        .find(|m| m["name"] == "add")
        .unwrap();
    assert_eq!(add["paramCount"], json!(2));
    assert_eq!(schema["namespaces"][0]["name"], "math");

    // The root path serves the same descriptor
    let root = Request::builder().uri("/").body(Body::empty()).unwrap();
    assert_eq!(send(&app, root).await.1, schema);
}

#[tokio::test]
async fn private_methods_are_not_callable() {
    let app = app(vec![]);

    let (status, body) = send(&app, post(json!({"method": "_audit"}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "UNKNOWN_METHOD");
}

#[tokio::test]
async fn plugin_fields_reach_exposed_methods() {
    let bare = app(vec![]);
    let (_, body) = send(&bare, post(json!({"method": "hasSql"}))).await;
    assert_eq!(body, json!({"result": false}));

    let full = app(vec![Arc::new(SqlPlugin), Arc::new(StoragePlugin)]);
    let (_, body) = send(&full, post(json!({"method": "hasSql"}))).await;
    assert_eq!(body, json!({"result": true}));
    let (_, body) = send(&full, post(json!({"method": "hasStorage"}))).await;
    assert_eq!(body, json!({"result": true}));
}

#[tokio::test]
async fn collections_persist_between_calls() {
    let app = app(vec![Arc::new(CollectionsPlugin)]);

    let (_, body) = send(&app, post(json!({"method": "stock", "args": ["apple"]}))).await;
    assert_eq!(body, json!({"result": 1}));
    let (_, body) = send(&app, post(json!({"method": "stock", "args": ["pear"]}))).await;
    assert_eq!(body, json!({"result": 2}));

    let request = Request::builder()
        .uri("/__schema/storage")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn bearer_token_gates_calls() {
    let tokens = StaticTokens::new().with_token("s3cret", Principal::new("alice"));
    let app = app(vec![Arc::new(AuthPlugin::new(Arc::new(tokens)))]);

    let (status, body) = send(&app, post(json!({"method": "add", "args": [1, 1]}))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");

    let request = Request::builder()
        .method("POST")
        .uri("/rpc")
        .header("authorization", "Bearer s3cret")
        .body(Body::from(json!({"method": "auth.whoami"}).to_string()))
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"]["subject"], "alice");
}
