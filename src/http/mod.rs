//! # HTTP Surface
//!
//! | Route | Method | Response |
//! |---|---|---|
//! | `/`, `{schema_path}` | GET | Schema Descriptor |
//! | `{schema_path}/storage` | GET | Storage Schema Descriptor |
//! | `{rpc_path}` | POST | `{result}` or `{error: {code, message}}` |
//! | `{ws_path}` | GET | WebSocket upgrade into a socket session |
//!
//! Any other method on a known path answers 405. Reserved `__` methods are
//! not reachable over plain HTTP; they are socket-session primitives.

pub mod ws;

use crate::config::RpcConfig;
use crate::framework::{RequestInfo, RpcError, INTERNAL_PREFIX};
use crate::lifecycle::RpcActor;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

/// `{method: "name" | "namespace.name", args: [...]}`
#[derive(Debug, Deserialize)]
struct HttpCall {
    method: String,
    #[serde(default)]
    args: Vec<Value>,
}

pub fn router(actor: Arc<RpcActor>, config: &RpcConfig) -> Router {
    let schema_path = config.schema_path.trim_end_matches('/');
    let mut router = Router::new().route("/", get(schema));
    if !schema_path.is_empty() {
        router = router.route(schema_path, get(schema));
    }
    router
        .route(&format!("{schema_path}/storage"), get(storage_schema))
        .route(&config.rpc_path, post(rpc))
        .route(&config.ws_path, get(ws::upgrade))
        .with_state(actor)
}

pub(crate) fn request_info(method: &Method, uri: &Uri, headers: &HeaderMap) -> RequestInfo {
    headers
        .iter()
        .fold(RequestInfo::new(method.as_str(), uri.path()), |info, (name, value)| {
            match value.to_str() {
                Ok(v) => info.with_header(name.as_str(), v),
                Err(_) => info,
            }
        })
}

fn error_response(error: &RpcError) -> Response {
    (error.status(), Json(json!({ "error": error.to_body() }))).into_response()
}

async fn schema(State(actor): State<Arc<RpcActor>>) -> Response {
    Json(actor.schema().clone()).into_response()
}

async fn storage_schema(State(actor): State<Arc<RpcActor>>) -> Response {
    match actor.storage_schema().await {
        Ok(schema) => Json(schema).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn rpc(
    State(actor): State<Arc<RpcActor>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = request_info(&method, &uri, &headers);
    let call: HttpCall = match serde_json::from_slice(&body) {
        Ok(call) => call,
        Err(e) => {
            return error_response(&RpcError::Validation(format!("malformed request: {e}")))
        }
    };
    if call.method.starts_with(INTERNAL_PREFIX) {
        return error_response(&RpcError::UnknownMethod(call.method));
    }

    let path: Vec<String> = call.method.split('.').map(str::to_string).collect();
    match actor.call(&path, call.args, Some(request)).await {
        Ok(result) => (StatusCode::OK, Json(json!({ "result": result }))).into_response(),
        Err(e) => {
            debug!(method = %call.method, code = e.code(), "HTTP call failed");
            error_response(&e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framework::{arg, ActorDefinition, Environment};
    use crate::storage::ActorState;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    struct Calc;

    fn app() -> Router {
        let definition = ActorDefinition::builder(Calc)
            .method("add", 2, |_this, _ctx, args| async move {
                Ok(json!(arg::<i64>(&args, 0)? + arg::<i64>(&args, 1)?))
            })
            .build();
        let actor = RpcActor::new(
            definition,
            vec![],
            vec![],
            vec![],
            ActorState::in_memory("calc"),
            Environment::default(),
        )
        .unwrap();
        router(Arc::new(actor), &RpcConfig::default())
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_rpc(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/rpc")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn request_info_keeps_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Client-Region", "weur".parse().unwrap());
        let info = request_info(&Method::POST, &"/rpc?x=1".parse().unwrap(), &headers);
        assert_eq!(info.path, "/rpc");
        assert_eq!(info.header("x-client-region"), Some("weur"));
    }

    #[tokio::test]
    async fn errors_map_to_status_codes() {
        let cases = [
            (r#"{"method": "nope"}"#, StatusCode::NOT_FOUND, "UNKNOWN_METHOD"),
            (r#"{"method": "__sql_exec"}"#, StatusCode::NOT_FOUND, "UNKNOWN_METHOD"),
            (r#"{"method": "add", "args": ["x", 1]}"#, StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            ("not json", StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
        ];
        for (body, status, code) in cases {
            let response = app().oneshot(post_rpc(body)).await.unwrap();
            assert_eq!(response.status(), status, "{body}");
            assert_eq!(body_json(response).await["error"]["code"], code);
        }
    }

    #[tokio::test]
    async fn storage_schema_route() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/__schema/storage")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({"tables": []}));
    }
}
