//! # Dispatcher
//!
//! Routes a call path to either a reserved internal method (dispatched
//! directly, no middleware) or a wrapped method on the exposed surface. The
//! per-call context is built here, at call time, so `request` and
//! `connection_count` always reflect the current call.

use crate::framework::{
    ExposedInterface, InternalMethods, RequestInfo, Result, RpcContext, RpcError, INTERNAL_PREFIX,
};
use crate::protocol::message::{RpcRequest, RpcResponse, CALL};
use crate::transport::{SessionTransport, TransportId, TransportRegistry};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct Dispatcher {
    interface: Arc<ExposedInterface>,
    internal: Arc<InternalMethods>,
    context: RpcContext,
    registry: TransportRegistry,
}

impl Dispatcher {
    pub fn new(
        interface: Arc<ExposedInterface>,
        internal: Arc<InternalMethods>,
        context: RpcContext,
        registry: TransportRegistry,
    ) -> Self {
        Self {
            interface,
            internal,
            context,
            registry,
        }
    }

    pub fn interface(&self) -> &ExposedInterface {
        &self.interface
    }

    /// Context for one call, snapshotting the live connection count.
    pub fn context_for(
        &self,
        request: Option<RequestInfo>,
        caller: Option<TransportId>,
    ) -> RpcContext {
        self.context
            .for_call(request, self.registry.len(), caller)
    }

    pub async fn call(
        &self,
        path: &[String],
        args: Vec<Value>,
        request: Option<RequestInfo>,
        caller: Option<TransportId>,
    ) -> Result<Value> {
        let ctx = self.context_for(request, caller);
        if let [name] = path {
            if name.starts_with(INTERNAL_PREFIX) {
                debug!(method = %name, "Internal dispatch");
                return self.internal.invoke(name, ctx, args).await;
            }
        }
        let method = self
            .interface
            .resolve(path)
            .ok_or_else(|| RpcError::UnknownMethod(path.join(".")))?;
        method.invoke(ctx, args).await
    }

    pub async fn handle(
        &self,
        request: RpcRequest,
        info: Option<RequestInfo>,
        caller: Option<TransportId>,
    ) -> RpcResponse {
        if request.method != CALL {
            let err = RpcError::Validation(format!("unsupported message '{}'", request.method));
            return RpcResponse::failure(request.id, &err);
        }
        match self.call(&request.path, request.args, info, caller).await {
            Ok(result) => RpcResponse::success(request.id, result),
            Err(e) => {
                debug!(id = request.id, path = ?request.path, code = e.code(), "Call failed");
                RpcResponse::failure(request.id, &e)
            }
        }
    }

    /// Decodes and handles one text frame. Undecodable frames answer with id 0.
    pub async fn handle_frame(
        &self,
        frame: &str,
        info: Option<RequestInfo>,
        caller: Option<TransportId>,
    ) -> RpcResponse {
        match serde_json::from_str::<RpcRequest>(frame) {
            Ok(request) => self.handle(request, info, caller).await,
            Err(e) => RpcResponse::failure(
                0,
                &RpcError::Validation(format!("malformed request: {e}")),
            ),
        }
    }

    /// Session loop: receive, dispatch, reply, strictly one message at a time.
    /// Ends when the transport closes or a reply cannot be delivered.
    pub async fn serve(self, transport: Arc<SessionTransport>, info: Option<RequestInfo>) {
        let caller = Some(transport.id().clone());
        loop {
            let frame = match transport.receive().await {
                Ok(frame) => frame,
                Err(e) => {
                    debug!(transport_id = %transport.id(), reason = %e, "Session ended");
                    return;
                }
            };
            let response = self.handle_frame(&frame, info.clone(), caller.clone()).await;
            let text = match serde_json::to_string(&response) {
                Ok(text) => text,
                Err(e) => {
                    warn!(transport_id = %transport.id(), error = %e, "Response encoding failed");
                    continue;
                }
            };
            if let Err(e) = transport.send(text).await {
                debug!(transport_id = %transport.id(), error = %e, "Reply dropped");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framework::mock::MockSocket;
    use crate::framework::{
        arg, compose, ActorDefinition, Environment, InitContext, SkipSet,
    };
    use crate::storage::ActorState;
    use crate::transport::Broadcaster;
    use serde_json::json;
    use std::time::Duration;

    struct Calc;

    fn dispatcher() -> Dispatcher {
        let registry = TransportRegistry::new();
        let composed = compose(
            vec![],
            InitContext {
                state: ActorState::in_memory("calc"),
                env: Environment::default(),
            },
            Broadcaster::new(registry.clone()),
            vec![],
            vec![],
        )
        .unwrap();
        let definition = ActorDefinition::builder(Calc)
            .method("add", 2, |_this, _ctx, args| async move {
                let a: i64 = arg(&args, 0)?;
                let b: i64 = arg(&args, 1)?;
                Ok(json!(a + b))
            })
            .method("fail", 0, |_this, _ctx, _args| async {
                Err(RpcError::execution("boom"))
            })
            .method("connections", 0, |_this, ctx, _args| async move {
                Ok(json!(ctx.connection_count))
            })
            .build();
        let interface = ExposedInterface::build(definition.layers(), &SkipSet::default(), &[]);
        Dispatcher::new(
            Arc::new(interface),
            Arc::new(composed.internal),
            composed.context,
            registry,
        )
    }

    #[tokio::test]
    async fn calls_exposed_methods() {
        let d = dispatcher();
        let resp = d
            .handle(RpcRequest::call(7, &["add"], vec![json!(2), json!(3)]), None, None)
            .await;
        assert_eq!(resp, RpcResponse::success(7, json!(5)));
    }

    #[tokio::test]
    async fn unknown_paths_are_structured_errors() {
        let d = dispatcher();
        let resp = d.handle(RpcRequest::call(1, &["nope"], vec![]), None, None).await;
        assert_eq!(resp.error.unwrap().code, "UNKNOWN_METHOD");

        let resp = d.handle(RpcRequest::call(2, &["a", "b", "c"], vec![]), None, None).await;
        assert_eq!(resp.error.unwrap().code, "UNKNOWN_METHOD");
    }

    #[tokio::test]
    async fn execution_failures_become_rpc_errors() {
        let d = dispatcher();
        let resp = d.handle(RpcRequest::call(1, &["fail"], vec![]), None, None).await;
        let err = resp.error.unwrap();
        assert_eq!(err.code, "RPC_ERROR");
        assert!(err.message.contains("boom"));
    }

    #[tokio::test]
    async fn internal_methods_are_reachable_but_unconfigured() {
        let d = dispatcher();
        let resp = d.handle(RpcRequest::call(1, &["__sql_exec"], vec![]), None, None).await;
        assert_eq!(resp.error.unwrap().code, "CONFIGURATION_ERROR");
    }

    #[tokio::test]
    async fn malformed_frames_answer_with_id_zero() {
        let d = dispatcher();
        let resp = d.handle_frame("{not json", None, None).await;
        assert_eq!(resp.id, 0);
        assert_eq!(resp.error.unwrap().code, "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn session_loop_answers_in_order() {
        let d = dispatcher();
        let socket = Arc::new(MockSocket::new());
        let transport = Arc::new(SessionTransport::new(TransportId::new(), socket.clone()));
        d.registry.register(transport.clone());
        let task = tokio::spawn(d.clone().serve(transport.clone(), None));

        for id in 1..=3u64 {
            let frame = serde_json::to_string(&RpcRequest::call(id, &["add"], vec![json!(id), json!(1)]))
                .unwrap();
            transport.enqueue_message(frame);
        }
        transport.enqueue_message(
            serde_json::to_string(&RpcRequest::call(4, &["connections"], vec![])).unwrap(),
        );

        for _ in 0..100 {
            if socket.sent().len() == 4 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let ids: Vec<u64> = socket
            .sent_json()
            .iter()
            .map(|v| v["id"].as_u64().unwrap())
            .collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert_eq!(socket.sent_json()[3]["result"], json!(1));

        transport.abort("done").await;
        task.await.unwrap();
    }
}
