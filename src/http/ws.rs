//! WebSocket bridge: an upgraded connection becomes a [`Socket`] driven
//! through the actor's socket event handlers.

use crate::framework::{RequestInfo, Result, RpcError};
use crate::http::request_info;
use crate::lifecycle::RpcActor;
use crate::transport::{Socket, NORMAL_CLOSURE};
use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{HeaderMap, Method, Uri};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Abnormal closure: the peer went away without a close frame.
const ABNORMAL_CLOSURE: u16 = 1006;

struct WsSocket {
    label: String,
    outbound: mpsc::UnboundedSender<Message>,
    attachment: Mutex<Option<Value>>,
}

#[async_trait]
impl Socket for WsSocket {
    fn label(&self) -> &str {
        &self.label
    }

    async fn send(&self, message: String) -> Result<()> {
        self.outbound
            .send(Message::Text(message.into()))
            .map_err(|_| RpcError::TransportClosed("websocket writer is gone".into()))
    }

    async fn close(&self, code: u16, reason: &str) -> Result<()> {
        let frame = CloseFrame {
            code,
            reason: reason.to_string().into(),
        };
        self.outbound
            .send(Message::Close(Some(frame)))
            .map_err(|_| RpcError::TransportClosed("websocket writer is gone".into()))
    }

    fn serialize_attachment(&self, value: Value) -> Result<()> {
        *self.attachment.lock() = Some(value);
        Ok(())
    }

    fn deserialize_attachment(&self) -> Option<Value> {
        self.attachment.lock().clone()
    }
}

pub(crate) async fn upgrade(
    ws: WebSocketUpgrade,
    State(actor): State<Arc<RpcActor>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let request = request_info(&method, &uri, &headers);
    ws.on_upgrade(move |socket| serve_socket(socket, actor, request))
}

async fn serve_socket(socket: WebSocket, actor: Arc<RpcActor>, request: RequestInfo) {
    let (mut sink, mut stream) = socket.split();
    let (outbound, mut rx) = mpsc::unbounded_channel::<Message>();

    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let closing = matches!(message, Message::Close(_));
            if sink.send(message).await.is_err() || closing {
                break;
            }
        }
    });

    let socket: Arc<dyn Socket> = Arc::new(WsSocket {
        label: request.path.clone(),
        outbound,
        attachment: Mutex::new(None),
    });

    if let Err(e) = actor.accept_socket(socket.clone(), Some(request)).await {
        debug!(error = %e, "WebSocket rejected");
        drop(socket);
        let _ = writer.await;
        return;
    }

    let (code, reason) = loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                if let Err(e) = actor.socket_message(socket.clone(), text.to_string()).await {
                    warn!(error = %e, "Frame not delivered");
                    break (NORMAL_CLOSURE, e.to_string());
                }
            }
            Some(Ok(Message::Close(frame))) => {
                break frame
                    .map(|f| (f.code, f.reason.to_string()))
                    .unwrap_or((NORMAL_CLOSURE, String::new()));
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                if let Err(e) = actor.socket_error(socket.clone(), &e.to_string()).await {
                    debug!(error = %e, "Socket error not recorded");
                }
                break (ABNORMAL_CLOSURE, String::new());
            }
            None => break (ABNORMAL_CLOSURE, "connection lost".to_string()),
        }
    };

    if let Err(e) = actor.socket_close(socket.clone(), code, &reason).await {
        debug!(error = %e, "Socket close not recorded");
    }
    drop(socket);
    writer.abort();
}
