//! # Session Transport
//!
//! A [`SessionTransport`] adapts the push-style socket events the host
//! delivers into the pull-style `send`/`receive` pair the RPC session loop
//! consumes.
//!
//! Inbound messages are handed to pending receivers in FIFO order and
//! buffered when nobody is waiting. [`abort`](SessionTransport::abort) tears
//! the session down exactly once: every pending receiver fails, the buffer is
//! dropped, and the socket is closed best-effort.

use crate::framework::{Result, RpcError};
use crate::transport::socket::{truncate_reason, Socket, INTERNAL_ERROR};
use crate::transport::TransportId;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, warn};

#[derive(Default)]
struct SessionState {
    messages: VecDeque<String>,
    waiters: VecDeque<oneshot::Sender<Result<String>>>,
    closed: bool,
    close_error: Option<RpcError>,
}

pub struct SessionTransport {
    id: TransportId,
    socket: Arc<dyn Socket>,
    state: Mutex<SessionState>,
}

impl std::fmt::Debug for SessionTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SessionTransport")
            .field("id", &self.id)
            .field("socket", &self.socket.label())
            .field("buffered", &state.messages.len())
            .field("waiters", &state.waiters.len())
            .field("closed", &state.closed)
            .finish()
    }
}

impl SessionTransport {
    pub fn new(id: TransportId, socket: Arc<dyn Socket>) -> Self {
        Self {
            id,
            socket,
            state: Mutex::new(SessionState::default()),
        }
    }

    pub fn id(&self) -> &TransportId {
        &self.id
    }

    pub fn socket(&self) -> &Arc<dyn Socket> {
        &self.socket
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn closed_error(state: &SessionState) -> RpcError {
        state
            .close_error
            .clone()
            .unwrap_or_else(|| RpcError::TransportClosed("transport closed".into()))
    }

    /// Sends `message` over the socket. Fails without touching the socket once closed.
    pub async fn send(&self, message: String) -> Result<()> {
        {
            let state = self.state.lock();
            if state.closed {
                return Err(Self::closed_error(&state));
            }
        }
        self.socket.send(message).await
    }

    /// Next inbound message, waiting for one if the buffer is empty.
    pub async fn receive(&self) -> Result<String> {
        let rx = {
            let mut state = self.state.lock();
            if let Some(message) = state.messages.pop_front() {
                return Ok(message);
            }
            if state.closed {
                return Err(Self::closed_error(&state));
            }
            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(tx);
            rx
        };
        rx.await
            .map_err(|_| RpcError::TransportClosed("transport dropped".into()))?
    }

    /// Delivers an inbound message to the oldest live receiver, or buffers it.
    pub fn enqueue_message(&self, message: String) {
        let mut state = self.state.lock();
        if state.closed {
            debug!(transport_id = %self.id, "Message dropped on closed transport");
            return;
        }
        let mut message = message;
        while let Some(waiter) = state.waiters.pop_front() {
            match waiter.send(Ok(message)) {
                Ok(()) => return,
                // receiver gave up; try the next one
                Err(Ok(returned)) => message = returned,
                Err(Err(_)) => return,
            }
        }
        state.messages.push_back(message);
    }

    /// Flips the session to closed and fails every pending receiver.
    /// Returns `false` when the session was already closed.
    fn shut(&self, reason: &str) -> bool {
        let error = RpcError::TransportClosed(reason.to_string());
        let waiters = {
            let mut state = self.state.lock();
            if state.closed {
                return false;
            }
            state.closed = true;
            state.close_error = Some(error.clone());
            state.messages.clear();
            std::mem::take(&mut state.waiters)
        };
        let pending = waiters.len();
        for waiter in waiters {
            let _ = waiter.send(Err(error.clone()));
        }
        debug!(transport_id = %self.id, pending, reason, "Transport closed");
        true
    }

    /// Closes the session and its socket. Only the first call has any effect.
    pub async fn abort(&self, reason: &str) {
        if !self.shut(reason) {
            return;
        }
        if let Err(e) = self
            .socket
            .close(INTERNAL_ERROR, truncate_reason(reason))
            .await
        {
            warn!(transport_id = %self.id, error = %e, "Socket close failed");
        }
    }

    /// Marks the session closed after the peer went away, leaving the socket alone.
    pub fn mark_closed(&self, reason: &str) {
        self.shut(reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framework::mock::MockSocket;
    use std::time::Duration;

    fn transport() -> (Arc<SessionTransport>, Arc<MockSocket>) {
        let socket = Arc::new(MockSocket::new());
        let transport = Arc::new(SessionTransport::new(
            TransportId::from("t"),
            socket.clone(),
        ));
        (transport, socket)
    }

    #[tokio::test]
    async fn buffered_messages_are_received_in_order() {
        let (transport, _) = transport();
        transport.enqueue_message("a".into());
        transport.enqueue_message("b".into());
        assert_eq!(transport.receive().await.unwrap(), "a");
        assert_eq!(transport.receive().await.unwrap(), "b");
    }

    #[tokio::test]
    async fn pending_receivers_resolve_fifo() {
        let (transport, _) = transport();
        let first = tokio::spawn({
            let t = transport.clone();
            async move { t.receive().await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        let second = tokio::spawn({
            let t = transport.clone();
            async move { t.receive().await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        transport.enqueue_message("m1".into());
        transport.enqueue_message("m2".into());

        assert_eq!(first.await.unwrap().unwrap(), "m1");
        assert_eq!(second.await.unwrap().unwrap(), "m2");
    }

    #[tokio::test]
    async fn abort_rejects_every_pending_receiver() {
        let (transport, socket) = transport();
        let mut handles = Vec::new();
        for _ in 0..3 {
            let t = transport.clone();
            handles.push(tokio::spawn(async move { t.receive().await }));
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        transport.abort("shutting down").await;

        for handle in handles {
            let err = handle.await.unwrap().unwrap_err();
            assert_eq!(err, RpcError::TransportClosed("shutting down".into()));
            assert!(err.to_string().contains("shutting down"));
        }
        assert_eq!(socket.closes(), vec![(INTERNAL_ERROR, "shutting down".to_string())]);
    }

    #[tokio::test]
    async fn abort_is_idempotent_and_send_fails_fast() {
        let (transport, socket) = transport();
        transport.enqueue_message("dropped".into());
        transport.abort("first").await;
        transport.abort("second").await;

        assert_eq!(socket.closes().len(), 1);
        let err = transport.send("late".into()).await.unwrap_err();
        assert!(err.to_string().contains("first"));
        assert!(socket.sent().is_empty());
        assert!(transport.receive().await.is_err());
    }

    #[tokio::test]
    async fn close_reason_is_truncated() {
        let (transport, socket) = transport();
        transport.abort(&"x".repeat(500)).await;
        assert_eq!(socket.closes()[0].1.len(), 123);
    }

    #[tokio::test]
    async fn failed_socket_close_is_swallowed() {
        let (transport, socket) = transport();
        socket.fail_close();
        transport.abort("bye").await;
        assert!(transport.is_closed());
    }

    #[tokio::test]
    async fn messages_after_close_are_dropped() {
        let (transport, _) = transport();
        transport.mark_closed("peer left");
        transport.enqueue_message("ignored".into());
        assert!(transport.receive().await.is_err());
    }
}
