use crate::framework::{
    compose, ActorDefinition, Environment, ExposedInterface, InitContext, Middleware, Plugin,
    RequestInfo, Result, RpcError, SchemaDescriptor,
};
use crate::protocol::Dispatcher;
use crate::storage::{ActorState, StorageSchema};
use crate::transport::{
    truncate_reason, Broadcaster, ConnectionAttachment, ConnectionState, SessionTransport, Socket,
    TransportId, TransportRegistry, INTERNAL_ERROR, NORMAL_CLOSURE,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Policy-violation close code, sent when a connect hook rejects a socket.
pub const POLICY_VIOLATION: u16 = 1008;

/// The host actor: one composed RPC surface plus its live socket sessions.
///
/// An `RpcActor` is the in-memory half of an actor. The host may drop it at
/// any time through [`hibernate`](RpcActor::hibernate) and later build a new
/// one over the same [`ActorState`]; sockets accepted by the old instance keep
/// working because each carries its own [`ConnectionAttachment`].
///
/// # Example
///
/// ```ignore
/// let actor = RpcActor::new(definition, plugins, vec![], vec![], state.clone(), env.clone())?;
/// let id = actor.accept_socket(socket.clone(), Some(upgrade_request)).await?;
/// actor.socket_message(socket.clone(), frame).await?;
///
/// actor.hibernate();
///
/// let actor = RpcActor::new(definition, plugins, vec![], vec![], state, env)?;
/// actor.socket_message(socket, next_frame).await?; // resumes with the same transport id
/// ```
pub struct RpcActor {
    state: ActorState,
    dispatcher: Dispatcher,
    registry: TransportRegistry,
    broadcaster: Broadcaster,
    plugins: Vec<Arc<dyn Plugin>>,
    sessions: Mutex<HashMap<TransportId, JoinHandle<()>>>,
}

impl RpcActor {
    /// Composes `plugins`, runs their setup and builds the exposed interface.
    ///
    /// The actor's own definition layers come first, so its members shadow
    /// same-named plugin members.
    pub fn new(
        definition: ActorDefinition,
        plugins: Vec<Arc<dyn Plugin>>,
        middleware: Vec<Arc<dyn Middleware>>,
        extra_skip: Vec<String>,
        state: ActorState,
        env: Environment,
    ) -> Result<Self> {
        let registry = TransportRegistry::new();
        let broadcaster = Broadcaster::new(registry.clone());
        let composition = compose(
            plugins,
            InitContext {
                state: state.clone(),
                env,
            },
            broadcaster.clone(),
            middleware,
            extra_skip,
        )?;

        let mut layers = definition.layers().to_vec();
        layers.extend(composition.layers);
        let interface = ExposedInterface::build(&layers, &composition.skip, &composition.middleware);

        info!(
            actor = state.id(),
            plugins = composition.plugins.len(),
            methods = interface.schema().methods.len(),
            namespaces = interface.schema().namespaces.len(),
            "Actor started"
        );

        let dispatcher = Dispatcher::new(
            Arc::new(interface),
            Arc::new(composition.internal),
            composition.context,
            registry.clone(),
        );

        Ok(Self {
            state,
            dispatcher,
            registry,
            broadcaster,
            plugins: composition.plugins,
            sessions: Mutex::new(HashMap::new()),
        })
    }

    pub fn id(&self) -> &str {
        self.state.id()
    }

    pub fn schema(&self) -> &SchemaDescriptor {
        self.dispatcher.interface().schema()
    }

    pub async fn storage_schema(&self) -> Result<StorageSchema> {
        self.state.storage().schema().await
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    /// In-process invocation through the same dispatcher sockets use.
    pub async fn call(
        &self,
        path: &[String],
        args: Vec<Value>,
        request: Option<RequestInfo>,
    ) -> Result<Value> {
        self.dispatcher.call(path, args, request, None).await
    }

    /// Accepts a new socket: `connecting → active`, or `connecting → closed`
    /// when a connect hook rejects it.
    pub async fn accept_socket(
        &self,
        socket: Arc<dyn Socket>,
        request: Option<RequestInfo>,
    ) -> Result<TransportId> {
        let id = TransportId::new();
        let mut attachment = ConnectionAttachment::connecting(id.clone());
        attachment.persist(socket.as_ref())?;

        let ctx = self
            .dispatcher
            .context_for(request.clone(), Some(id.clone()));
        for plugin in &self.plugins {
            match plugin.on_connect(&ctx, request.as_ref()).await {
                Ok(Some(value)) => {
                    attachment.plugin_data.insert(plugin.name().to_string(), value);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(transport_id = %id, plugin = plugin.name(), error = %e, "Socket rejected");
                    return Err(self.reject(socket.as_ref(), &mut attachment, e).await);
                }
            }
        }

        attachment.advance(socket.as_ref(), ConnectionState::Active)?;
        let transport = Arc::new(SessionTransport::new(id.clone(), socket));
        self.start_session(transport, request);
        info!(transport_id = %id, connections = self.registry.len(), "Socket accepted");
        Ok(id)
    }

    /// Closes a socket a plugin refused, leaving its attachment `closed`.
    async fn reject(
        &self,
        socket: &dyn Socket,
        attachment: &mut ConnectionAttachment,
        error: RpcError,
    ) -> RpcError {
        self.disconnected(&attachment.transport_id);
        if let Err(e) = attachment.advance(socket, ConnectionState::Closed) {
            warn!(transport_id = %attachment.transport_id, error = %e, "Attachment not updated");
        }
        if let Err(e) = socket
            .close(POLICY_VIOLATION, truncate_reason(&error.to_string()))
            .await
        {
            debug!(transport_id = %attachment.transport_id, error = %e, "Close after rejection failed");
        }
        error
    }

    fn disconnected(&self, id: &TransportId) {
        for plugin in &self.plugins {
            plugin.on_disconnect(id);
        }
    }

    fn start_session(&self, transport: Arc<SessionTransport>, request: Option<RequestInfo>) {
        let id = transport.id().clone();
        self.registry.register(transport.clone());
        let handle = tokio::spawn(self.dispatcher.clone().serve(transport, request));
        if let Some(previous) = self.sessions.lock().insert(id, handle) {
            previous.abort();
        }
    }

    /// Delivers an inbound frame. A socket unknown to this instance is resumed
    /// from its attachment under its original transport id.
    pub async fn socket_message(&self, socket: Arc<dyn Socket>, message: String) -> Result<()> {
        let mut attachment = ConnectionAttachment::load(socket.as_ref())?
            .ok_or_else(|| RpcError::Validation("socket carries no attachment".into()))?;

        if let Some(transport) = self.registry.get(&attachment.transport_id) {
            transport.enqueue_message(message);
            return Ok(());
        }

        match attachment.state {
            ConnectionState::Closed => {
                return Err(RpcError::TransportClosed(format!(
                    "transport {} is closed",
                    attachment.transport_id
                )))
            }
            ConnectionState::Connecting => {
                return Err(RpcError::Validation(format!(
                    "transport {} was never accepted",
                    attachment.transport_id
                )))
            }
            // evicted without an explicit hibernate(); record the implicit transition
            ConnectionState::Active => {
                attachment.advance(socket.as_ref(), ConnectionState::Hibernated)?
            }
            ConnectionState::Hibernated => {}
        }

        let id = attachment.transport_id.clone();
        let ctx = self.dispatcher.context_for(None, Some(id.clone()));
        for plugin in &self.plugins {
            let saved = attachment.plugin_data.get(plugin.name());
            if let Err(e) = plugin.on_resume(&ctx, saved).await {
                warn!(transport_id = %id, plugin = plugin.name(), error = %e, "Resume rejected");
                return Err(self.reject(socket.as_ref(), &mut attachment, e).await);
            }
        }
        attachment.advance(socket.as_ref(), ConnectionState::Active)?;

        let transport = Arc::new(SessionTransport::new(
            attachment.transport_id.clone(),
            socket,
        ));
        transport.enqueue_message(message);
        self.start_session(transport, None);
        info!(transport_id = %attachment.transport_id, "Session resumed");
        Ok(())
    }

    /// Peer closed the socket.
    pub async fn socket_close(&self, socket: Arc<dyn Socket>, code: u16, reason: &str) -> Result<()> {
        let attachment = self.finish(socket.as_ref())?;
        if let Some(id) = attachment {
            if let Some(transport) = self.registry.remove(&id) {
                transport.mark_closed(reason);
            }
            self.sessions.lock().remove(&id);
            self.disconnected(&id);
            info!(transport_id = %id, code, reason, "Socket closed");
        }
        Ok(())
    }

    /// Socket failed. The session is aborted and the socket closed best-effort.
    pub async fn socket_error(&self, socket: Arc<dyn Socket>, error: &str) -> Result<()> {
        let attachment = self.finish(socket.as_ref())?;
        if let Some(id) = attachment {
            match self.registry.remove(&id) {
                Some(transport) => transport.abort(error).await,
                None => {
                    if let Err(e) = socket.close(INTERNAL_ERROR, truncate_reason(error)).await {
                        debug!(transport_id = %id, error = %e, "Socket close failed");
                    }
                }
            }
            self.sessions.lock().remove(&id);
            self.disconnected(&id);
            error!(transport_id = %id, error, "Socket error");
        }
        Ok(())
    }

    /// Moves the attachment to `closed`. `None` when it already was.
    fn finish(&self, socket: &dyn Socket) -> Result<Option<TransportId>> {
        let Some(mut attachment) = ConnectionAttachment::load(socket)? else {
            return Ok(None);
        };
        if attachment.state.is_terminal() {
            return Ok(None);
        }
        if attachment.state == ConnectionState::Connecting {
            attachment.advance(socket, ConnectionState::Closed)?;
            return Ok(None);
        }
        attachment.advance(socket, ConnectionState::Closed)?;
        Ok(Some(attachment.transport_id))
    }

    /// Host eviction: records `active → hibernated` on every live socket and
    /// drops all in-memory state. Sockets stay open.
    pub fn hibernate(self) {
        let transports = self.registry.clear();
        let count = transports.len();
        for transport in transports {
            let socket = transport.socket();
            match ConnectionAttachment::load(socket.as_ref()) {
                Ok(Some(mut attachment)) if attachment.state == ConnectionState::Active => {
                    if let Err(e) = attachment.advance(socket.as_ref(), ConnectionState::Hibernated) {
                        warn!(transport_id = %transport.id(), error = %e, "Attachment not updated");
                    }
                }
                Ok(_) => {}
                Err(e) => warn!(transport_id = %transport.id(), error = %e, "Attachment unreadable"),
            }
        }
        info!(actor = self.state.id(), sessions = count, "Actor hibernated");
    }

    /// Closes every socket normally and waits for the session loops to end.
    pub async fn shutdown(self) -> Result<()> {
        info!(actor = self.state.id(), "Shutting down actor...");
        for transport in self.registry.clear() {
            let socket = transport.socket().clone();
            transport.mark_closed("actor shutting down");
            self.disconnected(transport.id());
            if let Ok(Some(mut attachment)) = ConnectionAttachment::load(socket.as_ref()) {
                if !attachment.state.is_terminal() {
                    attachment.advance(socket.as_ref(), ConnectionState::Closed)?;
                }
            }
            if let Err(e) = socket.close(NORMAL_CLOSURE, "actor shutting down").await {
                debug!(transport_id = %transport.id(), error = %e, "Socket close failed");
            }
        }

        let handles: Vec<JoinHandle<()>> = self.sessions.lock().drain().map(|(_, h)| h).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                error!("Session task failed: {:?}", e);
                return Err(RpcError::execution(format!("session task failed: {e}")));
            }
        }
        info!("Actor shutdown complete.");
        Ok(())
    }
}

impl Drop for RpcActor {
    fn drop(&mut self) {
        for (_, handle) in self.sessions.get_mut().drain() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framework::mock::MockSocket;
    use crate::plugins::{AuthGate, AuthPlugin, Principal, StaticTokens};
    use serde_json::json;
    use std::time::Duration;

    struct Echo;

    fn definition() -> ActorDefinition {
        ActorDefinition::builder(Echo)
            .method("echo", 1, |_this, _ctx, args| async move {
                Ok(args.into_iter().next().unwrap_or(Value::Null))
            })
            .build()
    }

    fn actor(state: &ActorState) -> RpcActor {
        RpcActor::new(
            definition(),
            vec![],
            vec![],
            vec![],
            state.clone(),
            Environment::default(),
        )
        .unwrap()
    }

    async fn replies(socket: &MockSocket, n: usize) -> Vec<Value> {
        for _ in 0..200 {
            if socket.sent().len() >= n {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        socket.sent_json()
    }

    fn frame(id: u64, value: Value) -> String {
        json!({"id": id, "path": ["echo"], "args": [value]}).to_string()
    }

    fn state_of(socket: &MockSocket) -> String {
        socket.attachment().unwrap()["state"]
            .as_str()
            .unwrap()
            .to_string()
    }

    #[tokio::test]
    async fn accepted_socket_is_served() {
        let state = ActorState::in_memory("a");
        let actor = actor(&state);
        let socket = Arc::new(MockSocket::new());

        actor.accept_socket(socket.clone(), None).await.unwrap();
        assert_eq!(state_of(&socket), "active");
        assert_eq!(actor.connection_count(), 1);

        actor.socket_message(socket.clone(), frame(1, json!("hi"))).await.unwrap();
        assert_eq!(replies(&socket, 1).await, vec![json!({"id": 1, "result": "hi"})]);
    }

    #[tokio::test]
    async fn session_survives_hibernation() {
        let state = ActorState::in_memory("a");
        let socket = Arc::new(MockSocket::new());

        let first = actor(&state);
        let id = first.accept_socket(socket.clone(), None).await.unwrap();
        first.hibernate();
        assert_eq!(state_of(&socket), "hibernated");
        assert!(socket.closes().is_empty());

        let second = actor(&state);
        assert_eq!(second.connection_count(), 0);
        second.socket_message(socket.clone(), frame(2, json!(42))).await.unwrap();

        assert_eq!(replies(&socket, 1).await, vec![json!({"id": 2, "result": 42})]);
        assert_eq!(state_of(&socket), "active");
        assert_eq!(second.connection_count(), 1);
        assert_eq!(
            socket.attachment().unwrap()["transportId"],
            json!(id.as_str())
        );
    }

    #[tokio::test]
    async fn implicit_eviction_is_recorded_on_resume() {
        let state = ActorState::in_memory("a");
        let socket = Arc::new(MockSocket::new());

        let first = actor(&state);
        first.accept_socket(socket.clone(), None).await.unwrap();
        drop(first);
        assert_eq!(state_of(&socket), "active");

        let second = actor(&state);
        second.socket_message(socket.clone(), frame(1, json!(1))).await.unwrap();
        assert_eq!(replies(&socket, 1).await.len(), 1);
        assert_eq!(state_of(&socket), "active");
    }

    #[tokio::test]
    async fn closed_sockets_are_terminal() {
        let state = ActorState::in_memory("a");
        let actor = actor(&state);
        let socket = Arc::new(MockSocket::new());
        actor.accept_socket(socket.clone(), None).await.unwrap();

        actor.socket_close(socket.clone(), 1000, "bye").await.unwrap();
        assert_eq!(state_of(&socket), "closed");
        assert_eq!(actor.connection_count(), 0);

        let err = actor
            .socket_message(socket.clone(), frame(1, json!(1)))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "TRANSPORT_CLOSED");
    }

    #[tokio::test]
    async fn socket_error_aborts_and_closes() {
        let state = ActorState::in_memory("a");
        let actor = actor(&state);
        let socket = Arc::new(MockSocket::new());
        actor.accept_socket(socket.clone(), None).await.unwrap();

        actor.socket_error(socket.clone(), "reset by peer").await.unwrap();
        assert_eq!(state_of(&socket), "closed");
        assert_eq!(socket.closes().len(), 1);
    }

    #[tokio::test]
    async fn socket_error_without_a_session_closes_with_internal_error() {
        let state = ActorState::in_memory("a");
        let socket = Arc::new(MockSocket::new());
        let first = actor(&state);
        first.accept_socket(socket.clone(), None).await.unwrap();
        drop(first);

        let second = actor(&state);
        second.socket_error(socket.clone(), "reset by peer").await.unwrap();
        assert_eq!(socket.closes(), vec![(INTERNAL_ERROR, "reset by peer".to_string())]);
        assert_eq!(state_of(&socket), "closed");

        let failing = Arc::new(MockSocket::new());
        let third = actor(&state);
        third.accept_socket(failing.clone(), None).await.unwrap();
        drop(third);
        failing.fail_close();
        assert!(actor(&state).socket_error(failing.clone(), "gone").await.is_ok());
    }

    fn authed_actor(state: &ActorState) -> RpcActor {
        let auth = AuthPlugin::new(Arc::new(
            StaticTokens::new().with_token("good", Principal::new("ada")),
        ));
        RpcActor::new(
            definition(),
            vec![Arc::new(auth)],
            vec![],
            vec![],
            state.clone(),
            Environment::default(),
        )
        .unwrap()
    }

    fn upgrade() -> RequestInfo {
        RequestInfo::new("GET", "/ws").with_header("authorization", "Bearer good")
    }

    fn gate_of(actor: &RpcActor) -> AuthGate {
        actor
            .dispatcher
            .context_for(None, None)
            .require::<AuthGate>("auth")
            .unwrap()
            .clone()
    }

    #[tokio::test]
    async fn ended_sockets_release_their_principals() {
        let state = ActorState::in_memory("a");
        let actor = authed_actor(&state);
        let gate = gate_of(&actor);

        let mut sockets = Vec::new();
        for _ in 0..5 {
            let socket = Arc::new(MockSocket::new());
            actor.accept_socket(socket.clone(), Some(upgrade())).await.unwrap();
            sockets.push(socket);
        }
        assert_eq!(gate.session_count(), 5);

        for socket in &sockets[..4] {
            actor.socket_close(socket.clone(), 1000, "bye").await.unwrap();
        }
        actor.socket_error(sockets[4].clone(), "reset").await.unwrap();

        assert_eq!(actor.connection_count(), 0);
        assert_eq!(gate.session_count(), 0);
    }

    #[tokio::test]
    async fn shutdown_releases_principals() {
        let state = ActorState::in_memory("a");
        let actor = authed_actor(&state);
        let gate = gate_of(&actor);
        actor
            .accept_socket(Arc::new(MockSocket::new()), Some(upgrade()))
            .await
            .unwrap();

        actor.shutdown().await.unwrap();
        assert_eq!(gate.session_count(), 0);
    }

    #[tokio::test]
    async fn authenticated_socket_keeps_its_principal_across_hibernation() {
        let state = ActorState::in_memory("a");
        let socket = Arc::new(MockSocket::new());

        let first = authed_actor(&state);
        first.accept_socket(socket.clone(), Some(upgrade())).await.unwrap();
        first.hibernate();

        let second = authed_actor(&state);
        let whoami = json!({"id": 1, "path": ["auth", "whoami"], "args": []}).to_string();
        second.socket_message(socket.clone(), whoami).await.unwrap();

        assert_eq!(
            replies(&socket, 1).await,
            vec![json!({"id": 1, "result": {"subject": "ada", "claims": {}}})]
        );
        assert_eq!(gate_of(&second).session_count(), 1);
    }

    #[tokio::test]
    async fn resume_without_a_stored_principal_is_rejected() {
        let state = ActorState::in_memory("a");
        let socket = Arc::new(MockSocket::new());

        // accepted while the actor had no auth plugin
        let first = actor(&state);
        first.accept_socket(socket.clone(), None).await.unwrap();
        first.hibernate();

        let second = authed_actor(&state);
        let err = second
            .socket_message(socket.clone(), frame(1, json!(1)))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "UNAUTHORIZED");
        assert_eq!(state_of(&socket), "closed");
        assert_eq!(socket.closes()[0].0, POLICY_VIOLATION);
        assert_eq!(second.connection_count(), 0);
    }

    #[tokio::test]
    async fn rejected_connect_closes_the_socket() {
        let state = ActorState::in_memory("a");
        let auth = AuthPlugin::new(Arc::new(
            StaticTokens::new().with_token("good", Principal::new("ada")),
        ));
        let actor = RpcActor::new(
            definition(),
            vec![Arc::new(auth)],
            vec![],
            vec![],
            state,
            Environment::default(),
        )
        .unwrap();
        let socket = Arc::new(MockSocket::new());

        let err = actor.accept_socket(socket.clone(), None).await.unwrap_err();
        assert_eq!(err.code(), "UNAUTHORIZED");
        assert_eq!(state_of(&socket), "closed");
        assert_eq!(socket.closes()[0].0, POLICY_VIOLATION);
        assert_eq!(actor.connection_count(), 0);
    }

    #[tokio::test]
    async fn broadcast_reaches_accepted_sockets() {
        let state = ActorState::in_memory("a");
        let actor = actor(&state);
        let a = Arc::new(MockSocket::new());
        let b = Arc::new(MockSocket::new());
        actor.accept_socket(a.clone(), None).await.unwrap();
        actor.accept_socket(b.clone(), None).await.unwrap();

        assert_eq!(actor.broadcaster().broadcast("tick").await, 2);
        assert_eq!(a.sent(), vec!["tick"]);
        assert_eq!(b.sent(), vec!["tick"]);
    }

    #[tokio::test]
    async fn shutdown_closes_every_socket() {
        let state = ActorState::in_memory("a");
        let actor = actor(&state);
        let socket = Arc::new(MockSocket::new());
        actor.accept_socket(socket.clone(), None).await.unwrap();

        actor.shutdown().await.unwrap();
        assert_eq!(socket.closes(), vec![(NORMAL_CLOSURE, "actor shutting down".to_string())]);
        assert_eq!(state_of(&socket), "closed");
    }
}
