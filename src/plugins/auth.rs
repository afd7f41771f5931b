//! # Auth Plugin
//!
//! Bearer-token gate. Token validation itself is delegated to a
//! [`TokenVerifier`]; the plugin only wires the hook points:
//!
//! - [`RequireAuth`] middleware rejects unauthenticated HTTP and in-process calls,
//! - the connect hook rejects unauthenticated sockets, so calls arriving on an
//!   accepted socket are already trusted,
//! - the socket's principal is stored in its attachment and restored when a
//!   hibernated socket resumes, and forgotten when the socket goes away,
//! - `auth.whoami` reports the caller's principal.

use crate::framework::{
    CallInfo, ContextExtension, InitContext, Member, Middleware, Plugin, RequestInfo, Result,
    RpcContext, RpcError, SCHEMA_METHOD,
};
use crate::transport::TransportId;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

pub const FIELD: &str = "auth";

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Principal {
    pub subject: String,
    #[serde(default)]
    pub claims: BTreeMap<String, Value>,
}

impl Principal {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            claims: BTreeMap::new(),
        }
    }
}

#[async_trait]
pub trait TokenVerifier: Send + Sync + 'static {
    /// `Ok(None)` for a well-formed but unknown token.
    async fn verify(&self, token: &str) -> Result<Option<Principal>>;
}

/// Fixed token table.
#[derive(Debug, Default)]
pub struct StaticTokens {
    tokens: HashMap<String, Principal>,
}

impl StaticTokens {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: impl Into<String>, principal: Principal) -> Self {
        self.tokens.insert(token.into(), principal);
        self
    }
}

#[async_trait]
impl TokenVerifier for StaticTokens {
    async fn verify(&self, token: &str) -> Result<Option<Principal>> {
        Ok(self.tokens.get(token).cloned())
    }
}

/// The `auth` context field.
#[derive(Clone)]
pub struct AuthGate {
    verifier: Arc<dyn TokenVerifier>,
    sessions: Arc<RwLock<HashMap<TransportId, Principal>>>,
}

impl std::fmt::Debug for AuthGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthGate")
            .field("sessions", &self.sessions.read().len())
            .finish()
    }
}

impl AuthGate {
    pub fn new(verifier: Arc<dyn TokenVerifier>) -> Self {
        Self {
            verifier,
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn authenticate(&self, request: Option<&RequestInfo>) -> Result<Principal> {
        let token = request
            .and_then(RequestInfo::bearer_token)
            .ok_or_else(|| RpcError::Unauthorized("missing bearer token".into()))?;
        self.verifier
            .verify(token)
            .await?
            .ok_or_else(|| RpcError::Unauthorized("invalid token".into()))
    }

    /// Principal of the current call: from its request, else from its socket session.
    pub async fn principal(&self, ctx: &RpcContext) -> Result<Principal> {
        if ctx.request.is_some() {
            return self.authenticate(ctx.request.as_ref()).await;
        }
        ctx.caller
            .as_ref()
            .and_then(|id| self.sessions.read().get(id).cloned())
            .ok_or_else(|| RpcError::Unauthorized("unauthenticated caller".into()))
    }

    pub fn remember(&self, id: TransportId, principal: Principal) {
        self.sessions.write().insert(id, principal);
    }

    pub fn forget(&self, id: &TransportId) {
        self.sessions.write().remove(id);
    }

    /// Number of socket sessions with a known principal.
    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }
}

/// Rejects calls without a valid bearer token. Socket calls pass through.
pub struct RequireAuth {
    gate: AuthGate,
    public: HashSet<String>,
}

impl RequireAuth {
    pub fn new(gate: AuthGate) -> Self {
        Self {
            gate,
            public: HashSet::from([SCHEMA_METHOD.to_string()]),
        }
    }

    /// Lets `method` through without credentials.
    pub fn allow(mut self, method: impl Into<String>) -> Self {
        self.public.insert(method.into());
        self
    }
}

#[async_trait]
impl Middleware for RequireAuth {
    fn name(&self) -> &str {
        "require-auth"
    }

    async fn on_request(&self, call: &CallInfo) -> Result<()> {
        if self.public.contains(&call.method) || call.context.caller.is_some() {
            return Ok(());
        }
        let principal = self.gate.authenticate(call.context.request.as_ref()).await?;
        debug!(method = %call.method, subject = %principal.subject, "Call authorized");
        Ok(())
    }
}

pub struct AuthPlugin {
    gate: AuthGate,
    public: Vec<String>,
}

impl AuthPlugin {
    pub fn new(verifier: Arc<dyn TokenVerifier>) -> Self {
        Self {
            gate: AuthGate::new(verifier),
            public: Vec::new(),
        }
    }

    /// Methods callable without credentials, besides the schema.
    pub fn allow(mut self, method: impl Into<String>) -> Self {
        self.public.push(method.into());
        self
    }
}

#[async_trait]
impl Plugin for AuthPlugin {
    fn name(&self) -> &str {
        "auth"
    }

    fn init(&self, _ctx: &InitContext) -> Result<ContextExtension> {
        Ok(ContextExtension::new().with(FIELD, self.gate.clone()))
    }

    fn members(&self) -> Vec<Member> {
        vec![Member::namespace("auth", self.gate.clone(), |ns| {
            ns.method("whoami", 0, |gate, ctx, _args| async move {
                Ok(serde_json::to_value(gate.principal(&ctx).await?)?)
            })
        })]
    }

    fn middleware(&self) -> Vec<Arc<dyn Middleware>> {
        let hook = self
            .public
            .iter()
            .fold(RequireAuth::new(self.gate.clone()), |hook, m| hook.allow(m.clone()));
        vec![Arc::new(hook)]
    }

    async fn on_connect(
        &self,
        ctx: &RpcContext,
        request: Option<&RequestInfo>,
    ) -> Result<Option<Value>> {
        let principal = self.gate.authenticate(request).await?;
        info!(subject = %principal.subject, "Socket authenticated");
        let saved = serde_json::to_value(&principal)?;
        if let Some(id) = &ctx.caller {
            self.gate.remember(id.clone(), principal);
        }
        Ok(Some(saved))
    }

    async fn on_resume(&self, ctx: &RpcContext, saved: Option<&Value>) -> Result<()> {
        let saved =
            saved.ok_or_else(|| RpcError::Unauthorized("socket has no stored principal".into()))?;
        let principal: Principal = serde_json::from_value(saved.clone())?;
        if let Some(id) = &ctx.caller {
            debug!(transport_id = %id, subject = %principal.subject, "Principal restored");
            self.gate.remember(id.clone(), principal);
        }
        Ok(())
    }

    fn on_disconnect(&self, id: &TransportId) {
        self.gate.forget(id);
    }
}
