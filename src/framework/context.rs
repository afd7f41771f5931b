//! # Composed Context
//!
//! Every exposed method receives an [`RpcContext`] as its first argument. It
//! carries the actor's base fields (state handle, environment bindings, the
//! current request, a broadcast capability and the connection count) plus the
//! fields contributed by each plugin.
//!
//! Plugin fields live in a typed extension map keyed by field name, so the
//! actor depends on the *shape* of the merged context, never on concrete
//! plugin types:
//!
//! ```rust,ignore
//! let sql: &SqlHandle = ctx.require("sql")?;
//! ```

use crate::framework::{Result, RpcError};
use crate::storage::ActorState;
use crate::transport::{Broadcaster, TransportId};
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Environment bindings visible to the actor.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    vars: Arc<BTreeMap<String, String>>,
}

impl Environment {
    pub fn new(vars: BTreeMap<String, String>) -> Self {
        Self { vars: Arc::new(vars) }
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self::new(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }
}

/// The request that triggered the current call, if any.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestInfo {
    pub method: String,
    pub path: String,
    headers: BTreeMap<String, String>,
}

impl RequestInfo {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            headers: BTreeMap::new(),
        }
    }

    /// Header names are stored lowercased.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Token from an `Authorization: Bearer <token>` header.
    pub fn bearer_token(&self) -> Option<&str> {
        self.header("authorization")
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

/// Input handed to every plugin's `init`.
#[derive(Debug, Clone)]
pub struct InitContext {
    pub state: ActorState,
    pub env: Environment,
}

type Field = Arc<dyn Any + Send + Sync>;

/// The set of context fields one plugin contributes.
#[derive(Default)]
pub struct ContextExtension {
    pub(crate) fields: Vec<(String, Field)>,
}

impl ContextExtension {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<T: Any + Send + Sync>(mut self, name: impl Into<String>, value: T) -> Self {
        self.fields.push((name.into(), Arc::new(value)));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// The merged, per-call argument made of base fields and plugin fields.
#[derive(Clone)]
pub struct RpcContext {
    pub state: ActorState,
    pub env: Environment,
    pub broadcast: Broadcaster,
    pub request: Option<RequestInfo>,
    pub connection_count: usize,
    pub caller: Option<TransportId>,
    fields: Arc<BTreeMap<String, Field>>,
}

impl RpcContext {
    pub(crate) fn new(
        state: ActorState,
        env: Environment,
        broadcast: Broadcaster,
        fields: BTreeMap<String, Field>,
    ) -> Self {
        Self {
            state,
            env,
            broadcast,
            request: None,
            connection_count: 0,
            caller: None,
            fields: Arc::new(fields),
        }
    }

    /// Clone of the composed context carrying call-time values.
    pub fn for_call(
        &self,
        request: Option<RequestInfo>,
        connection_count: usize,
        caller: Option<TransportId>,
    ) -> Self {
        Self {
            request,
            connection_count,
            caller,
            ..self.clone()
        }
    }

    pub fn has(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn get<T: Any + Send + Sync>(&self, name: &str) -> Option<&T> {
        self.fields.get(name).and_then(|f| f.downcast_ref::<T>())
    }

    /// Like [`get`](Self::get), failing fast when the capability is missing.
    pub fn require<T: Any + Send + Sync>(&self, name: &str) -> Result<&T> {
        self.get(name).ok_or_else(|| {
            RpcError::Configuration(format!("context field '{name}' is not configured"))
        })
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for RpcContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcContext")
            .field("actor", &self.state.id())
            .field("fields", &self.fields.keys().collect::<Vec<_>>())
            .field("connection_count", &self.connection_count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_token_requires_scheme_and_value() {
        let req = RequestInfo::new("POST", "/rpc").with_header("Authorization", "Bearer abc");
        assert_eq!(req.bearer_token(), Some("abc"));

        let basic = RequestInfo::new("POST", "/rpc").with_header("authorization", "Basic abc");
        assert_eq!(basic.bearer_token(), None);

        let empty = RequestInfo::new("POST", "/rpc").with_header("authorization", "Bearer ");
        assert_eq!(empty.bearer_token(), None);
    }

    #[test]
    fn typed_field_lookup() {
        let mut fields: BTreeMap<String, Field> = BTreeMap::new();
        fields.insert("answer".into(), Arc::new(42u32));
        let ctx = RpcContext::new(
            ActorState::in_memory("a"),
            Environment::default(),
            Broadcaster::default(),
            fields,
        );

        assert_eq!(ctx.get::<u32>("answer"), Some(&42));
        assert!(ctx.get::<String>("answer").is_none());
        assert!(ctx.require::<u32>("missing").is_err());
    }
}
