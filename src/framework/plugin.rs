//! # Plugins & Context Composition
//!
//! A [`Plugin`] is an independent capability module (SQL, storage,
//! collections, auth, locality, ...). Each one may contribute:
//!
//! - context fields, produced by [`Plugin::init`],
//! - externally callable members ([`Plugin::members`]),
//! - internal reserved methods ([`Plugin::internal_methods`]),
//! - middleware hooks ([`Plugin::middleware`]),
//! - names to hide from introspection ([`Plugin::skip_names`]),
//! - per-socket hooks: [`Plugin::on_connect`], [`Plugin::on_resume`] and
//!   [`Plugin::on_disconnect`],
//! - a post-initialization cross-plugin [`setup`](Plugin::setup).
//!
//! [`compose`] initializes plugins in declaration order and merges everything
//! into a single [`Composition`]. `init` sees only the [`InitContext`]; any
//! coordination between plugins waits for `setup`, which receives the fully
//! merged context.
//!
//! Two plugins contributing the same context field is a configuration error,
//! reported at composition time.

use crate::framework::context::{ContextExtension, InitContext, RequestInfo, RpcContext};
use crate::framework::interface::{Layer, Member, MethodFn, SkipSet};
use crate::framework::internal::InternalMethods;
use crate::framework::middleware::Middleware;
use crate::framework::{Result, RpcError};
use crate::transport::{Broadcaster, TransportId};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

/// Field names owned by the base context.
pub const BASE_FIELDS: &[&str] = &[
    "state",
    "env",
    "request",
    "broadcast",
    "connectionCount",
];

#[async_trait]
pub trait Plugin: Send + Sync + 'static {
    /// Unique plugin name.
    fn name(&self) -> &str;

    /// Produces this plugin's context fields. Called exactly once per actor.
    fn init(&self, ctx: &InitContext) -> Result<ContextExtension>;

    fn members(&self) -> Vec<Member> {
        Vec::new()
    }

    fn internal_methods(&self) -> Vec<(&'static str, MethodFn)> {
        Vec::new()
    }

    fn middleware(&self) -> Vec<Arc<dyn Middleware>> {
        Vec::new()
    }

    fn skip_names(&self) -> Vec<String> {
        Vec::new()
    }

    /// Runs when a socket is accepted. An error rejects the connection.
    ///
    /// A returned value is stored in the socket's attachment under this
    /// plugin's name and handed back to [`on_resume`](Plugin::on_resume).
    async fn on_connect(
        &self,
        _ctx: &RpcContext,
        _request: Option<&RequestInfo>,
    ) -> Result<Option<Value>> {
        Ok(None)
    }

    /// Runs when a hibernated socket is resumed by a new actor instance.
    /// An error closes the socket.
    async fn on_resume(&self, _ctx: &RpcContext, _saved: Option<&Value>) -> Result<()> {
        Ok(())
    }

    /// Runs once when a socket session ends through close, error or shutdown.
    fn on_disconnect(&self, _id: &TransportId) {}

    /// Runs once after every plugin has been initialized.
    fn setup(&self, _ctx: &RpcContext) -> Result<()> {
        Ok(())
    }
}

/// Everything an actor needs after plugin composition.
pub struct Composition {
    pub context: RpcContext,
    pub internal: InternalMethods,
    /// Plugin middleware first, then caller-supplied middleware.
    pub middleware: Vec<Arc<dyn Middleware>>,
    pub skip: SkipSet,
    /// One layer per plugin that contributes members, in declaration order.
    pub layers: Vec<Layer>,
    pub plugins: Vec<Arc<dyn Plugin>>,
}

/// Composes `plugins` over the actor's base context.
pub fn compose(
    plugins: Vec<Arc<dyn Plugin>>,
    init: InitContext,
    broadcast: Broadcaster,
    middleware: Vec<Arc<dyn Middleware>>,
    extra_skip: Vec<String>,
) -> Result<Composition> {
    let mut names = HashSet::new();
    for plugin in &plugins {
        if !names.insert(plugin.name().to_string()) {
            return Err(RpcError::Configuration(format!(
                "plugin '{}' is registered twice",
                plugin.name()
            )));
        }
    }

    let mut owners: HashMap<String, String> = BASE_FIELDS
        .iter()
        .map(|f| (f.to_string(), "base context".to_string()))
        .collect();
    let mut fields = BTreeMap::new();
    let mut internal = InternalMethods::default();
    let mut hooks: Vec<Arc<dyn Middleware>> = Vec::new();
    let mut skip = SkipSet::default();
    let mut layers = Vec::new();

    for plugin in &plugins {
        let name = plugin.name();
        let extension = plugin.init(&init)?;
        let contributed = extension.fields.len();
        for (field, value) in extension.fields {
            if let Some(owner) = owners.get(&field) {
                return Err(RpcError::Configuration(format!(
                    "context field '{field}' from plugin '{name}' collides with {owner}"
                )));
            }
            owners.insert(field.clone(), format!("plugin '{name}'"));
            fields.insert(field, value);
        }

        for (method, handler) in plugin.internal_methods() {
            internal.register(method, handler)?;
        }

        hooks.extend(plugin.middleware());
        skip.extend(plugin.skip_names());

        let members = plugin.members();
        if !members.is_empty() {
            layers.push(Layer::new(members));
        }

        info!(plugin = name, fields = contributed, "Plugin initialized");
    }

    hooks.extend(middleware);
    skip.extend(extra_skip);

    let context = RpcContext::new(init.state, init.env, broadcast, fields);
    for plugin in &plugins {
        plugin.setup(&context)?;
        debug!(plugin = plugin.name(), "Plugin setup complete");
    }

    Ok(Composition {
        context,
        internal,
        middleware: hooks,
        skip,
        layers,
        plugins,
    })
}
