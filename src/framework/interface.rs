//! # Interface Exposure
//!
//! Remote callers never see an actor directly. They see an
//! [`ExposedInterface`]: a read-only map from method name (or
//! `namespace.method`) to a bound, middleware-wrapped callable.
//!
//! ## Declaring the surface
//!
//! Methods are registered explicitly through [`ActorDefinition::builder`],
//! each bound to the actor instance:
//!
//! ```rust,ignore
//! let definition = ActorDefinition::builder(Counter::default())
//!     .method("add", 2, |this, _ctx, args| async move { this.add(&args) })
//!     .namespace("admin", AdminPanel::new(), |ns| {
//!         ns.method("reset", 0, |panel, _ctx, _args| async move { panel.reset() })
//!           .data("label")
//!     })
//!     .build();
//! ```
//!
//! A definition may [`extend`](DefinitionBuilder::extend) a parent definition.
//! The parent's members form the next layer of the chain, and plugins
//! contribute further layers after that. The framework base sits past the last
//! layer and is never walked.
//!
//! ## Enumeration rules
//!
//! Layers are walked nearest first; the first occurrence of a name wins. A name
//! is hidden when it is in the skip-set, starts with [`INTERNAL_PREFIX`] or
//! starts with [`PRIVATE_PREFIX`]. Data members are never exposed but still
//! shadow deeper members of the same name. A namespace is exposed only when it
//! has at least one callable member; its data members are dropped.

use crate::framework::context::RpcContext;
use crate::framework::middleware::{self, Middleware};
use crate::framework::schema::{MethodSchema, NamespaceSchema, SchemaDescriptor};
use crate::framework::{Result, RpcError};
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// Prefix of protocol-level methods dispatched outside the pipeline.
pub const INTERNAL_PREFIX: &str = "__";

/// Prefix marking members that are never exposed.
pub const PRIVATE_PREFIX: &str = "_";

/// Reflection method that is always present on the exposed surface.
pub const SCHEMA_METHOD: &str = "getSchema";

/// Entry points of the host actor itself; never remotely callable.
pub const BASE_RESERVED: &[&str] = &[
    SCHEMA_METHOD,
    "fetch",
    "alarm",
    "call",
    "accept_socket",
    "socket_message",
    "socket_close",
    "socket_error",
    "hibernate",
];

/// A type-erased, callable method: `(context, args) -> result`.
pub type MethodFn =
    Arc<dyn Fn(RpcContext, Vec<Value>) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Boxes an async closure into a [`MethodFn`].
pub fn method_fn<F, Fut>(f: F) -> MethodFn
where
    F: Fn(RpcContext, Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    Arc::new(
        move |ctx: RpcContext, args: Vec<Value>| -> BoxFuture<'static, Result<Value>> {
            Box::pin(f(ctx, args))
        },
    )
}

/// Decodes positional argument `index`.
pub fn arg<T: DeserializeOwned>(args: &[Value], index: usize) -> Result<T> {
    let value = args
        .get(index)
        .ok_or_else(|| RpcError::Validation(format!("missing argument {index}")))?;
    serde_json::from_value(value.clone())
        .map_err(|e| RpcError::Validation(format!("argument {index}: {e}")))
}

/// Decodes positional argument `index`, treating absence or `null` as `None`.
pub fn opt_arg<T: DeserializeOwned>(args: &[Value], index: usize) -> Result<Option<T>> {
    match args.get(index) {
        None | Some(Value::Null) => Ok(None),
        Some(_) => arg(args, index).map(Some),
    }
}

#[derive(Clone)]
pub struct MethodDef {
    name: String,
    param_count: usize,
    handler: MethodFn,
}

impl MethodDef {
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Clone)]
enum NamespaceMember {
    Method(MethodDef),
    Data(String),
}

#[derive(Clone)]
pub struct NamespaceDef {
    name: String,
    members: Vec<NamespaceMember>,
}

/// One named member of an actor's surface.
#[derive(Clone)]
pub enum Member {
    Method(MethodDef),
    Namespace(NamespaceDef),
    /// A non-callable property. Never exposed.
    Data(String),
}

impl Member {
    /// An unbound method; plugins use this for their contributed members.
    pub fn method<F, Fut>(name: impl Into<String>, param_count: usize, f: F) -> Self
    where
        F: Fn(RpcContext, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Member::Method(MethodDef {
            name: name.into(),
            param_count,
            handler: method_fn(f),
        })
    }

    pub fn data(name: impl Into<String>) -> Self {
        Member::Data(name.into())
    }

    /// A namespace whose methods are bound to `target`.
    pub fn namespace<N, B>(name: impl Into<String>, target: N, build: B) -> Self
    where
        N: Send + Sync + 'static,
        B: FnOnce(NamespaceBuilder<N>) -> NamespaceBuilder<N>,
    {
        let builder = build(NamespaceBuilder {
            target: Arc::new(target),
            members: Vec::new(),
        });
        Member::Namespace(NamespaceDef {
            name: name.into(),
            members: builder.members,
        })
    }

    pub fn name(&self) -> &str {
        match self {
            Member::Method(m) => &m.name,
            Member::Namespace(ns) => &ns.name,
            Member::Data(name) => name,
        }
    }
}

/// Builds the members of one namespace object.
pub struct NamespaceBuilder<N> {
    target: Arc<N>,
    members: Vec<NamespaceMember>,
}

impl<N: Send + Sync + 'static> NamespaceBuilder<N> {
    pub fn method<F, Fut>(mut self, name: impl Into<String>, param_count: usize, f: F) -> Self
    where
        F: Fn(Arc<N>, RpcContext, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let target = self.target.clone();
        self.members.push(NamespaceMember::Method(MethodDef {
            name: name.into(),
            param_count,
            handler: method_fn(move |ctx, args| f(target.clone(), ctx, args)),
        }));
        self
    }

    pub fn data(mut self, name: impl Into<String>) -> Self {
        self.members.push(NamespaceMember::Data(name.into()));
        self
    }
}

/// One level of the member chain.
#[derive(Clone, Default)]
pub struct Layer {
    members: Vec<Member>,
}

impl Layer {
    pub fn new(members: Vec<Member>) -> Self {
        Self { members }
    }
}

/// The declared surface of an actor: its own members followed by inherited layers.
#[derive(Clone, Default)]
pub struct ActorDefinition {
    layers: Vec<Layer>,
}

impl ActorDefinition {
    pub fn builder<S: Send + Sync + 'static>(instance: S) -> DefinitionBuilder<S> {
        DefinitionBuilder {
            instance: Arc::new(instance),
            own: Vec::new(),
            parents: Vec::new(),
        }
    }

    /// A definition with no members at all.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }
}

pub struct DefinitionBuilder<S> {
    instance: Arc<S>,
    own: Vec<Member>,
    parents: Vec<Layer>,
}

impl<S: Send + Sync + 'static> DefinitionBuilder<S> {
    /// Registers a method bound to the actor instance.
    pub fn method<F, Fut>(mut self, name: impl Into<String>, param_count: usize, f: F) -> Self
    where
        F: Fn(Arc<S>, RpcContext, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let this = self.instance.clone();
        self.own.push(Member::method(name, param_count, move |ctx, args| {
            f(this.clone(), ctx, args)
        }));
        self
    }

    pub fn data(mut self, name: impl Into<String>) -> Self {
        self.own.push(Member::data(name));
        self
    }

    pub fn namespace<N, B>(mut self, name: impl Into<String>, target: N, build: B) -> Self
    where
        N: Send + Sync + 'static,
        B: FnOnce(NamespaceBuilder<N>) -> NamespaceBuilder<N>,
    {
        self.own.push(Member::namespace(name, target, build));
        self
    }

    pub fn member(mut self, member: Member) -> Self {
        self.own.push(member);
        self
    }

    /// Appends `parent`'s layers behind this definition's own members.
    pub fn extend(mut self, parent: ActorDefinition) -> Self {
        self.parents.extend(parent.layers);
        self
    }

    pub fn build(self) -> ActorDefinition {
        let mut layers = vec![Layer::new(self.own)];
        layers.extend(self.parents);
        ActorDefinition { layers }
    }
}

/// Names excluded from exposure.
#[derive(Debug, Clone)]
pub struct SkipSet {
    names: HashSet<String>,
}

impl Default for SkipSet {
    fn default() -> Self {
        Self {
            names: BASE_RESERVED.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl SkipSet {
    pub fn extend<I, T>(&mut self, names: I)
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.names.extend(names.into_iter().map(Into::into));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// True when `name` must not appear on the exposed surface.
    pub fn hides(&self, name: &str) -> bool {
        self.contains(name) || is_hidden_name(name)
    }
}

fn is_hidden_name(name: &str) -> bool {
    name.starts_with(INTERNAL_PREFIX) || name.starts_with(PRIVATE_PREFIX)
}

/// Flat and namespaced methods found by walking the layers.
#[derive(Default)]
pub struct Collected {
    pub methods: Vec<MethodDef>,
    pub namespaces: Vec<(String, Vec<MethodDef>)>,
}

/// Walks `layers` nearest first and collects the exposable members.
pub fn collect(layers: &[Layer], skip: &SkipSet) -> Collected {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut out = Collected::default();

    for layer in layers {
        for member in &layer.members {
            let name = member.name();
            if seen.contains(name) || skip.hides(name) {
                continue;
            }
            seen.insert(name);

            match member {
                Member::Method(def) => out.methods.push(def.clone()),
                Member::Namespace(ns) => {
                    let callables: Vec<MethodDef> = ns
                        .members
                        .iter()
                        .filter_map(|m| match m {
                            NamespaceMember::Method(def) if !is_hidden_name(&def.name) => {
                                Some(def.clone())
                            }
                            _ => None,
                        })
                        .collect();
                    if callables.is_empty() {
                        debug!(namespace = %ns.name, "No callable members, not a namespace");
                        continue;
                    }
                    for member in &ns.members {
                        if let NamespaceMember::Data(field) = member {
                            debug!(namespace = %ns.name, %field, "Omitting data member");
                        }
                    }
                    out.namespaces.push((ns.name.clone(), callables));
                }
                Member::Data(_) => {}
            }
        }
    }
    out
}

/// A bound, wrapped method on the exposed surface.
#[derive(Clone)]
pub struct ExposedMethod {
    pub param_count: usize,
    handler: MethodFn,
}

impl ExposedMethod {
    pub async fn invoke(&self, ctx: RpcContext, args: Vec<Value>) -> Result<Value> {
        (self.handler)(ctx, args).await
    }
}

/// The externally callable surface of one actor instance.
pub struct ExposedInterface {
    methods: BTreeMap<String, ExposedMethod>,
    namespaces: BTreeMap<String, BTreeMap<String, ExposedMethod>>,
    schema: Arc<SchemaDescriptor>,
}

impl ExposedInterface {
    /// Collects `layers`, derives the schema and wraps every callable with `hooks`.
    pub fn build(layers: &[Layer], skip: &SkipSet, hooks: &[Arc<dyn Middleware>]) -> Self {
        let collected = collect(layers, skip);

        let schema = Arc::new(SchemaDescriptor::new(
            collected
                .methods
                .iter()
                .map(|m| MethodSchema {
                    name: m.name.clone(),
                    param_count: m.param_count,
                })
                .collect(),
            collected
                .namespaces
                .iter()
                .map(|(name, methods)| NamespaceSchema {
                    name: name.clone(),
                    methods: methods
                        .iter()
                        .map(|m| MethodSchema {
                            name: m.name.clone(),
                            param_count: m.param_count,
                        })
                        .collect(),
                })
                .collect(),
        ));

        let expose = |qualified: &str, def: &MethodDef| ExposedMethod {
            param_count: def.param_count,
            handler: middleware::wrap(qualified, def.handler.clone(), hooks),
        };

        let mut methods: BTreeMap<String, ExposedMethod> = collected
            .methods
            .iter()
            .map(|m| (m.name.clone(), expose(&m.name, m)))
            .collect();

        let namespaces = collected
            .namespaces
            .iter()
            .map(|(ns, defs)| {
                let members = defs
                    .iter()
                    .map(|m| (m.name.clone(), expose(&format!("{ns}.{}", m.name), m)))
                    .collect();
                (ns.clone(), members)
            })
            .collect();

        let reflected = schema.clone();
        let reflection = MethodDef {
            name: SCHEMA_METHOD.to_string(),
            param_count: 0,
            handler: method_fn(move |_ctx, _args| {
                let schema = reflected.clone();
                async move { Ok(serde_json::to_value(&*schema)?) }
            }),
        };
        methods.insert(SCHEMA_METHOD.to_string(), expose(SCHEMA_METHOD, &reflection));

        Self {
            methods,
            namespaces,
            schema,
        }
    }

    pub fn schema(&self) -> &SchemaDescriptor {
        &self.schema
    }

    pub fn method(&self, name: &str) -> Option<&ExposedMethod> {
        self.methods.get(name)
    }

    pub fn namespace(&self, name: &str) -> Option<&BTreeMap<String, ExposedMethod>> {
        self.namespaces.get(name)
    }

    /// Resolves `["method"]` or `["namespace", "method"]`.
    pub fn resolve(&self, path: &[String]) -> Option<&ExposedMethod> {
        match path {
            [name] => self.methods.get(name),
            [ns, name] => self.namespaces.get(ns).and_then(|m| m.get(name)),
            _ => None,
        }
    }

    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }
}
