//! Composable RPC runtime.
//!
//! This module provides the building blocks that turn an actor into a remotely
//! callable, introspectable endpoint.
//!
//! # Main Components
//!
//! - [`Plugin`] / [`compose`] - capability modules merged into one [`RpcContext`]
//! - [`ActorDefinition`] / [`ExposedInterface`] - the declared and the exposed method surface
//! - [`Middleware`] / [`wrap`] - ordered hooks around every exposed call
//! - [`SchemaDescriptor`] - versioned description of the exposed surface
//! - [`InternalMethods`] - reserved protocol primitives, dispatched without middleware
//! - [`RpcError`] - common error type
//!
//! # Testing
//!
//! See [`mock`] module for an in-memory socket and a scriptable storage engine.

pub mod context;
pub mod error;
pub mod interface;
pub mod internal;
pub mod middleware;
pub mod mock;
pub mod plugin;
pub mod schema;

pub use context::{ContextExtension, Environment, InitContext, RequestInfo, RpcContext};
pub use error::{ErrorBody, Result, RpcError};
pub use interface::{
    arg, method_fn, opt_arg, ActorDefinition, ExposedInterface, ExposedMethod, Member, MethodFn,
    SkipSet, INTERNAL_PREFIX, PRIVATE_PREFIX, SCHEMA_METHOD,
};
pub use internal::InternalMethods;
pub use middleware::{wrap, CallInfo, LoggingMiddleware, Middleware, TimingMiddleware};
pub use plugin::{compose, Composition, Plugin};
pub use schema::{MethodSchema, NamespaceSchema, SchemaDescriptor, SCHEMA_VERSION};
