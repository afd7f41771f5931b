#![doc(html_logo_url = "https://www.rust-lang.org/logos/rust-logo-128x128.png")]
#![doc(html_favicon_url = "https://www.rust-lang.org/favicon.ico")]
//! # Actor RPC
//!
//! > **A composable RPC runtime for a single stateful, hibernatable actor.**
//!
//! An actor declares methods, data members and namespaces. Plugins contribute context
//! fields, internal `__` primitives and lifecycle hooks. The composed actor is exposed
//! over one-shot HTTP calls and long-lived socket sessions that survive hibernation.
//!
//! ## 🏗️ Design Philosophy
//!
//! ### Composition over inheritance
//! Every capability (SQL, key-value storage, document collections, auth, locality) is a
//! [`Plugin`](framework::Plugin). Composition runs once when the actor starts and produces
//! one immutable [`Composition`](framework::Composition): the merged context, the internal
//! method table, the middleware chain and the skip set. Two plugins claiming the same
//! context field is a configuration error, not a silent override.
//!
//! ### One wire shape, two surfaces
//! A call is a path plus positional JSON arguments. HTTP carries `{method, args}` and answers
//! `{result}` or `{error: {code, message}}`; sockets carry [`RpcRequest`](protocol::RpcRequest)
//! frames and answer [`RpcResponse`](protocol::RpcResponse) frames with the same error body.
//!
//! ### Hibernation is ordinary
//! A socket session keeps nothing in memory that cannot be rebuilt. Its
//! [`ConnectionAttachment`](transport::ConnectionAttachment) is persisted on every state
//! transition, so the first frame after a wake-up rebuilds the session under the same
//! transport id.
//!
//! ### Observability
//! We use `tracing` everywhere with structured fields. [`LoggingMiddleware`](framework::LoggingMiddleware)
//! and [`TimingMiddleware`](framework::TimingMiddleware) trace every exposed call.
//! See the [`lifecycle::tracing`] module for setup.
//!
//! ## 🗺️ Module Tour
//!
//! ### 1. The Engine ([`framework`])
//! - **Role**: interface exposure, schema, middleware, plugin composition.
//! - **Key items**: [`ActorDefinition`](framework::ActorDefinition),
//!   [`ExposedInterface`](framework::ExposedInterface), [`compose`](framework::compose).
//!
//! ### 2. The Plumbing ([`transport`], [`protocol`])
//! - **Role**: socket sessions, the registry and broadcaster, request framing and dispatch.
//! - **Key items**: [`SessionTransport`](transport::SessionTransport),
//!   [`TransportRegistry`](transport::TransportRegistry), [`Dispatcher`](protocol::Dispatcher).
//!
//! ### 3. The Capabilities ([`plugins`], [`storage`])
//! - **Role**: the stock plugins and the storage engine they share.
//!
//! ### 4. The Orchestrator ([`lifecycle`], [`http`], [`config`])
//! - **Role**: owns the actor, serves HTTP and WebSocket, reads configuration.
//! - **Key items**: [`RpcActor`](lifecycle::RpcActor), [`router`](http::router).
//!
//! ## 🚀 Quick Start
//!
//! ### Running the Demo
//!
//! ```bash
//! # Run with info logs
//! RUST_LOG=info cargo run
//! ```
//!
//! ### Running Tests
//!
//! ```bash
//! cargo test
//! ```

pub mod config;
pub mod framework;
pub mod http;
pub mod lifecycle;
pub mod plugins;
pub mod protocol;
pub mod storage;
pub mod transport;
