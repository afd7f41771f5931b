//! # Observability & Tracing
//!
//! The [`setup_tracing`] function initializes structured logging with the
//! `tracing` crate. The compact format hides the module prefix
//! (`with_target(false)`); structured fields such as `transport_id`,
//! `method` and `plugin` carry the context instead.
//!
//! ## What Gets Traced
//!
//! - **Actor lifecycle** (`info`): start, plugin init, socket accepted/closed,
//!   hibernation, resume, shutdown
//! - **Calls** (`debug`): dispatch, failures with their wire code
//! - **Hook failures** (`warn`): `on_response`/`on_error` errors and panics
//!
//! ## Usage Examples
//!
//! ```bash
//! # Lifecycle only
//! RUST_LOG=info cargo run
//!
//! # Every call and transition
//! RUST_LOG=debug cargo run
//!
//! # Filter to the transport layer
//! RUST_LOG=actor_rpc::transport=debug cargo run
//! ```
//!
//! A resumed session reads like this with `RUST_LOG=debug`:
//!
//! ```text
//! INFO Actor hibernated actor="demo" sessions=1
//! INFO Actor started actor="demo" plugins=5 methods=3 namespaces=2
//! DEBUG Transition transport_id=9f0c.. from=hibernated to=active
//! INFO Session resumed transport_id=9f0c..
//! ```
pub fn setup_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();
}
