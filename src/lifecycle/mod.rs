//! Actor lifecycle and runtime setup.
//!
//! # Main Components
//!
//! - [`RpcActor`] - composes plugins, owns socket sessions, hibernates and resumes
//! - [`setup_tracing`] - initializes the tracing/logging infrastructure

pub mod actor;
pub mod tracing;

pub use actor::{RpcActor, POLICY_VIOLATION};
pub use tracing::setup_tracing;
