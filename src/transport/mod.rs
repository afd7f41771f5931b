//! Hibernation-aware socket transport.
//!
//! - [`Socket`] - what the host provides for each connection
//! - [`ConnectionAttachment`] / [`ConnectionState`] - durable per-socket state machine
//! - [`SessionTransport`] - push-to-pull adapter consumed by the RPC session loop
//! - [`TransportRegistry`] / [`Broadcaster`] - live transports and fan-out

pub mod attachment;
pub mod registry;
pub mod session;
pub mod socket;

pub use attachment::{ConnectionAttachment, ConnectionState};
pub use registry::{Broadcaster, TransportId, TransportRegistry};
pub use session::SessionTransport;
pub use socket::{truncate_reason, Socket, CLOSE_REASON_LIMIT, INTERNAL_ERROR, NORMAL_CLOSURE};
