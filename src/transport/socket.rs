//! # Hibernation-Capable Socket
//!
//! The host hands the runtime a [`Socket`] for every accepted connection. A
//! socket outlives the actor's in-memory state: when the actor is evicted the
//! socket stays open, and the only thing that survives with it is a small
//! serialized attachment.

use crate::framework::Result;
use async_trait::async_trait;
use serde_json::Value;

/// Largest close reason, in bytes, the WebSocket protocol allows.
pub const CLOSE_REASON_LIMIT: usize = 123;

pub const NORMAL_CLOSURE: u16 = 1000;
pub const INTERNAL_ERROR: u16 = 1011;

#[async_trait]
pub trait Socket: Send + Sync + 'static {
    /// Host-assigned label, used for logging.
    fn label(&self) -> &str;

    async fn send(&self, message: String) -> Result<()>;

    async fn close(&self, code: u16, reason: &str) -> Result<()>;

    /// Persists `value` alongside the socket so it survives hibernation.
    fn serialize_attachment(&self, value: Value) -> Result<()>;

    fn deserialize_attachment(&self) -> Option<Value>;
}

/// Cuts `reason` to [`CLOSE_REASON_LIMIT`] bytes on a character boundary.
pub fn truncate_reason(reason: &str) -> &str {
    if reason.len() <= CLOSE_REASON_LIMIT {
        return reason;
    }
    let mut end = CLOSE_REASON_LIMIT;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    &reason[..end]
}
