//! # Connection State Machine
//!
//! The [`ConnectionAttachment`] is the only durable state of a session. It is
//! persisted on the socket after every transition, so it is always current
//! when the host evicts the actor.
//!
//! ```text
//! connecting ──accept──▶ active ◀──resume── hibernated
//!      │                   │  └──evict──────────▲
//!      └──setup error──▶ closed ◀──close/error──┘
//! ```
//!
//! `closed` is terminal.

use crate::framework::{Result, RpcError};
use crate::transport::socket::Socket;
use crate::transport::TransportId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Active,
    Hibernated,
    Closed,
}

impl ConnectionState {
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Connecting, Active)
                | (Connecting, Closed)
                | (Active, Hibernated)
                | (Hibernated, Active)
                | (Active, Closed)
                | (Hibernated, Closed)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == ConnectionState::Closed
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Active => "active",
            ConnectionState::Hibernated => "hibernated",
            ConnectionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// `{transportId, state, connectedAt, lastTransition}`, timestamps in epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionAttachment {
    pub transport_id: TransportId,
    pub state: ConnectionState,
    pub connected_at: i64,
    pub last_transition: i64,
    /// Values plugins keep with the socket across hibernation, keyed by plugin name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub plugin_data: BTreeMap<String, Value>,
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl ConnectionAttachment {
    /// A fresh attachment in the `connecting` state.
    pub fn connecting(transport_id: TransportId) -> Self {
        let now = now_millis();
        Self {
            transport_id,
            state: ConnectionState::Connecting,
            connected_at: now,
            last_transition: now,
            plugin_data: BTreeMap::new(),
        }
    }

    pub fn transition(&mut self, next: ConnectionState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(RpcError::InvalidTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        debug!(transport_id = %self.transport_id, from = %self.state, to = %next, "Transition");
        self.state = next;
        self.last_transition = now_millis().max(self.last_transition);
        Ok(())
    }

    /// Transitions and re-persists the attachment on `socket`.
    pub fn advance(&mut self, socket: &dyn Socket, next: ConnectionState) -> Result<()> {
        self.transition(next)?;
        self.persist(socket)
    }

    pub fn persist(&self, socket: &dyn Socket) -> Result<()> {
        socket.serialize_attachment(serde_json::to_value(self)?)
    }

    /// Reads the attachment persisted on `socket`, if any.
    pub fn load(socket: &dyn Socket) -> Result<Option<Self>> {
        match socket.deserialize_attachment() {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framework::mock::MockSocket;
    use serde_json::json;
    use ConnectionState::*;

    #[test]
    fn allowed_transitions() {
        assert!(Connecting.can_transition_to(Active));
        assert!(Connecting.can_transition_to(Closed));
        assert!(Active.can_transition_to(Hibernated));
        assert!(Hibernated.can_transition_to(Active));
        assert!(Hibernated.can_transition_to(Closed));

        assert!(!Connecting.can_transition_to(Hibernated));
        assert!(!Active.can_transition_to(Connecting));
        assert!(!Active.can_transition_to(Active));
        for next in [Connecting, Active, Hibernated, Closed] {
            assert!(!Closed.can_transition_to(next));
        }
    }

    #[test]
    fn closed_is_terminal() {
        let mut attachment = ConnectionAttachment::connecting(TransportId::new());
        attachment.transition(Active).unwrap();
        attachment.transition(Closed).unwrap();
        let err = attachment.transition(Active).unwrap_err();
        assert!(matches!(err, RpcError::InvalidTransition { .. }));
        assert!(attachment.state.is_terminal());
    }

    #[test]
    fn advance_persists_every_transition() {
        let socket = MockSocket::new();
        let mut attachment = ConnectionAttachment::connecting(TransportId::from("t-1"));
        attachment.persist(&socket).unwrap();
        attachment.advance(&socket, Active).unwrap();

        let stored = ConnectionAttachment::load(&socket).unwrap().unwrap();
        assert_eq!(stored.state, Active);
        assert_eq!(stored.transport_id, TransportId::from("t-1"));
        assert!(stored.last_transition >= stored.connected_at);
    }

    #[test]
    fn wire_format_is_camel_case() {
        let attachment = ConnectionAttachment {
            transport_id: TransportId::from("abc"),
            state: Hibernated,
            connected_at: 1,
            last_transition: 2,
            plugin_data: BTreeMap::new(),
        };
        assert_eq!(
            serde_json::to_value(&attachment).unwrap(),
            json!({"transportId": "abc", "state": "hibernated", "connectedAt": 1, "lastTransition": 2})
        );
    }

    #[test]
    fn plugin_data_travels_with_the_attachment() {
        let socket = MockSocket::new();
        let mut attachment = ConnectionAttachment::connecting(TransportId::from("t-2"));
        attachment
            .plugin_data
            .insert("auth".into(), json!({"subject": "ada"}));
        attachment.persist(&socket).unwrap();
        assert_eq!(socket.attachment().unwrap()["pluginData"]["auth"]["subject"], "ada");

        let mut stored = ConnectionAttachment::load(&socket).unwrap().unwrap();
        stored.advance(&socket, Active).unwrap();
        stored.advance(&socket, Hibernated).unwrap();

        let resumed = ConnectionAttachment::load(&socket).unwrap().unwrap();
        assert_eq!(resumed.plugin_data["auth"], json!({"subject": "ada"}));
    }
}
