//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;

use pm_protocol::StreamId;

/// Which end of the transport this multiplexer is.
///
/// Clients allocate odd stream identifiers and servers even ones, so both
/// sides can open streams without coordinating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The side that dialed the transport
    Client,
    /// The side that accepted the transport
    Server,
}

impl Role {
    /// First identifier this side allocates
    pub fn first_stream_id(&self) -> StreamId {
        match self {
            Role::Client => StreamId::new(1),
            Role::Server => StreamId::new(2),
        }
    }

    /// Whether `id` falls in this side's allocation range
    pub fn owns(&self, id: StreamId) -> bool {
        id.is_client_initiated() == matches!(self, Role::Client)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Client => write!(f, "client"),
            Role::Server => write!(f, "server"),
        }
    }
}
