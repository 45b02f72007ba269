use crate::network::packet::PacketKind;
use std::{
    error::Error,
    fmt::{self, Display, Formatter},
};
use voxel_net::{ConnectionState, PacketSerdeError};

/// A condition that ends one connection. None of these touch shared world state; the connection
/// is closed and, where possible, the peer is sent `reason()` in a Disconnect packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The peers speak different protocol versions.
    VersionMismatch { expected: i32, found: i32 },
    /// A packet arrived in a phase where it is not allowed.
    OutOfPhase {
        packet: PacketKind,
        phase: ConnectionState,
    },
    /// A payload could not be decoded or contained invalid values.
    Malformed(String),
    /// A registry mapping named an entry this process does not know.
    UnknownRegistryEntry { registry: String, name: String },
    /// A well-formed packet broke the protocol's sequencing rules.
    Violation(String),
    /// The server refused the login.
    Rejected(String),
    /// The peer stopped answering.
    TimedOut(&'static str),
    /// The peer disconnected with the given reason.
    Remote(String),
    /// The transport closed.
    Closed,
}

impl ProtocolError {
    /// The human-readable reason sent to and shown by the disconnected peer.
    pub fn reason(&self) -> String {
        self.to_string()
    }
}

impl Display for ProtocolError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::VersionMismatch { expected, found } => write!(
                f,
                "Incompatible protocol version {} (expected {})",
                found, expected
            ),
            ProtocolError::OutOfPhase { packet, phase } =>
                write!(f, "Protocol violation: {} packet received during {}", packet, phase),
            ProtocolError::Malformed(msg) => write!(f, "Malformed packet: {}", msg),
            ProtocolError::UnknownRegistryEntry { registry, name } =>
                write!(f, "Unknown {} registry entry {}", registry, name),
            ProtocolError::Violation(msg) => write!(f, "Protocol violation: {}", msg),
            ProtocolError::Rejected(msg) => Display::fmt(msg, f),
            ProtocolError::TimedOut(what) => write!(f, "Timed out waiting for {}", what),
            ProtocolError::Remote(reason) => write!(f, "Disconnected by peer: {}", reason),
            ProtocolError::Closed => write!(f, "Connection closed"),
        }
    }
}

impl Error for ProtocolError {}

impl From<PacketSerdeError> for ProtocolError {
    fn from(error: PacketSerdeError) -> Self {
        ProtocolError::Malformed(error.to_string())
    }
}
