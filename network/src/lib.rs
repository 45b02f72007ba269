//! Wire-level plumbing for the voxel engine protocol: the packet buffer and its serialization
//! traits, and the length-prefixed frame codec with optional zlib compression.

use std::fmt::{self, Display, Formatter};

mod frame;
mod netutil;

pub use frame::*;
pub use netutil::*;

/// The phases a connection moves through, in order. A connection never moves backwards; any
/// phase may transition straight to `Disconnected`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum ConnectionState {
    /// Peers agree on the protocol version.
    Handshake,
    /// The client presents its profile.
    Login,
    /// The server sends the session's name to id mappings.
    RegistrySync,
    /// The server sends world metadata.
    GameData,
    /// Steady state: chunk streaming, block updates and player state.
    Playing,
    /// The connection is closed and accepts nothing further.
    Disconnected,
}

impl ConnectionState {
    /// Returns the phase that follows this one in a successful session.
    pub fn next(self) -> Self {
        match self {
            ConnectionState::Handshake => ConnectionState::Login,
            ConnectionState::Login => ConnectionState::RegistrySync,
            ConnectionState::RegistrySync => ConnectionState::GameData,
            ConnectionState::GameData => ConnectionState::Playing,
            ConnectionState::Playing | ConnectionState::Disconnected =>
                ConnectionState::Disconnected,
        }
    }
}

impl Display for ConnectionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Handshake => "handshake",
            ConnectionState::Login => "login",
            ConnectionState::RegistrySync => "registry-sync",
            ConnectionState::GameData => "game-data",
            ConnectionState::Playing => "playing",
            ConnectionState::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

/// The numeric protocol version both peers must agree on during the handshake.
pub const PROTOCOL_VERSION: i32 = 3;

#[cfg(test)]
mod tests {
    use super::ConnectionState::*;

    #[test]
    fn phases_advance_in_order() {
        let mut state = Handshake;
        let mut visited = vec![state];
        while state != Disconnected {
            state = state.next();
            visited.push(state);
        }

        assert_eq!(
            visited,
            vec![Handshake, Login, RegistrySync, GameData, Playing, Disconnected],
            "Unexpected phase sequence."
        );
        assert!(Login < Playing, "Phases should be ordered by progression.");
    }
}
