/// The replica side of the protocol.
pub mod client;
mod connection;
mod error;
mod handler;
/// Packet definitions and their wire encoding.
pub mod packet;
mod registry;
mod session;

pub use client::{ClientConnection, ClientSession, GameSettings};
pub use connection::*;
pub use error::ProtocolError;
pub use registry::PacketRegistry;
pub use session::*;
