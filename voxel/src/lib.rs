#![deny(rust_2018_idioms)]

//! The voxel engine core: block definitions, chunked world storage, ray hit-testing, and the
//! protocol that keeps client replicas in sync with the authoritative server world. The server is
//! launched through the `voxel_launcher` binary; clients and tools use this crate as a library.

// Expose sub-crates
pub use voxel_net as net;
pub use voxel_util as util;

mod base;
/// Block definitions and the block registry.
pub mod block;
/// Ray casting against the world and the hit results it produces.
pub mod hit;
/// Packet definitions, connection handling and the client and server sessions.
pub mod network;
/// World and chunk implementations, including the chunk provider.
pub mod world;

pub use base::*;
