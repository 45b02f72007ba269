pub mod chunk {
    mod chunk;
    mod encoder;
    mod error;
    pub mod provider;

    pub use chunk::Chunk;
    pub use encoder::ChunkSnapshot;
    pub use error::*;
    pub use provider::{AirChunkSource, ChunkProvider, ChunkSource, FlatChunkSource, ProviderEvent};
}
mod error;
pub mod location;
#[allow(clippy::module_inception)]
mod world;

pub use error::*;
pub use location::{BlockPos, ChunkPos, Direction, LocalPos};
pub use world::*;
