use crate::world::ChunkPos;
use std::{
    error::Error,
    fmt::{self, Display, Formatter},
};
use voxel_util::UnlocalizedName;

/// Misuse of the world or chunk API. These indicate a bug in the caller and are never produced for
/// expected conditions such as reading an unloaded chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorldError {
    /// A chunk-local coordinate fell outside the chunk volume.
    OutOfBounds { x: i32, y: i32, z: i32 },
    /// A write targeted a chunk that is not loaded.
    ChunkNotLoaded(ChunkPos),
    /// A block that is not part of the world's registry.
    UnknownBlock(UnlocalizedName),
    /// A raw block id with no block behind it.
    UnknownBlockId(u16),
    /// Chunk data did not have one id per block.
    InvalidLength { expected: usize, found: usize },
}

impl Display for WorldError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            WorldError::OutOfBounds { x, y, z } =>
                write!(f, "Local position ({}, {}, {}) is outside the chunk", x, y, z),
            WorldError::ChunkNotLoaded(pos) => write!(f, "Chunk {:?} is not loaded", pos),
            WorldError::UnknownBlock(name) => write!(f, "Block {} is not registered", name),
            WorldError::UnknownBlockId(id) => write!(f, "No block has id {}", id),
            WorldError::InvalidLength { expected, found } => write!(
                f,
                "Chunk data holds {} blocks, expected {}",
                found, expected
            ),
        }
    }
}

impl Error for WorldError {}
