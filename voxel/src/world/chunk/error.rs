use crate::world::{ChunkPos, WorldError};
use std::{
    error::Error,
    fmt::{self, Display, Formatter},
};

/// A chunk load that could not be completed.
#[derive(Debug)]
pub struct ProviderError {
    pos: ChunkPos,
    error: ProviderErrorType,
}

impl ProviderError {
    pub(crate) fn new(pos: ChunkPos, error: impl Into<ProviderErrorType>) -> Self {
        ProviderError {
            pos,
            error: error.into(),
        }
    }

    #[inline]
    pub fn pos(&self) -> ChunkPos {
        self.pos
    }

    #[inline]
    pub fn error(&self) -> &ProviderErrorType {
        &self.error
    }
}

impl Display for ProviderError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Failed to load chunk {:?}: ", self.pos)?;
        Display::fmt(&self.error, f)
    }
}

impl Error for ProviderError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self.error {
            ProviderErrorType::World(error) => Some(error),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub enum ProviderErrorType {
    /// The chunk source reported an error.
    Source(String),
    /// The chunk source produced chunk data that does not fit the world.
    World(WorldError),
    /// The chunk source produced a chunk for a different position.
    PositionMismatch(ChunkPos),
    /// The load task panicked or was cancelled.
    Join(String),
}

impl Display for ProviderErrorType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ProviderErrorType::Source(msg) => Display::fmt(msg, f),
            ProviderErrorType::World(error) => Display::fmt(error, f),
            ProviderErrorType::PositionMismatch(found) =>
                write!(f, "chunk source returned chunk {:?}", found),
            ProviderErrorType::Join(msg) => write!(f, "load task failed: {}", msg),
        }
    }
}

impl From<WorldError> for ProviderErrorType {
    fn from(x: WorldError) -> Self {
        ProviderErrorType::World(x)
    }
}
