use crate::{
    block::{Block, BlockId, BlockRegistry, AIR_ID},
    world::{
        location::{BlockPos, ChunkPos, LocalPos, CHUNK_VOLUME},
        BlockChangeCause,
        WorldError,
    },
};
use log::trace;
use std::{
    fmt::{self, Debug, Formatter},
    sync::Arc,
};
use voxel_util::Vector;

/// One fixed-size cuboid of the world.
pub struct Chunk {
    pos: ChunkPos,
    min: BlockPos,
    max: BlockPos,
    center: Vector<f64>,
    registry: Arc<BlockRegistry>,
    storage: ChunkStorage,
}

// An air chunk has no dense storage until something other than air is written into it.
enum ChunkStorage {
    Air,
    Materialized(Box<[BlockId]>),
}

impl Chunk {
    /// Creates an empty chunk without allocating block storage.
    pub fn air(pos: ChunkPos, registry: Arc<BlockRegistry>) -> Self {
        Self::with_storage(pos, registry, ChunkStorage::Air)
    }

    /// Creates a chunk from dense block ids laid out as described by `LocalPos::index`. Every id
    /// must be registered.
    pub fn from_ids(
        pos: ChunkPos,
        registry: Arc<BlockRegistry>,
        ids: Box<[BlockId]>,
    ) -> Result<Self, WorldError>
    {
        if ids.len() != CHUNK_VOLUME {
            return Err(WorldError::InvalidLength {
                expected: CHUNK_VOLUME,
                found: ids.len(),
            });
        }

        if let Some(&id) = ids.iter().find(|&&id| registry.block(id).is_none()) {
            return Err(WorldError::UnknownBlockId(id));
        }

        Ok(Self::with_storage(
            pos,
            registry,
            ChunkStorage::Materialized(ids),
        ))
    }

    /// Creates a chunk by asking `f` for the block at every local position.
    pub fn generate<F>(pos: ChunkPos, registry: Arc<BlockRegistry>, mut f: F) -> Result<Self, WorldError>
    where F: FnMut(LocalPos) -> BlockId {
        let ids = (0 .. CHUNK_VOLUME)
            .map(|index| f(LocalPos::from_index(index)))
            .collect::<Vec<_>>();

        if ids.iter().all(|&id| id == AIR_ID) {
            return Ok(Self::air(pos, registry));
        }

        Self::from_ids(pos, registry, ids.into_boxed_slice())
    }

    fn with_storage(pos: ChunkPos, registry: Arc<BlockRegistry>, storage: ChunkStorage) -> Self {
        let min = pos.min_block();
        let max = pos.max_block();
        let center = Vector::rect(
            (min.x as f64 + max.x as f64 + 1.0) / 2.0,
            (min.y as f64 + max.y as f64 + 1.0) / 2.0,
            (min.z as f64 + max.z as f64 + 1.0) / 2.0,
        );

        Chunk {
            pos,
            min,
            max,
            center,
            registry,
            storage,
        }
    }

    #[inline]
    pub fn pos(&self) -> ChunkPos {
        self.pos
    }

    /// The lowest block position inside this chunk.
    #[inline]
    pub fn min(&self) -> BlockPos {
        self.min
    }

    /// The highest block position inside this chunk.
    #[inline]
    pub fn max(&self) -> BlockPos {
        self.max
    }

    /// The point at the geometric center of this chunk.
    #[inline]
    pub fn center(&self) -> Vector<f64> {
        self.center
    }

    #[inline]
    pub fn registry(&self) -> &Arc<BlockRegistry> {
        &self.registry
    }

    /// Whether this chunk is the storage-free empty placeholder.
    #[inline]
    pub fn is_air_chunk(&self) -> bool {
        matches!(self.storage, ChunkStorage::Air)
    }

    #[inline]
    pub fn block_id(&self, pos: LocalPos) -> BlockId {
        match &self.storage {
            ChunkStorage::Air => AIR_ID,
            ChunkStorage::Materialized(ids) => ids[pos.index()],
        }
    }

    #[inline]
    pub fn block(&self, pos: LocalPos) -> &Arc<Block> {
        self.resolve(self.block_id(pos))
    }

    /// The dense block ids of this chunk, or `None` for an air chunk.
    pub fn ids(&self) -> Option<&[BlockId]> {
        match &self.storage {
            ChunkStorage::Air => None,
            ChunkStorage::Materialized(ids) => Some(ids),
        }
    }

    /// Replaces the block at the given position, returning the block that was there before.
    ///
    /// This is the only way chunk storage changes. Writing a block other than air into an air
    /// chunk allocates its storage; writing air into an air chunk leaves it untouched.
    pub fn set_block(
        &mut self,
        pos: LocalPos,
        block: &Arc<Block>,
        cause: &BlockChangeCause,
    ) -> Result<Arc<Block>, WorldError>
    {
        let id = self
            .registry
            .id_of(block)
            .ok_or_else(|| WorldError::UnknownBlock(block.name().clone()))?;

        if id != AIR_ID && self.is_air_chunk() {
            self.storage =
                ChunkStorage::Materialized(vec![AIR_ID; CHUNK_VOLUME].into_boxed_slice());
        }

        let previous = match &mut self.storage {
            ChunkStorage::Air => AIR_ID,
            ChunkStorage::Materialized(ids) => std::mem::replace(&mut ids[pos.index()], id),
        };

        trace!(
            "{:?} at {:?}: {} -> {} ({:?})",
            self.pos,
            pos,
            previous,
            id,
            cause
        );

        Ok(self.resolve(previous).clone())
    }

    #[inline]
    fn resolve(&self, id: BlockId) -> &Arc<Block> {
        match self.registry.block(id) {
            Some(block) => block,
            // Storage is validated on construction and on every write
            None => unreachable!("Chunk {:?} holds unregistered block id {}", self.pos, id),
        }
    }
}

impl Debug for Chunk {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chunk")
            .field("pos", &self.pos)
            .field("air", &self.is_air_chunk())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxel_util::UnlocalizedName;

    fn stone(registry: &BlockRegistry) -> Arc<Block> {
        registry
            .by_name(&UnlocalizedName::engine("stone"))
            .unwrap()
            .clone()
    }

    #[test]
    fn bounds_are_derived_from_position() {
        let registry = Arc::new(BlockRegistry::with_defaults());
        let chunk = Chunk::air(ChunkPos::new(1, -1, 0), registry);

        assert_eq!(chunk.min(), BlockPos::new(16, -16, 0));
        assert_eq!(chunk.max(), BlockPos::new(31, -1, 15));
        assert_eq!(chunk.center(), Vector::rect(24.0, -8.0, 8.0));
    }

    #[test]
    fn air_chunk_promotes_on_first_solid_write() {
        let registry = Arc::new(BlockRegistry::with_defaults());
        let stone = stone(&registry);
        let air = registry.air().clone();
        let mut chunk = Chunk::air(ChunkPos::new(0, 0, 0), registry.clone());
        let pos = LocalPos::new(1, 2, 3).unwrap();

        let previous = chunk.set_block(pos, &air, &BlockChangeCause::WorldGen).unwrap();
        assert!(Arc::ptr_eq(&previous, &air));
        assert!(chunk.is_air_chunk(), "Writing air should not allocate storage.");

        let previous = chunk.set_block(pos, &stone, &BlockChangeCause::WorldGen).unwrap();
        assert!(Arc::ptr_eq(&previous, &air));
        assert!(!chunk.is_air_chunk());
        assert!(Arc::ptr_eq(chunk.block(pos), &stone));
        assert_eq!(chunk.block_id(pos), registry.id_of(&stone).unwrap());
        assert_eq!(chunk.block_id(LocalPos::new(0, 0, 0).unwrap()), AIR_ID);
    }

    #[test]
    fn set_block_returns_previous() {
        let registry = Arc::new(BlockRegistry::with_defaults());
        let stone = stone(&registry);
        let mut chunk = Chunk::air(ChunkPos::new(0, 0, 0), registry);
        let pos = LocalPos::new(15, 15, 15).unwrap();

        chunk.set_block(pos, &stone, &BlockChangeCause::Physics).unwrap();
        let previous = chunk.set_block(pos, &stone, &BlockChangeCause::Physics).unwrap();
        assert!(Arc::ptr_eq(&previous, &stone), "Second write should return the same block.");
    }

    #[test]
    fn foreign_blocks_are_rejected() {
        let registry = Arc::new(BlockRegistry::with_defaults());
        let other = BlockRegistry::builder()
            .register(UnlocalizedName::new("deco", "lamp"), crate::block::BlockBehavior::GLASS)
            .build()
            .unwrap();
        let lamp = other.by_name(&UnlocalizedName::new("deco", "lamp")).unwrap().clone();

        let mut chunk = Chunk::air(ChunkPos::new(0, 0, 0), registry);
        let result = chunk.set_block(LocalPos::new(0, 0, 0).unwrap(), &lamp, &BlockChangeCause::WorldGen);
        assert!(matches!(result, Err(WorldError::UnknownBlock(_))));
        assert!(chunk.is_air_chunk());
    }

    #[test]
    fn dense_data_is_validated() {
        let registry = Arc::new(BlockRegistry::with_defaults());
        let short = vec![AIR_ID; 10].into_boxed_slice();
        assert!(matches!(
            Chunk::from_ids(ChunkPos::new(0, 0, 0), registry.clone(), short),
            Err(WorldError::InvalidLength { found: 10, .. })
        ));

        let mut bad = vec![AIR_ID; CHUNK_VOLUME];
        bad[100] = 999;
        assert!(matches!(
            Chunk::from_ids(ChunkPos::new(0, 0, 0), registry, bad.into_boxed_slice()),
            Err(WorldError::UnknownBlockId(999))
        ));
    }
}
