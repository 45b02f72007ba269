use crate::{
    base::ClientId,
    block::{Block, BlockId, BlockRegistry},
    hit::{BlockHitResult, RayCast},
    world::{
        chunk::Chunk,
        location::{BlockPos, ChunkPos},
        WorldError,
    },
};
use dashmap::DashMap;
use log::{debug, warn};
use parking_lot::{Mutex, RwLock};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use voxel_util::{hash::NumHasher, Vector};

pub type Map<T> = DashMap<ChunkPos, T, NumHasher>;

/// A loaded chunk. Readers hold the `Arc` for as long as they need the chunk, so replacing or
/// unloading the table entry never invalidates a chunk someone is looking at.
pub type ChunkRef = Arc<RwLock<Chunk>>;

/// Why a block changed. Listeners use this to decide whether a change should be forwarded, in
/// particular so that changes received from a peer are not echoed back to it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BlockChangeCause {
    WorldGen,
    /// The local player acted on its own replica.
    PlayerAction,
    /// The change was received over the network, from the given client when known.
    NetworkApply { origin: Option<ClientId> },
    Physics,
    Plugin,
}

impl BlockChangeCause {
    /// Whether sending this change to the given client would echo the client's own change.
    pub fn is_echo_for(&self, client: ClientId) -> bool {
        matches!(self, BlockChangeCause::NetworkApply { origin: Some(origin) } if *origin == client)
    }
}

/// A block change published to world subscribers.
#[derive(Clone, Debug)]
pub struct BlockChange {
    pub pos: BlockPos,
    pub previous: Arc<Block>,
    pub current: Arc<Block>,
    pub cause: BlockChangeCause,
}

/// The load state of a chunk position.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChunkStatus {
    Loaded,
    /// A provider request is in flight. Reads serve air until it completes.
    Pending,
    /// The provider could not produce the chunk. It stays unavailable until requested again.
    Failed(String),
    Unloaded,
}

enum LoadState {
    Pending,
    Failed(String),
}

/// A named voxel world: the table of loaded chunks and the registry their ids refer to.
///
/// All methods take `&self`; the chunk table is a sharded concurrent map and each chunk sits behind
/// its own lock, so lookups from readers proceed while the owning side loads, unloads and writes.
pub struct World {
    name: String,
    registry: Arc<BlockRegistry>,
    chunks: Map<ChunkRef>,
    loading: Map<LoadState>,
    listeners: Mutex<Vec<UnboundedSender<BlockChange>>>,
}

impl World {
    pub fn new(name: impl Into<String>, registry: Arc<BlockRegistry>) -> Self {
        World {
            name: name.into(),
            registry,
            chunks: Map::with_hasher(NumHasher),
            loading: Map::with_hasher(NumHasher),
            listeners: Mutex::new(Vec::new()),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn registry(&self) -> &Arc<BlockRegistry> {
        &self.registry
    }

    #[inline]
    pub fn loaded_chunk_at(&self, pos: ChunkPos) -> Option<ChunkRef> {
        self.chunks.get(&pos).map(|entry| entry.value().clone())
    }

    #[inline]
    pub fn is_loaded(&self, pos: ChunkPos) -> bool {
        self.chunks.contains_key(&pos)
    }

    pub fn loaded_chunks(&self) -> Vec<ChunkPos> {
        self.chunks.iter().map(|entry| *entry.key()).collect()
    }

    pub fn loaded_count(&self) -> usize {
        self.chunks.len()
    }

    /// Returns the block at the given position. Positions in chunks that are not loaded read as
    /// air.
    pub fn block(&self, pos: BlockPos) -> Arc<Block> {
        match self.loaded_chunk_at(pos.chunk()) {
            Some(chunk) => chunk.read().block(pos.local()).clone(),
            None => self.registry.air().clone(),
        }
    }

    /// Returns the id of the block at the given position, with the same defaults as `block`.
    pub fn block_id(&self, pos: BlockPos) -> BlockId {
        match self.loaded_chunk_at(pos.chunk()) {
            Some(chunk) => chunk.read().block_id(pos.local()),
            None => crate::block::AIR_ID,
        }
    }

    /// Replaces the block at the given position and returns the previous block. Subscribers are
    /// notified if the block actually changed.
    pub fn set_block(
        &self,
        pos: BlockPos,
        block: &Arc<Block>,
        cause: BlockChangeCause,
    ) -> Result<Arc<Block>, WorldError>
    {
        let chunk = self
            .loaded_chunk_at(pos.chunk())
            .ok_or(WorldError::ChunkNotLoaded(pos.chunk()))?;

        let previous = chunk.write().set_block(pos.local(), block, &cause)?;
        drop(chunk);

        if previous != *block {
            self.publish(BlockChange {
                pos,
                previous: previous.clone(),
                current: block.clone(),
                cause,
            });
        }

        Ok(previous)
    }

    /// Casts a ray through this world. See `RayCast` for the exact semantics.
    pub fn raycast(
        &self,
        origin: Vector<f64>,
        direction: Vector<f64>,
        max_distance: f64,
    ) -> BlockHitResult<'_>
    {
        RayCast::new(origin, direction, max_distance).cast(self)
    }

    /// Inserts a chunk into the table, replacing any chunk already at its position. Returns the
    /// replaced chunk.
    pub fn cache_chunk(&self, chunk: Chunk) -> Option<ChunkRef> {
        let pos = chunk.pos();
        debug_assert!(
            Arc::ptr_eq(chunk.registry(), &self.registry),
            "Chunk {:?} was built against a different registry",
            pos
        );

        self.loading.remove(&pos);
        let previous = self.chunks.insert(pos, Arc::new(RwLock::new(chunk)));
        if previous.is_some() {
            warn!("Overwrote chunk at {:?} while caching new chunk", pos);
        }
        previous
    }

    /// Removes the chunk at the given position from the table.
    pub fn unload_chunk(&self, pos: ChunkPos) -> Option<ChunkRef> {
        self.loading.remove(&pos);
        let removed = self.chunks.remove(&pos).map(|(_, chunk)| chunk);
        if removed.is_some() {
            debug!("Unloaded chunk {:?} from {}", pos, self.name);
        }
        removed
    }

    pub fn chunk_status(&self, pos: ChunkPos) -> ChunkStatus {
        if self.chunks.contains_key(&pos) {
            return ChunkStatus::Loaded;
        }

        match self.loading.get(&pos).as_deref() {
            Some(LoadState::Pending) => ChunkStatus::Pending,
            Some(LoadState::Failed(reason)) => ChunkStatus::Failed(reason.clone()),
            None => ChunkStatus::Unloaded,
        }
    }

    /// Marks a chunk as being loaded. Returns false if it is already loaded or pending.
    pub(crate) fn mark_pending(&self, pos: ChunkPos) -> bool {
        if self.chunks.contains_key(&pos) {
            return false;
        }

        match self.loading.insert(pos, LoadState::Pending) {
            Some(LoadState::Pending) => false,
            _ => true,
        }
    }

    pub(crate) fn mark_failed(&self, pos: ChunkPos, reason: String) {
        self.loading.insert(pos, LoadState::Failed(reason));
    }

    /// Returns a receiver for every block change made from now on. Dropping the receiver
    /// unsubscribes.
    pub fn subscribe(&self) -> UnboundedReceiver<BlockChange> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.listeners.lock().push(sender);
        receiver
    }

    fn publish(&self, change: BlockChange) {
        self.listeners
            .lock()
            .retain(|listener| listener.send(change.clone()).is_ok());
    }
}

/// Resolves worlds by name.
pub trait WorldLookup {
    fn world(&self, name: &str) -> Option<&World>;
}

impl WorldLookup for World {
    fn world(&self, name: &str) -> Option<&World> {
        if name == self.name {
            Some(self)
        } else {
            None
        }
    }
}

/// The worlds hosted by one process, keyed by name.
#[derive(Default)]
pub struct WorldStore {
    worlds: HashMap<String, Arc<World>>,
}

impl WorldStore {
    pub fn new() -> Self {
        WorldStore::default()
    }

    /// Adds a world, replacing any world with the same name.
    pub fn insert(&mut self, world: Arc<World>) -> Option<Arc<World>> {
        self.worlds.insert(world.name().to_owned(), world)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<World>> {
        self.worlds.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Arc<World>> {
        self.worlds.remove(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<World>> + '_ {
        self.worlds.values()
    }
}

impl WorldLookup for WorldStore {
    fn world(&self, name: &str) -> Option<&World> {
        self.worlds.get(name).map(|world| &**world)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxel_util::UnlocalizedName;

    fn world() -> (World, Arc<Block>) {
        let registry = Arc::new(BlockRegistry::with_defaults());
        let stone = registry.by_name(&UnlocalizedName::engine("stone")).unwrap().clone();
        let world = World::new("overworld", registry.clone());
        world.cache_chunk(Chunk::air(ChunkPos::new(0, 0, 0), registry));
        (world, stone)
    }

    #[test]
    fn unloaded_reads_are_air_and_writes_fail() {
        let (world, stone) = world();
        let far = BlockPos::new(100, 0, 0);

        assert!(Arc::ptr_eq(&world.block(far), world.registry().air()));
        assert_eq!(world.block_id(far), crate::block::AIR_ID);
        assert_eq!(
            world.set_block(far, &stone, BlockChangeCause::Physics).err(),
            Some(WorldError::ChunkNotLoaded(ChunkPos::new(6, 0, 0)))
        );
    }

    #[test]
    fn set_and_get_agree() {
        let (world, stone) = world();
        let pos = BlockPos::new(3, 4, 5);

        let previous = world.set_block(pos, &stone, BlockChangeCause::WorldGen).unwrap();
        assert!(Arc::ptr_eq(&previous, world.registry().air()));
        assert!(Arc::ptr_eq(&world.block(pos), &stone));
        assert_eq!(world.block_id(pos), world.registry().id_of(&stone).unwrap());
    }

    #[test]
    fn subscribers_see_real_changes_only() {
        let (world, stone) = world();
        let mut changes = world.subscribe();
        let pos = BlockPos::new(1, 1, 1);
        let cause = BlockChangeCause::NetworkApply { origin: Some(4) };

        world.set_block(pos, &stone, cause.clone()).unwrap();
        world.set_block(pos, &stone, cause.clone()).unwrap();

        let change = changes.try_recv().unwrap();
        assert_eq!(change.pos, pos);
        assert_eq!(change.cause, cause);
        assert!(change.cause.is_echo_for(4));
        assert!(!change.cause.is_echo_for(5));
        assert!(changes.try_recv().is_err(), "A write of the same block is not a change.");
    }

    #[test]
    fn chunk_status_transitions() {
        let (world, _) = world();
        let pos = ChunkPos::new(0, 1, 0);

        assert_eq!(world.chunk_status(pos), ChunkStatus::Unloaded);
        assert!(world.mark_pending(pos));
        assert!(!world.mark_pending(pos), "A pending chunk must not be requested twice.");
        assert_eq!(world.chunk_status(pos), ChunkStatus::Pending);

        world.mark_failed(pos, "disk on fire".to_owned());
        assert_eq!(
            world.chunk_status(pos),
            ChunkStatus::Failed("disk on fire".to_owned())
        );

        world.cache_chunk(Chunk::air(pos, world.registry().clone()));
        assert_eq!(world.chunk_status(pos), ChunkStatus::Loaded);
        assert!(world.unload_chunk(pos).is_some());
        assert_eq!(world.chunk_status(pos), ChunkStatus::Unloaded);
    }

    #[test]
    fn readers_keep_replaced_chunks_alive() {
        let (world, stone) = world();
        let origin = ChunkPos::new(0, 0, 0);
        let held = world.loaded_chunk_at(origin).unwrap();

        let mut replacement = Chunk::air(origin, world.registry().clone());
        replacement
            .set_block(
                crate::world::location::LocalPos::new(0, 0, 0).unwrap(),
                &stone,
                &BlockChangeCause::WorldGen,
            )
            .unwrap();
        assert!(world.cache_chunk(replacement).is_some());

        assert!(held.read().is_air_chunk(), "Held chunk must be unaffected by the swap.");
        assert!(Arc::ptr_eq(&world.block(BlockPos::new(0, 0, 0)), &stone));
    }

    #[test]
    fn lookup_by_name() {
        let (world, _) = world();
        let mut store = WorldStore::new();
        store.insert(Arc::new(world));

        assert!(store.world("overworld").is_some());
        assert!(store.world("nether").is_none());
    }
}
