use crate::{
    block::{BlockId, BlockRegistry, AIR_ID},
    world::{
        chunk::{Chunk, ProviderError, ProviderErrorType},
        ChunkPos,
        World,
    },
};
use futures_util::{poll, stream::FuturesUnordered, StreamExt};
use log::{debug, error};
use std::{error::Error, sync::Arc, task::Poll};
use tokio::{runtime::Handle, task::JoinHandle};
use voxel_util::UnlocalizedName;

/// Produces chunk contents. The provider calls this from a blocking worker thread, so it may do
/// file I/O or expensive generation.
pub trait ChunkSource: Send + Sync + 'static {
    fn load(
        &self,
        pos: ChunkPos,
        registry: &Arc<BlockRegistry>,
    ) -> Result<Chunk, Box<dyn Error + Send + Sync>>;
}

/// Serves every chunk as air.
pub struct AirChunkSource;

impl ChunkSource for AirChunkSource {
    fn load(
        &self,
        pos: ChunkPos,
        registry: &Arc<BlockRegistry>,
    ) -> Result<Chunk, Box<dyn Error + Send + Sync>> {
        Ok(Chunk::air(pos, registry.clone()))
    }
}

/// Serves horizontal layers of blocks stacked upwards from y = 0, with air above and below.
pub struct FlatChunkSource {
    layers: Vec<UnlocalizedName>,
}

impl FlatChunkSource {
    /// Builds a source from `(block, thickness)` pairs listed bottom to top.
    pub fn new<I>(layers: I) -> Self
    where I: IntoIterator<Item = (UnlocalizedName, usize)> {
        FlatChunkSource {
            layers: layers
                .into_iter()
                .flat_map(|(name, thickness)| std::iter::repeat(name).take(thickness))
                .collect(),
        }
    }

    /// Bedrock, then three layers of dirt, then grass.
    pub fn standard() -> Self {
        Self::new([
            (UnlocalizedName::engine("bedrock"), 1),
            (UnlocalizedName::engine("dirt"), 3),
            (UnlocalizedName::engine("grass"), 1),
        ])
    }

    /// The y coordinate of the lowest air block above the layers.
    pub fn surface(&self) -> i32 {
        self.layers.len() as i32
    }
}

impl ChunkSource for FlatChunkSource {
    fn load(
        &self,
        pos: ChunkPos,
        registry: &Arc<BlockRegistry>,
    ) -> Result<Chunk, Box<dyn Error + Send + Sync>> {
        let min_y = pos.min_block().y;
        let max_y = pos.max_block().y;
        if max_y < 0 || min_y >= self.surface() {
            return Ok(Chunk::air(pos, registry.clone()));
        }

        let ids = self
            .layers
            .iter()
            .map(|name| {
                registry
                    .by_name(name)
                    .and_then(|block| registry.id_of(block))
                    .ok_or_else(|| format!("Layer block {} is not registered", name))
            })
            .collect::<Result<Vec<BlockId>, _>>()?;

        let chunk = Chunk::generate(pos, registry.clone(), |local| {
            let y = min_y + local.y();
            if y < 0 {
                AIR_ID
            } else {
                ids.get(y as usize).copied().unwrap_or(AIR_ID)
            }
        })?;
        Ok(chunk)
    }
}

/// The outcome of one finished load.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProviderEvent {
    Loaded(ChunkPos),
    Failed(ChunkPos),
}

type LoadTask = JoinHandle<(ChunkPos, Result<Chunk, ProviderError>)>;

/// Loads chunks off the tick thread and hands them to the world once they are ready.
///
/// Requests run on the blocking pool of the given runtime. Completed loads are only applied when
/// the owner calls `flush_ready` or `join_pending`, so the world's chunk table is only ever
/// mutated from the owner's thread.
pub struct ChunkProvider {
    world: Arc<World>,
    source: Arc<dyn ChunkSource>,
    rt: Handle,
    pending: FuturesUnordered<LoadTask>,
}

impl ChunkProvider {
    pub fn new(world: Arc<World>, source: Arc<dyn ChunkSource>, rt: Handle) -> Self {
        ChunkProvider {
            world,
            source,
            rt,
            pending: FuturesUnordered::new(),
        }
    }

    #[inline]
    pub fn world(&self) -> &Arc<World> {
        &self.world
    }

    /// The number of loads that have not been applied yet.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Starts loading the chunk at the given position. Returns false if the chunk is already
    /// loaded or being loaded.
    pub fn request(&self, pos: ChunkPos) -> bool {
        if !self.world.mark_pending(pos) {
            return false;
        }

        let source = self.source.clone();
        let registry = self.world.registry().clone();
        let load = self
            .rt
            .spawn_blocking(move || Self::load_internal(pos, source.as_ref(), &registry));

        self.pending.push(self.rt.spawn(async move {
            let result = match load.await {
                Ok(result) => result,
                Err(error) => Err(ProviderError::new(
                    pos,
                    ProviderErrorType::Join(error.to_string()),
                )),
            };
            (pos, result)
        }));

        true
    }

    /// Applies every load that has finished, without waiting. Returns what happened.
    pub async fn flush_ready(&mut self) -> Vec<ProviderEvent> {
        let mut events = Vec::new();
        while let Poll::Ready(Some(task_result)) = poll!(self.pending.next()) {
            events.extend(self.handle_task_result(task_result));
        }
        events
    }

    /// Waits for every outstanding load and applies it.
    pub async fn join_pending(&mut self) -> Vec<ProviderEvent> {
        let mut events = Vec::new();
        while let Some(task_result) = self.pending.next().await {
            events.extend(self.handle_task_result(task_result));
        }
        events
    }

    fn handle_task_result(
        &self,
        task_result: Result<(ChunkPos, Result<Chunk, ProviderError>), tokio::task::JoinError>,
    ) -> Option<ProviderEvent> {
        let (pos, result) = match task_result {
            Ok(output) => output,
            Err(error) => {
                // The wrapper task only awaits the load, so this is a runtime shutdown
                error!("Internal error in chunk provider: {}", error);
                return None;
            }
        };

        match result {
            Ok(chunk) => {
                debug!("Loaded chunk {:?}", pos);
                self.world.cache_chunk(chunk);
                Some(ProviderEvent::Loaded(pos))
            }
            Err(error) => {
                // The position is left unavailable until someone asks for it again
                error!("{}", error);
                self.world.mark_failed(pos, error.error().to_string());
                Some(ProviderEvent::Failed(pos))
            }
        }
    }

    fn load_internal(
        pos: ChunkPos,
        source: &dyn ChunkSource,
        registry: &Arc<BlockRegistry>,
    ) -> Result<Chunk, ProviderError> {
        let chunk = source
            .load(pos, registry)
            .map_err(|error| ProviderError::new(pos, ProviderErrorType::Source(error.to_string())))?;

        if chunk.pos() != pos {
            return Err(ProviderError::new(
                pos,
                ProviderErrorType::PositionMismatch(chunk.pos()),
            ));
        }

        if !Arc::ptr_eq(chunk.registry(), registry) {
            return Err(ProviderError::new(
                pos,
                ProviderErrorType::Source("chunk was built against another registry".to_owned()),
            ));
        }

        Ok(chunk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::{BlockPos, ChunkStatus};

    struct FailingSource;

    impl ChunkSource for FailingSource {
        fn load(
            &self,
            pos: ChunkPos,
            registry: &Arc<BlockRegistry>,
        ) -> Result<Chunk, Box<dyn Error + Send + Sync>> {
            if pos.x < 0 {
                Err("region file is corrupt".into())
            } else {
                Ok(Chunk::air(pos, registry.clone()))
            }
        }
    }

    fn world() -> Arc<World> {
        Arc::new(World::new("test", Arc::new(BlockRegistry::with_defaults())))
    }

    #[tokio::test]
    async fn loads_are_applied_on_join() {
        let world = world();
        let mut provider = ChunkProvider::new(
            world.clone(),
            Arc::new(FlatChunkSource::standard()),
            Handle::current(),
        );

        assert!(provider.request(ChunkPos::new(0, 0, 0)));
        assert!(provider.request(ChunkPos::new(0, 1, 0)));
        assert!(!provider.request(ChunkPos::new(0, 0, 0)), "Duplicate request was accepted.");
        assert_eq!(world.chunk_status(ChunkPos::new(0, 0, 0)), ChunkStatus::Pending);

        let mut events = provider.join_pending().await;
        events.sort_by_key(|event| match event {
            ProviderEvent::Loaded(pos) | ProviderEvent::Failed(pos) => *pos,
        });
        assert_eq!(events, vec![
            ProviderEvent::Loaded(ChunkPos::new(0, 0, 0)),
            ProviderEvent::Loaded(ChunkPos::new(0, 1, 0))
        ]);

        let grass = UnlocalizedName::engine("grass");
        let bedrock = UnlocalizedName::engine("bedrock");
        assert_eq!(world.block(BlockPos::new(3, 4, 3)).name(), &grass);
        assert_eq!(world.block(BlockPos::new(3, 0, 3)).name(), &bedrock);
        assert!(world.loaded_chunk_at(ChunkPos::new(0, 1, 0)).unwrap().read().is_air_chunk());
        assert!(!provider.request(ChunkPos::new(0, 0, 0)));
    }

    #[tokio::test]
    async fn failures_leave_the_chunk_unavailable() {
        let world = world();
        let mut provider =
            ChunkProvider::new(world.clone(), Arc::new(FailingSource), Handle::current());
        let bad = ChunkPos::new(-1, 0, 0);

        provider.request(bad);
        assert_eq!(provider.join_pending().await, vec![ProviderEvent::Failed(bad)]);
        assert!(matches!(world.chunk_status(bad), ChunkStatus::Failed(_)));
        assert!(!world.is_loaded(bad));

        assert!(provider.request(bad), "A failed chunk may be requested again.");
        provider.join_pending().await;
    }
}
