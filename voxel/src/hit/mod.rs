mod raycast;

pub use raycast::*;

use crate::{
    block::Block,
    world::{BlockPos, Direction, World, WorldLookup},
};
use std::{
    fmt::{self, Debug, Formatter},
    sync::Arc,
};
use voxel_net::{PacketBuffer, PacketSerdeError, ReadFromPacket, WriteToPacket};
use voxel_util::Vector;

/// The outcome of a ray cast. A miss is an ordinary result, not an error.
#[derive(Clone, Debug)]
pub enum BlockHitResult<'w> {
    Miss,
    Block(BlockHit<'w>),
}

impl<'w> BlockHitResult<'w> {
    /// Runs the given handler if the ray struck a block.
    pub fn if_success<F>(&self, handler: F)
    where F: FnOnce(&BlockHit<'w>) {
        if let BlockHitResult::Block(hit) = self {
            handler(hit);
        }
    }

    #[inline]
    pub fn is_miss(&self) -> bool {
        matches!(self, BlockHitResult::Miss)
    }

    #[inline]
    pub fn hit(&self) -> Option<&BlockHit<'w>> {
        match self {
            BlockHitResult::Block(hit) => Some(hit),
            BlockHitResult::Miss => None,
        }
    }

    #[inline]
    pub fn into_hit(self) -> Option<BlockHit<'w>> {
        match self {
            BlockHitResult::Block(hit) => Some(hit),
            BlockHitResult::Miss => None,
        }
    }
}

/// A block struck by a ray, resolved against a live world.
#[derive(Clone)]
pub struct BlockHit<'w> {
    world: &'w World,
    pos: BlockPos,
    block: Arc<Block>,
    hit_point: Vector<f64>,
    direction: Direction,
}

impl<'w> BlockHit<'w> {
    #[inline]
    pub fn world(&self) -> &'w World {
        self.world
    }

    #[inline]
    pub fn pos(&self) -> BlockPos {
        self.pos
    }

    #[inline]
    pub fn block(&self) -> &Arc<Block> {
        &self.block
    }

    /// The point where the ray met the block's surface.
    #[inline]
    pub fn hit_point(&self) -> Vector<f64> {
        self.hit_point
    }

    /// The face of the block the ray entered through.
    #[inline]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Strips the world reference, leaving geometry that can be sent over the network or stored.
    pub fn postpone(&self) -> PostponedBlockHit {
        PostponedBlockHit {
            world: self.world.name().to_owned(),
            pos: self.pos,
            hit_point: self.hit_point,
            direction: self.direction,
        }
    }
}

impl Debug for BlockHit<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockHit")
            .field("world", &self.world.name())
            .field("pos", &self.pos)
            .field("block", &self.block)
            .field("hit_point", &self.hit_point)
            .field("direction", &self.direction)
            .finish()
    }
}

impl PartialEq for BlockHit<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.world, other.world)
            && self.pos == other.pos
            && Arc::ptr_eq(&self.block, &other.block)
            && self.hit_point == other.hit_point
            && self.direction == other.direction
    }
}

impl PartialEq for BlockHitResult<'_> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (BlockHitResult::Miss, BlockHitResult::Miss) => true,
            (BlockHitResult::Block(a), BlockHitResult::Block(b)) => a == b,
            _ => false,
        }
    }
}

/// Hit geometry naming its world rather than referencing it, such as a hit read off the wire.
#[derive(Clone, Debug, PartialEq)]
pub struct PostponedBlockHit {
    pub world: String,
    pub pos: BlockPos,
    pub hit_point: Vector<f64>,
    pub direction: Direction,
}

impl PostponedBlockHit {
    /// Resolves this hit against the named world, reading the block currently at the hit position.
    /// Returns `None` if no such world exists.
    pub fn build<'w, L>(&self, worlds: &'w L) -> Option<BlockHit<'w>>
    where L: WorldLookup + ?Sized {
        let world = worlds.world(&self.world)?;
        Some(BlockHit {
            world,
            pos: self.pos,
            block: world.block(self.pos),
            hit_point: self.hit_point,
            direction: self.direction,
        })
    }
}

impl ReadFromPacket for PostponedBlockHit {
    fn read_from(buffer: &mut PacketBuffer) -> Result<Self, PacketSerdeError> {
        Ok(PostponedBlockHit {
            world: buffer.read()?,
            pos: buffer.read()?,
            hit_point: read_vector(buffer)?,
            direction: buffer.read()?,
        })
    }
}

impl WriteToPacket for PostponedBlockHit {
    fn write_to(&self, buffer: &mut PacketBuffer) {
        buffer.write(&self.world);
        buffer.write(&self.pos);
        write_vector(buffer, self.hit_point);
        buffer.write(&self.direction);
    }
}

/// Reads three big-endian doubles as a vector.
pub fn read_vector(buffer: &mut PacketBuffer) -> Result<Vector<f64>, PacketSerdeError> {
    Ok(Vector::rect(buffer.read()?, buffer.read()?, buffer.read()?))
}

pub fn write_vector(buffer: &mut PacketBuffer, vector: Vector<f64>) {
    buffer.write(&vector.x);
    buffer.write(&vector.y);
    buffer.write(&vector.z);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        block::BlockRegistry,
        world::{chunk::Chunk, BlockChangeCause, ChunkPos, WorldStore},
    };
    use voxel_util::UnlocalizedName;

    fn world_with(blocks: &[BlockPos]) -> World {
        let registry = Arc::new(BlockRegistry::with_defaults());
        let stone = registry.by_name(&UnlocalizedName::engine("stone")).unwrap().clone();
        let world = World::new("overworld", registry.clone());
        for x in -1 ..= 1 {
            for y in -1 ..= 1 {
                for z in -1 ..= 1 {
                    world.cache_chunk(Chunk::air(ChunkPos::new(x, y, z), registry.clone()));
                }
            }
        }
        for &pos in blocks {
            world.set_block(pos, &stone, BlockChangeCause::WorldGen).unwrap();
        }
        world
    }

    #[test]
    fn hits_the_near_face() {
        let world = world_with(&[BlockPos::new(5, 5, 5)]);
        let result = world.raycast(Vector::rect(0.0, 5.5, 5.5), Vector::rect(1.0, 0.0, 0.0), 20.0);

        let hit = result.hit().expect("ray should hit");
        assert_eq!(hit.pos(), BlockPos::new(5, 5, 5));
        assert_eq!(hit.direction(), Direction::West);
        assert!((hit.hit_point().x - 5.0).abs() < 1e-9);
        assert_eq!(hit.block().name(), &UnlocalizedName::engine("stone"));
    }

    #[test]
    fn out_of_range_is_a_miss() {
        let world = world_with(&[BlockPos::new(5, 5, 5)]);
        let result = world.raycast(Vector::rect(0.0, 5.5, 5.5), Vector::rect(1.0, 0.0, 0.0), 3.0);
        assert!(result.is_miss());

        let mut called = false;
        result.if_success(|_| called = true);
        assert!(!called, "Handler must not run for a miss.");
    }

    #[test]
    fn origin_on_a_face_looking_away() {
        let world = world_with(&[BlockPos::new(5, 5, 5)]);
        let away = world.raycast(Vector::rect(5.0, 5.5, 5.5), Vector::rect(-1.0, 0.0, 0.0), 10.0);
        assert!(away.is_miss(), "Origin block was reported: {:?}", away);

        let into = world.raycast(Vector::rect(5.0, 5.5, 5.5), Vector::rect(1.0, 0.0, 0.0), 10.0);
        let hit = into.into_hit().unwrap();
        assert_eq!(hit.pos(), BlockPos::new(5, 5, 5));
        assert_eq!(hit.hit_point(), Vector::rect(5.0, 5.5, 5.5));
    }

    #[test]
    fn negative_directions_report_positive_faces() {
        let world = world_with(&[BlockPos::new(-3, 2, 2)]);
        let hit = world
            .raycast(Vector::rect(2.5, 2.5, 2.5), Vector::rect(-1.0, 0.0, 0.0), 10.0)
            .into_hit()
            .unwrap();
        assert_eq!(hit.pos(), BlockPos::new(-3, 2, 2));
        assert_eq!(hit.direction(), Direction::East);
        assert!((hit.hit_point().x + 2.0).abs() < 1e-9);

        let world = world_with(&[BlockPos::new(0, -4, 0)]);
        let hit = world
            .raycast(Vector::rect(0.5, 3.0, 0.5), Vector::rect(0.0, -1.0, 0.0), 10.0)
            .into_hit()
            .unwrap();
        assert_eq!(hit.direction(), Direction::Up);
        assert!((hit.hit_point().y + 3.0).abs() < 1e-9);
    }

    #[test]
    fn diagonal_ties_prefer_x() {
        // The ray passes exactly through the edge shared by (1, 0, 0) and (0, 1, 0)
        let world = world_with(&[BlockPos::new(1, 0, 0), BlockPos::new(0, 1, 0)]);
        let hit = world
            .raycast(Vector::rect(0.5, 0.5, 0.5), Vector::rect(1.0, 1.0, 0.0), 10.0)
            .into_hit()
            .unwrap();
        assert_eq!(hit.pos(), BlockPos::new(1, 0, 0));
        assert_eq!(hit.direction(), Direction::West);
    }

    #[test]
    fn repeated_casts_are_identical() {
        let world = world_with(&[BlockPos::new(7, 3, -6), BlockPos::new(6, 4, -5)]);
        let cast = || {
            world.raycast(
                Vector::rect(-2.3, 0.7, 1.9),
                Vector::rect(0.8, 0.3, -0.75),
                30.0,
            )
        };

        let first = cast();
        for _ in 0 .. 10 {
            assert_eq!(cast(), first);
        }
    }

    #[test]
    fn unloaded_chunks_are_air() {
        let world = world_with(&[]);
        let result = world.raycast(Vector::rect(0.5, 0.5, 0.5), Vector::rect(0.0, 0.0, 1.0), 500.0);
        assert!(result.is_miss());
    }

    #[test]
    fn invalid_rays_miss() {
        let world = world_with(&[BlockPos::new(0, 0, 0)]);
        let origin = Vector::rect(0.5, 0.5, 0.5);
        assert!(world.raycast(origin, Vector::zero(), 10.0).is_miss());
        assert!(world.raycast(origin, Vector::rect(1.0, 0.0, 0.0), f64::NAN).is_miss());
        assert!(world.raycast(origin, Vector::rect(1.0, 0.0, 0.0), -1.0).is_miss());
        assert!(world
            .raycast(Vector::rect(1e10, 0.5, 0.5), Vector::rect(-1.0, 0.0, 0.0), 10.0)
            .is_miss());
    }

    #[test]
    fn long_ranges_are_clamped() {
        let world = world_with(&[BlockPos::new(3, 0, 0)]);
        let origin = Vector::rect(0.5, 0.5, 0.5);
        let east = Vector::rect(1.0, 0.0, 0.0);

        assert_eq!(RayCast::new(origin, east, f64::INFINITY).max_distance(), MAX_RAY_DISTANCE);
        let hit = world.raycast(origin, east, f64::INFINITY).into_hit().unwrap();
        assert_eq!(hit.pos(), BlockPos::new(3, 0, 0));

        let beyond = BlockPos::new(MAX_RAY_DISTANCE as i32 + 10, 0, 0);
        let registry = world.registry().clone();
        world.cache_chunk(Chunk::air(beyond.chunk(), registry.clone()));
        world.set_block(BlockPos::new(3, 0, 0), registry.air(), BlockChangeCause::WorldGen).unwrap();
        world
            .set_block(beyond, registry.block(1).unwrap(), BlockChangeCause::WorldGen)
            .unwrap();
        assert!(world.raycast(origin, east, 1e12).is_miss());
    }

    #[test]
    fn rays_stop_at_the_edge_of_the_coordinate_space() {
        let world = world_with(&[]);
        let origin = Vector::rect(i32::MAX as f64 - 100.5, 0.5, 0.5);

        assert!(world.raycast(origin, Vector::rect(1.0, 0.0, 0.0), 500.0).is_miss());
        assert!(world
            .raycast(Vector::rect(0.5, i32::MIN as f64 + 10.5, 0.5), Vector::rect(0.0, -1.0, 0.0), 500.0)
            .is_miss());
    }

    #[test]
    fn postponed_hits_resolve_by_name() {
        let mut store = WorldStore::new();
        store.insert(Arc::new(world_with(&[BlockPos::new(5, 5, 5)])));
        let world = store.world("overworld").unwrap();

        let postponed = world
            .raycast(Vector::rect(0.0, 5.5, 5.5), Vector::rect(1.0, 0.0, 0.0), 20.0)
            .into_hit()
            .unwrap()
            .postpone();

        let mut buffer = PacketBuffer::new(64);
        buffer.write(&postponed);
        let decoded = buffer.read::<PostponedBlockHit>().unwrap();
        assert_eq!(decoded, postponed);

        let rebuilt = decoded.build(&store).unwrap();
        assert_eq!(rebuilt.pos(), BlockPos::new(5, 5, 5));
        assert!(std::ptr::eq(rebuilt.world(), world));

        let elsewhere = PostponedBlockHit {
            world: "nether".to_owned(),
            ..decoded
        };
        assert!(elsewhere.build(&store).is_none());
    }
}
