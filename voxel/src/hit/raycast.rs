use crate::{
    block::{BlockId, AIR_ID},
    hit::{BlockHit, BlockHitResult},
    world::{BlockPos, ChunkPos, ChunkRef, Direction, World},
};
use voxel_util::Vector;

/// Distance within which a ray origin is considered to lie exactly on a block boundary. An origin
/// on a boundary starts in the block the ray moves into, never in the block it leaves.
pub const RAY_EPSILON: f64 = 1e-9;

/// The longest distance a single cast travels. Longer ranges, including an infinite one, are
/// clamped to it.
pub const MAX_RAY_DISTANCE: f64 = 1024.0;

// Origins must floor to a representable block
const MAX_ORIGIN_COORDINATE: f64 = i32::MAX as f64;

/// A ray through voxel space with a maximum travel distance.
///
/// Casting walks the ray one block at a time, always crossing the nearest block boundary next,
/// and stops at the first block that is not air. When boundaries on several axes are equally
/// near, x is crossed first, then y, then z. Chunks that are not loaded are traversed as air. A
/// ray that would step past the edge of the block coordinate space misses.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RayCast {
    origin: Vector<f64>,
    direction: Vector<f64>,
    max_distance: f64,
}

impl RayCast {
    /// Creates a ray. The direction is normalized here, so callers may pass any non-zero vector.
    /// The range is clamped to `MAX_RAY_DISTANCE`.
    pub fn new(origin: Vector<f64>, direction: Vector<f64>, max_distance: f64) -> Self {
        RayCast {
            origin,
            direction: direction.normalized(),
            max_distance: if max_distance > MAX_RAY_DISTANCE {
                MAX_RAY_DISTANCE
            } else {
                max_distance
            },
        }
    }

    #[inline]
    pub fn origin(&self) -> Vector<f64> {
        self.origin
    }

    #[inline]
    pub fn direction(&self) -> Vector<f64> {
        self.direction
    }

    #[inline]
    pub fn max_distance(&self) -> f64 {
        self.max_distance
    }

    /// Whether this ray can be traversed at all. Rays with a zero or non-finite direction, an
    /// origin outside the block coordinate space, or a negative or NaN range always miss.
    pub fn is_valid(&self) -> bool {
        let origin = [self.origin.x, self.origin.y, self.origin.z];
        origin
            .iter()
            .all(|coord| coord.is_finite() && coord.abs() < MAX_ORIGIN_COORDINATE)
            && self.direction.is_finite()
            && self.direction.len_sq() > 0.0
            && self.max_distance >= 0.0
    }

    /// Walks this ray through the given world.
    pub fn cast<'w>(&self, world: &'w World) -> BlockHitResult<'w> {
        if !self.is_valid() {
            return BlockHitResult::Miss;
        }

        let origin = [self.origin.x, self.origin.y, self.origin.z];
        let direction = [self.direction.x, self.direction.y, self.direction.z];

        let mut cell = [0i32; 3];
        let mut step = [0i32; 3];
        let mut t_max = [f64::INFINITY; 3];
        let mut t_delta = [f64::INFINITY; 3];

        for axis in 0 .. 3 {
            let (o, d) = (origin[axis], direction[axis]);
            cell[axis] = start_cell(o, d);

            if d > 0.0 {
                step[axis] = 1;
                t_max[axis] = (cell[axis] as f64 + 1.0 - o) / d;
                t_delta[axis] = 1.0 / d;
            } else if d < 0.0 {
                step[axis] = -1;
                t_max[axis] = (cell[axis] as f64 - o) / d;
                t_delta[axis] = -1.0 / d;
            }
        }

        let mut chunks = ChunkCursor::new(world);
        let mut distance = 0.0;
        let dominant = dominant_axis(direction);
        let mut face = Direction::entered_through(dominant, step[dominant]);

        loop {
            let pos = BlockPos::new(cell[0], cell[1], cell[2]);
            let id = chunks.block_id(pos);

            if id != AIR_ID {
                if let Some(block) = world.registry().block(id) {
                    let hit_point = if distance == 0.0 {
                        self.origin
                    } else {
                        self.origin + self.direction * distance
                    };

                    return BlockHitResult::Block(BlockHit {
                        world,
                        pos,
                        block: block.clone(),
                        hit_point,
                        direction: face,
                    });
                }
            }

            let axis = next_axis(&t_max);
            distance = t_max[axis];
            if distance > self.max_distance {
                return BlockHitResult::Miss;
            }

            cell[axis] = match cell[axis].checked_add(step[axis]) {
                Some(next) => next,
                None => return BlockHitResult::Miss,
            };
            t_max[axis] += t_delta[axis];
            face = Direction::entered_through(axis, step[axis]);
        }
    }
}

// The block a ray starts in along one axis. Origins within RAY_EPSILON of a boundary are snapped
// onto it and assigned to the block on the side the ray is heading.
fn start_cell(origin: f64, direction: f64) -> i32 {
    let nearest = origin.round();
    if (origin - nearest).abs() < RAY_EPSILON {
        if direction < 0.0 {
            nearest as i32 - 1
        } else {
            nearest as i32
        }
    } else {
        origin.floor() as i32
    }
}

// Nearest boundary first; ties go to x, then y, then z.
#[inline]
fn next_axis(t_max: &[f64; 3]) -> usize {
    if t_max[0] <= t_max[1] && t_max[0] <= t_max[2] {
        0
    } else if t_max[1] <= t_max[2] {
        1
    } else {
        2
    }
}

fn dominant_axis(direction: [f64; 3]) -> usize {
    let abs = direction.map(f64::abs);
    if abs[0] >= abs[1] && abs[0] >= abs[2] {
        0
    } else if abs[1] >= abs[2] {
        1
    } else {
        2
    }
}

// Consecutive blocks along a ray almost always share a chunk, so keep the last one around. A chunk
// unloaded mid-cast stays readable through the held reference.
struct ChunkCursor<'w> {
    world: &'w World,
    current: Option<(ChunkPos, Option<ChunkRef>)>,
}

impl<'w> ChunkCursor<'w> {
    fn new(world: &'w World) -> Self {
        ChunkCursor {
            world,
            current: None,
        }
    }

    fn block_id(&mut self, pos: BlockPos) -> BlockId {
        let chunk_pos = pos.chunk();
        if !matches!(&self.current, Some((cached, _)) if *cached == chunk_pos) {
            self.current = Some((chunk_pos, self.world.loaded_chunk_at(chunk_pos)));
        }

        match &self.current {
            Some((_, Some(chunk))) => chunk.read().block_id(pos.local()),
            _ => AIR_ID,
        }
    }
}
