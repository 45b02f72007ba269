use crate::world::WorldError;
use static_assertions::const_assert;
use std::{
    fmt::{self, Debug, Display, Formatter},
    hash::{Hash, Hasher},
    ops::{Add, Sub},
};
use voxel_net::{PacketBuffer, PacketSerdeError, ReadFromPacket, WriteToPacket};
use voxel_util::{hash::pack_coordinates, Vector};

/// Number of bits in a chunk-local x coordinate.
pub const CHUNK_X_BITS: u32 = 4;
/// Number of bits in a chunk-local y coordinate.
pub const CHUNK_Y_BITS: u32 = 4;
/// Number of bits in a chunk-local z coordinate.
pub const CHUNK_Z_BITS: u32 = 4;

/// Width of a chunk along the x axis, in blocks.
pub const CHUNK_SIZE_X: i32 = 1 << CHUNK_X_BITS;
/// Height of a chunk along the y axis, in blocks.
pub const CHUNK_SIZE_Y: i32 = 1 << CHUNK_Y_BITS;
/// Depth of a chunk along the z axis, in blocks.
pub const CHUNK_SIZE_Z: i32 = 1 << CHUNK_Z_BITS;
/// Number of blocks stored in one chunk.
pub const CHUNK_VOLUME: usize = (CHUNK_SIZE_X * CHUNK_SIZE_Y * CHUNK_SIZE_Z) as usize;

// Local indices are packed into a usize and chunk positions into 21-bit hash lanes
const_assert!(CHUNK_X_BITS + CHUNK_Y_BITS + CHUNK_Z_BITS <= 24);
const_assert!(CHUNK_X_BITS >= 1 && CHUNK_Y_BITS >= 1 && CHUNK_Z_BITS >= 1);

/// The position of a block in world space.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct BlockPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPos {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        BlockPos { x, y, z }
    }

    /// Returns the block containing the given point. Coordinates outside the `i32` range saturate
    /// to the outermost block.
    pub fn containing(point: Vector<f64>) -> Self {
        BlockPos {
            x: point.x.floor() as i32,
            y: point.y.floor() as i32,
            z: point.z.floor() as i32,
        }
    }

    /// The chunk this block lies in.
    #[inline]
    pub const fn chunk(self) -> ChunkPos {
        ChunkPos::of(self)
    }

    /// The position of this block relative to the origin of its chunk.
    #[inline]
    pub const fn local(self) -> LocalPos {
        LocalPos {
            x: (self.x & (CHUNK_SIZE_X - 1)) as u8,
            y: (self.y & (CHUNK_SIZE_Y - 1)) as u8,
            z: (self.z & (CHUNK_SIZE_Z - 1)) as u8,
        }
    }

    /// Returns the neighbouring block on the given side.
    pub const fn offset(mut self, direction: Direction) -> BlockPos {
        match direction {
            Direction::Down => self.y -= 1,
            Direction::Up => self.y += 1,
            Direction::North => self.z -= 1,
            Direction::South => self.z += 1,
            Direction::West => self.x -= 1,
            Direction::East => self.x += 1,
        }
        self
    }

    /// The point at the center of this block.
    pub fn center(self) -> Vector<f64> {
        Vector::rect(
            self.x as f64 + 0.5,
            self.y as f64 + 0.5,
            self.z as f64 + 0.5,
        )
    }

    /// The point of this block's unit box nearest to the given point.
    pub fn closest_point(self, point: Vector<f64>) -> Vector<f64> {
        let (x, y, z) = (self.x as f64, self.y as f64, self.z as f64);
        Vector::rect(
            point.x.clamp(x, x + 1.0),
            point.y.clamp(y, y + 1.0),
            point.z.clamp(z, z + 1.0),
        )
    }

    /// Whether the given point lies within this block's unit box grown by `margin` on every side.
    pub fn touches(self, point: Vector<f64>, margin: f64) -> bool {
        let min = [self.x as f64, self.y as f64, self.z as f64];
        let point = [point.x, point.y, point.z];
        min.iter()
            .zip(point)
            .all(|(&min, p)| p >= min - margin && p <= min + 1.0 + margin)
    }
}

impl Display for BlockPos {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "x: {}, y: {}, z: {}", self.x, self.y, self.z)
    }
}

impl Debug for BlockPos {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "B({}, {}, {})", self.x, self.y, self.z)
    }
}

impl Add for BlockPos {
    type Output = BlockPos;

    fn add(self, rhs: Self) -> Self::Output {
        BlockPos::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for BlockPos {
    type Output = BlockPos;

    fn sub(self, rhs: Self) -> Self::Output {
        BlockPos::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl ReadFromPacket for BlockPos {
    fn read_from(buffer: &mut PacketBuffer) -> Result<Self, PacketSerdeError> {
        Ok(BlockPos::new(buffer.read()?, buffer.read()?, buffer.read()?))
    }
}

impl WriteToPacket for BlockPos {
    fn write_to(&self, buffer: &mut PacketBuffer) {
        buffer.write(&self.x);
        buffer.write(&self.y);
        buffer.write(&self.z);
    }
}

/// The position of a chunk in chunk space. This is the key of a world's chunk table.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct ChunkPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl ChunkPos {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        ChunkPos { x, y, z }
    }

    /// Returns the chunk containing the given block.
    #[inline]
    pub const fn of(pos: BlockPos) -> Self {
        ChunkPos {
            x: pos.x >> CHUNK_X_BITS,
            y: pos.y >> CHUNK_Y_BITS,
            z: pos.z >> CHUNK_Z_BITS,
        }
    }

    /// The block with the lowest coordinates in this chunk.
    #[inline]
    pub const fn min_block(self) -> BlockPos {
        BlockPos {
            x: self.x << CHUNK_X_BITS,
            y: self.y << CHUNK_Y_BITS,
            z: self.z << CHUNK_Z_BITS,
        }
    }

    /// The block with the highest coordinates in this chunk.
    #[inline]
    pub const fn max_block(self) -> BlockPos {
        let min = self.min_block();
        BlockPos {
            x: min.x + CHUNK_SIZE_X - 1,
            y: min.y + CHUNK_SIZE_Y - 1,
            z: min.z + CHUNK_SIZE_Z - 1,
        }
    }

    /// Translates a chunk-local position back into world space.
    #[inline]
    pub const fn block_at(self, local: LocalPos) -> BlockPos {
        let min = self.min_block();
        BlockPos {
            x: min.x + local.x as i32,
            y: min.y + local.y as i32,
            z: min.z + local.z as i32,
        }
    }

    /// Returns the largest per-axis distance between this chunk and the given chunk on the
    /// horizontal plane, and separately along the y axis.
    pub fn distance(self, other: ChunkPos) -> (i32, i32) {
        let horizontal = (self.x - other.x).abs().max((self.z - other.z).abs());
        (horizontal, (self.y - other.y).abs())
    }
}

impl Hash for ChunkPos {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(pack_coordinates(self.x, self.y, self.z));
    }
}

impl Display for ChunkPos {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "x: {}, y: {}, z: {}", self.x, self.y, self.z)
    }
}

impl Debug for ChunkPos {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "C({}, {}, {})", self.x, self.y, self.z)
    }
}

impl ReadFromPacket for ChunkPos {
    fn read_from(buffer: &mut PacketBuffer) -> Result<Self, PacketSerdeError> {
        Ok(ChunkPos::new(buffer.read()?, buffer.read()?, buffer.read()?))
    }
}

impl WriteToPacket for ChunkPos {
    fn write_to(&self, buffer: &mut PacketBuffer) {
        buffer.write(&self.x);
        buffer.write(&self.y);
        buffer.write(&self.z);
    }
}

/// A block position relative to the origin of its chunk. Every value of this type is inside the
/// chunk volume, so chunk accessors never need to bounds-check.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct LocalPos {
    x: u8,
    y: u8,
    z: u8,
}

impl LocalPos {
    /// Creates a local position, failing if any coordinate is outside `[0, size)` for its axis.
    pub fn new(x: i32, y: i32, z: i32) -> Result<Self, WorldError> {
        if !(0 .. CHUNK_SIZE_X).contains(&x)
            || !(0 .. CHUNK_SIZE_Y).contains(&y)
            || !(0 .. CHUNK_SIZE_Z).contains(&z)
        {
            return Err(WorldError::OutOfBounds { x, y, z });
        }

        Ok(LocalPos {
            x: x as u8,
            y: y as u8,
            z: z as u8,
        })
    }

    /// Rebuilds a local position from its storage index.
    #[inline]
    pub(crate) const fn from_index(index: usize) -> Self {
        LocalPos {
            x: (index & (CHUNK_SIZE_X as usize - 1)) as u8,
            z: ((index >> CHUNK_X_BITS) & (CHUNK_SIZE_Z as usize - 1)) as u8,
            y: (index >> (CHUNK_X_BITS + CHUNK_Z_BITS)) as u8,
        }
    }

    #[inline]
    pub const fn x(self) -> i32 {
        self.x as i32
    }

    #[inline]
    pub const fn y(self) -> i32 {
        self.y as i32
    }

    #[inline]
    pub const fn z(self) -> i32 {
        self.z as i32
    }

    /// The index of this position in dense chunk storage, laid out y-major, then z, then x.
    #[inline]
    pub const fn index(self) -> usize {
        ((self.y as usize) << (CHUNK_X_BITS + CHUNK_Z_BITS))
            | ((self.z as usize) << CHUNK_X_BITS)
            | self.x as usize
    }
}

/// The six faces of a block.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Direction {
    /// -Y
    Down,
    /// +Y
    Up,
    /// -Z
    North,
    /// +Z
    South,
    /// -X
    West,
    /// +X
    East,
}

impl Direction {
    pub const ALL: [Direction; 6] = [
        Direction::Down,
        Direction::Up,
        Direction::North,
        Direction::South,
        Direction::West,
        Direction::East,
    ];

    /// The face struck by a ray travelling along `axis` (0 = x, 1 = y, 2 = z) in the direction
    /// given by the sign of `step`. A ray moving towards +X enters a block through its west face.
    pub fn entered_through(axis: usize, step: i32) -> Self {
        match (axis, step > 0) {
            (0, true) => Direction::West,
            (0, false) => Direction::East,
            (1, true) => Direction::Down,
            (1, false) => Direction::Up,
            (_, true) => Direction::North,
            (_, false) => Direction::South,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Direction::Down => Direction::Up,
            Direction::Up => Direction::Down,
            Direction::North => Direction::South,
            Direction::South => Direction::North,
            Direction::West => Direction::East,
            Direction::East => Direction::West,
        }
    }

    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.get(id as usize).copied()
    }
}

impl ReadFromPacket for Direction {
    fn read_from(buffer: &mut PacketBuffer) -> Result<Self, PacketSerdeError> {
        Direction::from_id(buffer.read_one()?)
            .ok_or(PacketSerdeError::Internal("Invalid block face"))
    }
}

impl WriteToPacket for Direction {
    fn write_to(&self, buffer: &mut PacketBuffer) {
        buffer.write_one(self.id());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_of_negative_blocks() {
        assert_eq!(ChunkPos::of(BlockPos::new(-1, -16, -17)), ChunkPos::new(-1, -1, -2));
        assert_eq!(ChunkPos::of(BlockPos::new(15, 16, 0)), ChunkPos::new(0, 1, 0));
    }

    #[test]
    fn local_position_bounds() {
        assert!(LocalPos::new(0, 0, 0).is_ok());
        assert!(LocalPos::new(15, 15, 15).is_ok());
        assert!(matches!(
            LocalPos::new(16, 0, 0),
            Err(WorldError::OutOfBounds { x: 16, .. })
        ));
        assert!(LocalPos::new(0, -1, 0).is_err());
    }

    #[test]
    fn points_against_the_block_box() {
        let pos = BlockPos::new(2, -1, 5);

        assert!(pos.touches(Vector::rect(2.5, 0.0, 5.5), 0.0));
        assert!(pos.touches(Vector::rect(2.0 - 1e-12, -0.5, 6.0), 1e-9));
        assert!(!pos.touches(Vector::rect(3.5, -0.5, 5.5), 1e-9));
        assert!(!pos.touches(Vector::rect(2.5, -1.5, 5.5), 1e-9));

        assert_eq!(pos.closest_point(Vector::rect(2.25, -0.5, 5.75)), Vector::rect(2.25, -0.5, 5.75));
        assert_eq!(pos.closest_point(Vector::rect(0.0, 10.0, 5.5)), Vector::rect(2.0, 0.0, 5.5));
    }

    #[test]
    fn storage_index_round_trip() {
        for index in 0 .. CHUNK_VOLUME {
            assert_eq!(LocalPos::from_index(index).index(), index);
        }
    }

    #[test]
    fn face_offsets() {
        let origin = BlockPos::new(0, 0, 0);
        for direction in Direction::ALL.iter().copied() {
            let there_and_back = origin.offset(direction).offset(direction.opposite());
            assert_eq!(there_and_back, origin, "{:?} is not undone by its opposite", direction);
            assert_eq!(Direction::from_id(direction.id()), Some(direction));
        }
        assert_eq!(origin.offset(Direction::West), BlockPos::new(-1, 0, 0));
    }
}
