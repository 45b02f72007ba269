mod registry;

pub use registry::*;

use std::fmt::{self, Debug, Display, Formatter};
use voxel_util::UnlocalizedName;

/// The numeric id of a block within one session's registry.
pub type BlockId = u16;

/// The capability table of a block. The storage and hit-test core only ever asks these three
/// questions of a block, so behaviour is data rather than a trait object.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct BlockBehavior {
    /// Whether the block occupies its whole cell for collision purposes.
    pub solid: bool,
    /// Whether light and sight pass through the block.
    pub transparent: bool,
    /// Whether entities can move through the block, and blocks may be placed into it.
    pub passable: bool,
}

impl BlockBehavior {
    /// Empty space.
    pub const AIR: Self = BlockBehavior {
        solid: false,
        transparent: true,
        passable: true,
    };
    /// An ordinary full block such as stone.
    pub const OPAQUE: Self = BlockBehavior {
        solid: true,
        transparent: false,
        passable: false,
    };
    /// A full block that can be seen through, such as glass.
    pub const GLASS: Self = BlockBehavior {
        solid: true,
        transparent: true,
        passable: false,
    };
    /// Decoration or fluid that does not obstruct movement, such as tall grass or water.
    pub const FOLIAGE: Self = BlockBehavior {
        solid: false,
        transparent: true,
        passable: true,
    };
}

/// A block type. Blocks are shared between chunks and registries through `Arc`s; the numeric id of
/// a block is not part of the block since it may change from one session to the next.
pub struct Block {
    name: UnlocalizedName,
    behavior: BlockBehavior,
}

impl Block {
    pub fn new(name: UnlocalizedName, behavior: BlockBehavior) -> Self {
        Block { name, behavior }
    }

    /// The namespaced key identifying this block.
    #[inline]
    pub fn name(&self) -> &UnlocalizedName {
        &self.name
    }

    #[inline]
    pub fn behavior(&self) -> BlockBehavior {
        self.behavior
    }

    #[inline]
    pub fn is_solid(&self) -> bool {
        self.behavior.solid
    }

    #[inline]
    pub fn is_passable(&self) -> bool {
        self.behavior.passable
    }
}

impl PartialEq for Block {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Block {}

impl Display for Block {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.name, f)
    }
}

impl Debug for Block {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}
