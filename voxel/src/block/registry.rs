use crate::block::{Block, BlockBehavior, BlockId};
use log::debug;
use std::{
    collections::HashMap,
    error::Error,
    fmt::{self, Display, Formatter},
    sync::Arc,
};
use voxel_util::UnlocalizedName;

/// The id reserved for air in every session.
pub const AIR_ID: BlockId = 0;

/// A session-scoped bijection between blocks and their numeric ids. Chunk storage and the wire
/// protocol only ever carry ids, so every consumer of a world must resolve them through the same
/// registry instance, which is shared by `Arc` rather than through a global.
pub struct BlockRegistry {
    by_id: Vec<Option<Arc<Block>>>,
    by_name: HashMap<UnlocalizedName, BlockId>,
    air: Arc<Block>,
}

impl BlockRegistry {
    /// Starts a registry containing only air, at id zero.
    pub fn builder() -> BlockRegistryBuilder {
        BlockRegistryBuilder {
            blocks: vec![Arc::new(Block::new(
                UnlocalizedName::engine("air"),
                BlockBehavior::AIR,
            ))],
        }
    }

    /// The registry of blocks every engine process knows about.
    pub fn with_defaults() -> Self {
        let mut builder = Self::builder();
        builder
            .register(UnlocalizedName::engine("stone"), BlockBehavior::OPAQUE)
            .register(UnlocalizedName::engine("dirt"), BlockBehavior::OPAQUE)
            .register(UnlocalizedName::engine("grass"), BlockBehavior::OPAQUE)
            .register(UnlocalizedName::engine("bedrock"), BlockBehavior::OPAQUE)
            .register(UnlocalizedName::engine("glass"), BlockBehavior::GLASS)
            .register(UnlocalizedName::engine("water"), BlockBehavior::FOLIAGE)
            .register(UnlocalizedName::engine("tall_grass"), BlockBehavior::FOLIAGE);

        match builder.build() {
            Ok(registry) => registry,
            Err(error) => unreachable!("Default block registry is inconsistent: {}", error),
        }
    }

    /// The air block of this registry.
    #[inline]
    pub fn air(&self) -> &Arc<Block> {
        &self.air
    }

    /// Returns the id of the given block, or `None` if it is not registered.
    #[inline]
    pub fn id_of(&self, block: &Block) -> Option<BlockId> {
        self.by_name.get(block.name()).copied()
    }

    /// Returns the block with the given id.
    #[inline]
    pub fn block(&self, id: BlockId) -> Option<&Arc<Block>> {
        self.by_id.get(id as usize).and_then(Option::as_ref)
    }

    /// Returns the block with the given name.
    pub fn by_name(&self, name: &UnlocalizedName) -> Option<&Arc<Block>> {
        self.by_name.get(name).and_then(|&id| self.block(id))
    }

    /// Returns the number of registered blocks.
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Iterates over every registered block and its id, in id order.
    pub fn iter(&self) -> impl Iterator<Item = (BlockId, &Arc<Block>)> + '_ {
        self.by_id
            .iter()
            .enumerate()
            .filter_map(|(id, block)| block.as_ref().map(|block| (id as BlockId, block)))
    }

    /// The name to id table sent to peers during registry synchronization.
    pub fn to_mapping(&self) -> Vec<(UnlocalizedName, BlockId)> {
        self.iter()
            .map(|(id, block)| (block.name().clone(), id))
            .collect()
    }

    /// Builds the registry a peer should use for a session given the authoritative mapping. Block
    /// definitions come from this registry, ids come from the mapping. Every name in the mapping
    /// must be known locally, each name and id may appear once, and air must sit at id zero.
    pub fn remap(&self, mapping: &[(UnlocalizedName, BlockId)]) -> Result<Self, RegistryError> {
        let max_id = mapping.iter().map(|&(_, id)| id as usize).max().unwrap_or(0);
        let mut by_id: Vec<Option<Arc<Block>>> = vec![None; max_id + 1];
        let mut by_name = HashMap::with_capacity(mapping.len());

        for (name, id) in mapping {
            let block = self
                .by_name(name)
                .ok_or_else(|| RegistryError::UnknownName(name.clone()))?;

            if by_name.insert(name.clone(), *id).is_some() {
                return Err(RegistryError::DuplicateName(name.clone()));
            }

            let slot = &mut by_id[*id as usize];
            if slot.is_some() {
                return Err(RegistryError::DuplicateId(*id));
            }
            *slot = Some(block.clone());
        }

        let air = match by_id.first() {
            Some(Some(block)) if Arc::ptr_eq(block, &self.air) => block.clone(),
            _ => return Err(RegistryError::AirNotAtZero),
        };

        let dropped = self.len() - by_name.len();
        if dropped > 0 {
            debug!("{} local blocks are unused this session", dropped);
        }

        Ok(BlockRegistry { by_id, by_name, air })
    }
}

/// Collects block definitions, assigning ids in registration order.
pub struct BlockRegistryBuilder {
    blocks: Vec<Arc<Block>>,
}

impl BlockRegistryBuilder {
    pub fn register(&mut self, name: UnlocalizedName, behavior: BlockBehavior) -> &mut Self {
        self.blocks.push(Arc::new(Block::new(name, behavior)));
        self
    }

    pub fn build(&mut self) -> Result<BlockRegistry, RegistryError> {
        if self.blocks.len() > BlockId::MAX as usize {
            return Err(RegistryError::TooManyBlocks(self.blocks.len()));
        }

        let mut by_name = HashMap::with_capacity(self.blocks.len());
        for (id, block) in self.blocks.iter().enumerate() {
            if by_name.insert(block.name().clone(), id as BlockId).is_some() {
                return Err(RegistryError::DuplicateName(block.name().clone()));
            }
        }

        let air = self.blocks[AIR_ID as usize].clone();
        Ok(BlockRegistry {
            by_id: self.blocks.drain(..).map(Some).collect(),
            by_name,
            air,
        })
    }
}

/// An inconsistency found while building or remapping a registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// A name appeared twice.
    DuplicateName(UnlocalizedName),
    /// An id appeared twice.
    DuplicateId(BlockId),
    /// A synchronized mapping referenced a block this process has no definition for.
    UnknownName(UnlocalizedName),
    /// Id zero was missing or was not air.
    AirNotAtZero,
    /// More blocks than ids.
    TooManyBlocks(usize),
}

impl Display for RegistryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::DuplicateName(name) => write!(f, "Block {} registered twice", name),
            RegistryError::DuplicateId(id) => write!(f, "Block id {} assigned twice", id),
            RegistryError::UnknownName(name) => write!(f, "Unknown block {}", name),
            RegistryError::AirNotAtZero => write!(f, "Block id 0 must be air"),
            RegistryError::TooManyBlocks(count) =>
                write!(f, "{} blocks exceed the id space", count),
        }
    }
}

impl Error for RegistryError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(identifier: &str) -> UnlocalizedName {
        UnlocalizedName::engine(identifier)
    }

    #[test]
    fn ids_and_blocks_agree() {
        let registry = BlockRegistry::with_defaults();
        for (id, block) in registry.iter() {
            assert_eq!(registry.id_of(block), Some(id), "Id mismatch for {}", block);
            assert!(Arc::ptr_eq(registry.block(id).unwrap(), block));
        }
        assert_eq!(registry.id_of(registry.air()), Some(AIR_ID));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let result = BlockRegistry::builder()
            .register(name("stone"), BlockBehavior::OPAQUE)
            .register(name("stone"), BlockBehavior::GLASS)
            .build();
        assert!(matches!(result, Err(RegistryError::DuplicateName(_))));
    }

    #[test]
    fn remap_follows_the_mapping() {
        let local = BlockRegistry::with_defaults();
        let mapping = vec![(name("air"), 0), (name("glass"), 3), (name("stone"), 7)];
        let session = local.remap(&mapping).unwrap();

        let stone = session.block(7).unwrap();
        assert_eq!(stone.name(), &name("stone"));
        assert!(Arc::ptr_eq(stone, local.by_name(&name("stone")).unwrap()));
        assert_eq!(session.id_of(stone), Some(7));
        assert!(session.block(1).is_none(), "Unmapped ids must not resolve.");
        assert!(session.by_name(&name("dirt")).is_none());
    }

    #[test]
    fn remap_validation() {
        let local = BlockRegistry::with_defaults();

        let unknown = vec![(name("air"), 0), (name("obsidian"), 1)];
        assert_eq!(
            local.remap(&unknown).err(),
            Some(RegistryError::UnknownName(name("obsidian")))
        );

        let no_air = vec![(name("stone"), 0)];
        assert_eq!(local.remap(&no_air).err(), Some(RegistryError::AirNotAtZero));

        let clash = vec![(name("air"), 0), (name("stone"), 2), (name("dirt"), 2)];
        assert_eq!(local.remap(&clash).err(), Some(RegistryError::DuplicateId(2)));
    }
}
