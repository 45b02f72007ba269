use crate::{
    block::{BlockId, BlockRegistry},
    world::{
        chunk::Chunk,
        location::{ChunkPos, CHUNK_VOLUME},
        WorldError,
    },
};
use std::sync::Arc;
use voxel_net::{PacketBuffer, PacketSerdeError, ReadFromPacket, WriteToPacket};

/// A full copy of one chunk's block ids, detached from any world.
///
/// On the wire this is the chunk position, an air flag, and for non-air chunks the ids as runs:
/// a varint run count followed by `(varint length, varint id)` pairs covering the whole chunk in
/// storage order. Air chunks carry no block data at all.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ChunkSnapshot {
    pub pos: ChunkPos,
    pub ids: Option<Box<[BlockId]>>,
}

impl ChunkSnapshot {
    pub fn of(chunk: &Chunk) -> Self {
        ChunkSnapshot {
            pos: chunk.pos(),
            ids: chunk.ids().map(Box::from),
        }
    }

    #[inline]
    pub fn is_air(&self) -> bool {
        self.ids.is_none()
    }

    /// Materializes this snapshot against the given registry, validating every id.
    pub fn into_chunk(self, registry: Arc<BlockRegistry>) -> Result<Chunk, WorldError> {
        match self.ids {
            Some(ids) => Chunk::from_ids(self.pos, registry, ids),
            None => Ok(Chunk::air(self.pos, registry)),
        }
    }

    fn runs(ids: &[BlockId]) -> Vec<(u32, BlockId)> {
        let mut runs: Vec<(u32, BlockId)> = Vec::new();
        for &id in ids {
            match runs.last_mut() {
                Some((len, last)) if *last == id => *len += 1,
                _ => runs.push((1, id)),
            }
        }
        runs
    }
}

impl WriteToPacket for ChunkSnapshot {
    fn write_to(&self, buffer: &mut PacketBuffer) {
        buffer.write(&self.pos);
        buffer.write(&self.is_air());

        if let Some(ids) = &self.ids {
            let runs = Self::runs(ids);
            buffer.write_varying(&(runs.len() as i32));
            for (len, id) in runs {
                buffer.write_varying(&len);
                buffer.write_varying(&(id as u32));
            }
        }
    }
}

impl ReadFromPacket for ChunkSnapshot {
    fn read_from(buffer: &mut PacketBuffer) -> Result<Self, PacketSerdeError> {
        let pos = buffer.read::<ChunkPos>()?;
        if buffer.read::<bool>()? {
            return Ok(ChunkSnapshot { pos, ids: None });
        }

        let run_count = buffer.read_len(2)?;
        let mut ids = Vec::with_capacity(CHUNK_VOLUME);

        for _ in 0 .. run_count {
            let len = buffer.read_varying::<u32>()? as usize;
            let id = buffer.read_varying::<u32>()?;

            if len == 0 {
                return Err(PacketSerdeError::Internal("Empty block run"));
            }
            if id > BlockId::MAX as u32 {
                return Err(PacketSerdeError::Internal("Block id out of range"));
            }
            if ids.len() + len > CHUNK_VOLUME {
                return Err(PacketSerdeError::Internal("Block runs overflow the chunk"));
            }

            ids.resize(ids.len() + len, id as BlockId);
        }

        if ids.len() != CHUNK_VOLUME {
            return Err(PacketSerdeError::Internal("Block runs do not cover the chunk"));
        }

        Ok(ChunkSnapshot {
            pos,
            ids: Some(ids.into_boxed_slice()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::{location::LocalPos, BlockChangeCause};
    use voxel_util::UnlocalizedName;

    #[test]
    fn snapshot_survives_the_wire() {
        let registry = Arc::new(BlockRegistry::with_defaults());
        let stone = registry.by_name(&UnlocalizedName::engine("stone")).unwrap().clone();
        let mut chunk = Chunk::air(ChunkPos::new(2, -1, 7), registry.clone());
        for (x, y, z) in [(0, 0, 0), (1, 1, 1), (15, 15, 15)] {
            chunk
                .set_block(LocalPos::new(x, y, z).unwrap(), &stone, &BlockChangeCause::WorldGen)
                .unwrap();
        }

        let snapshot = ChunkSnapshot::of(&chunk);
        let mut buffer = PacketBuffer::new(64);
        buffer.write(&snapshot);
        assert!(buffer.len() < 64, "Sparse chunk should compress to a few runs.");

        let decoded = buffer.read::<ChunkSnapshot>().unwrap();
        assert_eq!(decoded, snapshot);
        assert_eq!(buffer.remaining(), 0);

        let rebuilt = decoded.into_chunk(registry).unwrap();
        assert_eq!(rebuilt.ids(), chunk.ids());
    }

    #[test]
    fn air_chunk_is_a_sentinel() {
        let registry = Arc::new(BlockRegistry::with_defaults());
        let snapshot = ChunkSnapshot::of(&Chunk::air(ChunkPos::new(0, 0, 0), registry));

        let mut buffer = PacketBuffer::new(16);
        buffer.write(&snapshot);
        assert_eq!(buffer.len(), 13, "Air chunks carry only a position and a flag.");
        assert!(buffer.read::<ChunkSnapshot>().unwrap().is_air());
    }

    #[test]
    fn short_runs_are_rejected() {
        let mut buffer = PacketBuffer::new(32);
        buffer.write(&ChunkPos::new(0, 0, 0));
        buffer.write(&false);
        buffer.write_varying(&1i32);
        buffer.write_varying(&10u32);
        buffer.write_varying(&1u32);

        assert!(buffer.read::<ChunkSnapshot>().is_err());
    }
}
