use crate::network::{
    packet::{ClientBoundPacket, PacketKind, RegistryMapping, ServerBoundPacket},
    ProtocolError,
};
use std::collections::HashMap;
use voxel_net::{PacketBuffer, PacketSerdeError};
use voxel_util::UnlocalizedName;

/// The session mapping between packet kinds and the ids written in front of every payload.
///
/// Both peers start from the bootstrap mapping, which assigns canonical ids. The server announces
/// the mapping for the rest of the session in Registry-Sync.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PacketRegistry {
    ids: [i32; PacketKind::ALL.len()],
    kinds: HashMap<i32, PacketKind>,
}

impl PacketRegistry {
    /// The mapping in effect before registry synchronization.
    pub fn bootstrap() -> Self {
        let mut ids = [0; PacketKind::ALL.len()];
        let mut kinds = HashMap::with_capacity(ids.len());
        for kind in PacketKind::ALL {
            ids[kind as usize] = kind.canonical_id();
            kinds.insert(kind.canonical_id(), kind);
        }

        PacketRegistry { ids, kinds }
    }

    /// Builds a registry from a synchronized mapping. Every packet kind must be assigned exactly
    /// one distinct, non-negative id.
    pub fn from_mapping(entries: &[(UnlocalizedName, i32)]) -> Result<Self, ProtocolError> {
        let mut ids = [-1; PacketKind::ALL.len()];
        let mut kinds = HashMap::with_capacity(entries.len());

        for (name, id) in entries {
            let kind = PacketKind::from_name(name).ok_or_else(|| {
                ProtocolError::UnknownRegistryEntry {
                    registry: RegistryMapping::PACKETS.to_owned(),
                    name: name.to_string(),
                }
            })?;

            if *id < 0 {
                return Err(ProtocolError::Malformed(format!(
                    "Negative id {} for packet {}",
                    id, name
                )));
            }

            if ids[kind as usize] >= 0 {
                return Err(ProtocolError::Malformed(format!(
                    "Packet {} mapped twice",
                    name
                )));
            }

            if kinds.insert(*id, kind).is_some() {
                return Err(ProtocolError::Malformed(format!(
                    "Packet id {} mapped twice",
                    id
                )));
            }

            ids[kind as usize] = *id;
        }

        if let Some(missing) = PacketKind::ALL.iter().find(|kind| ids[**kind as usize] < 0) {
            return Err(ProtocolError::Malformed(format!(
                "Packet {} missing from mapping",
                missing
            )));
        }

        Ok(PacketRegistry { ids, kinds })
    }

    pub fn to_mapping(&self) -> Vec<(UnlocalizedName, i32)> {
        PacketKind::ALL
            .iter()
            .map(|&kind| (kind.name(), self.id_of(kind)))
            .collect()
    }

    #[inline]
    pub fn id_of(&self, kind: PacketKind) -> i32 {
        self.ids[kind as usize]
    }

    #[inline]
    pub fn kind_of(&self, id: i32) -> Option<PacketKind> {
        self.kinds.get(&id).copied()
    }

    pub fn encode_client_bound(&self, packet: &ClientBoundPacket) -> PacketBuffer {
        let mut buffer = PacketBuffer::new(64);
        buffer.write_varying(&self.id_of(packet.kind()));
        packet.write_body(&mut buffer);
        buffer
    }

    pub fn encode_server_bound(&self, packet: &ServerBoundPacket) -> PacketBuffer {
        let mut buffer = PacketBuffer::new(32);
        buffer.write_varying(&self.id_of(packet.kind()));
        packet.write_body(&mut buffer);
        buffer
    }

    /// Decodes a payload received by a client.
    pub fn decode_client_bound(
        &self,
        mut buffer: PacketBuffer,
    ) -> Result<ClientBoundPacket, ProtocolError> {
        let kind = self.read_kind(&mut buffer)?;
        let packet = ClientBoundPacket::read_body(kind, &mut buffer)?.ok_or_else(|| {
            ProtocolError::Malformed(format!("{} is not a client-bound packet", kind))
        })?;
        Self::expect_end(&buffer)?;
        Ok(packet)
    }

    /// Decodes a payload received by the server.
    pub fn decode_server_bound(
        &self,
        mut buffer: PacketBuffer,
    ) -> Result<ServerBoundPacket, ProtocolError> {
        let kind = self.read_kind(&mut buffer)?;
        let packet = ServerBoundPacket::read_body(kind, &mut buffer)?.ok_or_else(|| {
            ProtocolError::Malformed(format!("{} is not a server-bound packet", kind))
        })?;
        Self::expect_end(&buffer)?;
        Ok(packet)
    }

    fn read_kind(&self, buffer: &mut PacketBuffer) -> Result<PacketKind, PacketSerdeError> {
        let id = buffer.read_varying::<i32>()?;
        self.kind_of(id).ok_or(PacketSerdeError::InvalidId(id))
    }

    fn expect_end(buffer: &PacketBuffer) -> Result<(), PacketSerdeError> {
        match buffer.remaining() {
            0 => Ok(()),
            count => Err(PacketSerdeError::TrailingBytes(count)),
        }
    }
}

impl Default for PacketRegistry {
    fn default() -> Self {
        Self::bootstrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::ChunkPos;

    fn shuffled() -> Vec<(UnlocalizedName, i32)> {
        PacketKind::ALL
            .iter()
            .map(|&kind| (kind.name(), 100 - kind.canonical_id() * 3))
            .collect()
    }

    #[test]
    fn synchronized_ids_are_used() {
        let registry = PacketRegistry::from_mapping(&shuffled()).unwrap();
        let packet = ClientBoundPacket::ChunkUnload {
            pos: ChunkPos::new(1, 2, 3),
        };

        let mut encoded = registry.encode_client_bound(&packet);
        assert_eq!(encoded.read_varying::<i32>().unwrap(), 100 - 9 * 3);
        encoded.reset_cursor();
        assert_eq!(registry.decode_client_bound(encoded.clone()).unwrap(), packet);

        // The same bytes mean something else under the bootstrap mapping
        assert!(PacketRegistry::bootstrap().decode_client_bound(encoded).is_err());
        assert_eq!(
            PacketRegistry::from_mapping(&registry.to_mapping()).unwrap(),
            registry
        );
    }

    #[test]
    fn mappings_are_validated() {
        let mut unknown = shuffled();
        unknown.push((UnlocalizedName::engine("teleport"), 500));
        assert!(matches!(
            PacketRegistry::from_mapping(&unknown),
            Err(ProtocolError::UnknownRegistryEntry { .. })
        ));

        let mut missing = shuffled();
        missing.pop();
        assert!(matches!(
            PacketRegistry::from_mapping(&missing),
            Err(ProtocolError::Malformed(_))
        ));

        let mut clash = shuffled();
        clash[1].1 = clash[0].1;
        assert!(PacketRegistry::from_mapping(&clash).is_err());
    }

    #[test]
    fn direction_and_trailing_bytes() {
        let registry = PacketRegistry::bootstrap();

        let wrong_way = registry.encode_client_bound(&ClientBoundPacket::LoginRequest);
        assert!(matches!(
            registry.decode_server_bound(wrong_way),
            Err(ProtocolError::Malformed(_))
        ));

        let mut padded = registry.encode_server_bound(&ServerBoundPacket::Alive { id: 9 });
        padded.write_one(0);
        assert!(registry.decode_server_bound(padded).is_err());
    }
}
