use crate::{
    block::BlockId,
    hit::{read_vector, write_vector, PostponedBlockHit},
    world::{chunk::ChunkSnapshot, BlockPos, ChunkPos},
};
use std::fmt::{self, Display, Formatter};
use uuid::Uuid;
use voxel_net::{ConnectionState, PacketBuffer, PacketSerdeError, ReadFromPacket, WriteToPacket};
use voxel_util::{UnlocalizedName, Vector};

use ConnectionState::*;

/// Every packet type in the protocol. The canonical id of a kind is its position in `ALL`; the ids
/// actually used for a session are negotiated during registry synchronization.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum PacketKind {
    Handshake,
    Disconnect,
    Alive,
    LoginRequest,
    LoginProfile,
    LoginSuccess,
    RegistrySync,
    GameData,
    ChunkData,
    ChunkUnload,
    BlockUpdate,
    PlayerMove,
    PlayerPosView,
    PlayerPosViewConfirm,
    PlayerAction,
}

impl PacketKind {
    pub const ALL: [PacketKind; 15] = [
        PacketKind::Handshake,
        PacketKind::Disconnect,
        PacketKind::Alive,
        PacketKind::LoginRequest,
        PacketKind::LoginProfile,
        PacketKind::LoginSuccess,
        PacketKind::RegistrySync,
        PacketKind::GameData,
        PacketKind::ChunkData,
        PacketKind::ChunkUnload,
        PacketKind::BlockUpdate,
        PacketKind::PlayerMove,
        PacketKind::PlayerPosView,
        PacketKind::PlayerPosViewConfirm,
        PacketKind::PlayerAction,
    ];

    /// The identifier of this packet within the packet registry.
    pub fn identifier(self) -> &'static str {
        match self {
            PacketKind::Handshake => "handshake",
            PacketKind::Disconnect => "disconnect",
            PacketKind::Alive => "alive",
            PacketKind::LoginRequest => "login-request",
            PacketKind::LoginProfile => "login-profile",
            PacketKind::LoginSuccess => "login-success",
            PacketKind::RegistrySync => "registry-sync",
            PacketKind::GameData => "game-data",
            PacketKind::ChunkData => "chunk-data",
            PacketKind::ChunkUnload => "chunk-unload",
            PacketKind::BlockUpdate => "block-update",
            PacketKind::PlayerMove => "player-move",
            PacketKind::PlayerPosView => "player-posview",
            PacketKind::PlayerPosViewConfirm => "player-posview-confirm",
            PacketKind::PlayerAction => "player-action",
        }
    }

    pub fn name(self) -> UnlocalizedName {
        UnlocalizedName::engine(self.identifier())
    }

    #[inline]
    pub fn canonical_id(self) -> i32 {
        self as i32
    }

    pub fn from_name(name: &UnlocalizedName) -> Option<Self> {
        if name.namespace != UnlocalizedName::DEFAULT_NAMESPACE {
            return None;
        }

        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.identifier() == name.identifier)
    }

    /// Whether a client may send this packet to the server while the server side of the
    /// connection is in the given phase.
    pub fn server_bound_in(self, phase: ConnectionState) -> bool {
        match self {
            PacketKind::Handshake => phase == Handshake,
            PacketKind::LoginProfile => phase == Login,
            PacketKind::PlayerMove | PacketKind::PlayerPosViewConfirm | PacketKind::PlayerAction =>
                phase == Playing,
            PacketKind::Alive => phase == Playing,
            PacketKind::Disconnect => phase != Disconnected,
            _ => false,
        }
    }

    /// Whether the server may send this packet to a client whose side of the connection is in
    /// the given phase.
    pub fn client_bound_in(self, phase: ConnectionState) -> bool {
        match self {
            PacketKind::LoginRequest | PacketKind::LoginSuccess => phase == Login,
            PacketKind::RegistrySync => phase == RegistrySync,
            PacketKind::GameData => phase == GameData,
            PacketKind::ChunkData
            | PacketKind::ChunkUnload
            | PacketKind::BlockUpdate
            | PacketKind::PlayerPosView
            | PacketKind::Alive => phase == Playing,
            PacketKind::Disconnect => phase != Disconnected,
            _ => false,
        }
    }
}

impl Display for PacketKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.identifier())
    }
}

/// The two things a player can do to a block.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PlayerActionKind {
    /// Replace the targeted block with air.
    DestroyBlock,
    /// Put a block next to the targeted block, on the face the hit entered through.
    PlaceBlock(BlockId),
}

impl ReadFromPacket for PlayerActionKind {
    fn read_from(buffer: &mut PacketBuffer) -> Result<Self, PacketSerdeError> {
        match buffer.read_one()? {
            0 => Ok(PlayerActionKind::DestroyBlock),
            1 => {
                let id = buffer.read_varying::<u32>()?;
                if id > BlockId::MAX as u32 {
                    return Err(PacketSerdeError::Internal("Block id out of range"));
                }
                Ok(PlayerActionKind::PlaceBlock(id as BlockId))
            }
            _ => Err(PacketSerdeError::Internal("Invalid player action")),
        }
    }
}

impl WriteToPacket for PlayerActionKind {
    fn write_to(&self, buffer: &mut PacketBuffer) {
        match self {
            PlayerActionKind::DestroyBlock => buffer.write_one(0),
            PlayerActionKind::PlaceBlock(id) => {
                buffer.write_one(1);
                buffer.write_varying(&(*id as u32));
            }
        }
    }
}

/// One named registry and its name to id table, as carried by Registry-Sync.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct RegistryMapping {
    pub registry: UnlocalizedName,
    pub entries: Vec<(UnlocalizedName, i32)>,
}

impl RegistryMapping {
    pub const BLOCKS: &'static str = "block";
    pub const PACKETS: &'static str = "packet";
}

impl ReadFromPacket for RegistryMapping {
    fn read_from(buffer: &mut PacketBuffer) -> Result<Self, PacketSerdeError> {
        let registry = read_name(buffer)?;
        let len = buffer.read_len(2)?;
        let mut entries = Vec::with_capacity(len);
        for _ in 0 .. len {
            entries.push((read_name(buffer)?, buffer.read_varying()?));
        }

        Ok(RegistryMapping { registry, entries })
    }
}

impl WriteToPacket for RegistryMapping {
    fn write_to(&self, buffer: &mut PacketBuffer) {
        buffer.write(&self.registry.to_string());
        buffer.write_varying(&(self.entries.len() as i32));
        for (name, id) in &self.entries {
            buffer.write(&name.to_string());
            buffer.write_varying(id);
        }
    }
}

fn read_name(buffer: &mut PacketBuffer) -> Result<UnlocalizedName, PacketSerdeError> {
    buffer
        .read::<String>()?
        .parse()
        .map_err(|_| PacketSerdeError::Internal("Invalid namespaced key"))
}

/// A player position and look direction.
#[derive(Clone, Copy, PartialEq, Debug, Default)]
pub struct PosView {
    pub position: Vector<f64>,
    pub yaw: f32,
    pub pitch: f32,
}

impl PosView {
    pub fn new(position: Vector<f64>, yaw: f32, pitch: f32) -> Self {
        PosView {
            position,
            yaw,
            pitch,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.position.is_finite() && self.yaw.is_finite() && self.pitch.is_finite()
    }

    /// The unit vector this view looks along.
    pub fn look(&self) -> Vector<f64> {
        Vector::principal_axes(
            1.0,
            (self.yaw as f64).to_radians(),
            (self.pitch as f64).to_radians(),
        )
    }
}

impl ReadFromPacket for PosView {
    fn read_from(buffer: &mut PacketBuffer) -> Result<Self, PacketSerdeError> {
        Ok(PosView {
            position: read_vector(buffer)?,
            yaw: buffer.read()?,
            pitch: buffer.read()?,
        })
    }
}

impl WriteToPacket for PosView {
    fn write_to(&self, buffer: &mut PacketBuffer) {
        write_vector(buffer, self.position);
        buffer.write(&self.yaw);
        buffer.write(&self.pitch);
    }
}

/// Packets sent from the client to the server.
#[derive(Clone, PartialEq, Debug)]
pub enum ServerBoundPacket {
    Handshake {
        protocol_version: i32,
    },
    LoginProfile {
        uuid: Uuid,
        name: String,
    },
    PlayerMove {
        sequence: u32,
        view: PosView,
    },
    PlayerPosViewConfirm {
        sequence: u32,
    },
    PlayerAction {
        action: PlayerActionKind,
        hit: PostponedBlockHit,
    },
    Alive {
        id: i64,
    },
    Disconnect {
        reason: String,
    },
}

impl ServerBoundPacket {
    pub fn kind(&self) -> PacketKind {
        match self {
            ServerBoundPacket::Handshake { .. } => PacketKind::Handshake,
            ServerBoundPacket::LoginProfile { .. } => PacketKind::LoginProfile,
            ServerBoundPacket::PlayerMove { .. } => PacketKind::PlayerMove,
            ServerBoundPacket::PlayerPosViewConfirm { .. } => PacketKind::PlayerPosViewConfirm,
            ServerBoundPacket::PlayerAction { .. } => PacketKind::PlayerAction,
            ServerBoundPacket::Alive { .. } => PacketKind::Alive,
            ServerBoundPacket::Disconnect { .. } => PacketKind::Disconnect,
        }
    }

    pub fn write_body(&self, buffer: &mut PacketBuffer) {
        match self {
            ServerBoundPacket::Handshake { protocol_version } =>
                buffer.write_varying(protocol_version),
            ServerBoundPacket::LoginProfile { uuid, name } => {
                buffer.write(uuid);
                buffer.write(name);
            }
            ServerBoundPacket::PlayerMove { sequence, view } => {
                buffer.write_varying(sequence);
                buffer.write(view);
            }
            ServerBoundPacket::PlayerPosViewConfirm { sequence } => buffer.write_varying(sequence),
            ServerBoundPacket::PlayerAction { action, hit } => {
                buffer.write(action);
                buffer.write(hit);
            }
            ServerBoundPacket::Alive { id } => buffer.write(id),
            ServerBoundPacket::Disconnect { reason } => buffer.write(reason),
        }
    }

    /// Reads the body of a packet of the given kind. Returns `None` if the kind is not sent by
    /// clients.
    pub fn read_body(
        kind: PacketKind,
        buffer: &mut PacketBuffer,
    ) -> Result<Option<Self>, PacketSerdeError> {
        let packet = match kind {
            PacketKind::Handshake => ServerBoundPacket::Handshake {
                protocol_version: buffer.read_varying()?,
            },
            PacketKind::LoginProfile => ServerBoundPacket::LoginProfile {
                uuid: buffer.read()?,
                name: buffer.read()?,
            },
            PacketKind::PlayerMove => ServerBoundPacket::PlayerMove {
                sequence: buffer.read_varying()?,
                view: buffer.read()?,
            },
            PacketKind::PlayerPosViewConfirm => ServerBoundPacket::PlayerPosViewConfirm {
                sequence: buffer.read_varying()?,
            },
            PacketKind::PlayerAction => ServerBoundPacket::PlayerAction {
                action: buffer.read()?,
                hit: buffer.read()?,
            },
            PacketKind::Alive => ServerBoundPacket::Alive { id: buffer.read()? },
            PacketKind::Disconnect => ServerBoundPacket::Disconnect {
                reason: buffer.read()?,
            },
            _ => return Ok(None),
        };

        Ok(Some(packet))
    }
}

/// Packets sent from the server to the client.
#[derive(Clone, PartialEq, Debug)]
pub enum ClientBoundPacket {
    LoginRequest,
    LoginSuccess {
        uuid: Uuid,
        name: String,
    },
    RegistrySync {
        registries: Vec<RegistryMapping>,
    },
    GameData {
        world: String,
        view_distance: u32,
        vertical_view_distance: u32,
        max_move_distance: f64,
        keepalive_timeout_ms: u64,
    },
    ChunkData {
        chunk: ChunkSnapshot,
    },
    ChunkUnload {
        pos: ChunkPos,
    },
    BlockUpdate {
        pos: BlockPos,
        block: BlockId,
    },
    PlayerPosView {
        sequence: u32,
        /// The latest move sequence the server had accepted when it sent this view.
        move_sequence: u32,
        view: PosView,
    },
    Alive {
        id: i64,
    },
    Disconnect {
        reason: String,
    },
}

impl ClientBoundPacket {
    pub fn kind(&self) -> PacketKind {
        match self {
            ClientBoundPacket::LoginRequest => PacketKind::LoginRequest,
            ClientBoundPacket::LoginSuccess { .. } => PacketKind::LoginSuccess,
            ClientBoundPacket::RegistrySync { .. } => PacketKind::RegistrySync,
            ClientBoundPacket::GameData { .. } => PacketKind::GameData,
            ClientBoundPacket::ChunkData { .. } => PacketKind::ChunkData,
            ClientBoundPacket::ChunkUnload { .. } => PacketKind::ChunkUnload,
            ClientBoundPacket::BlockUpdate { .. } => PacketKind::BlockUpdate,
            ClientBoundPacket::PlayerPosView { .. } => PacketKind::PlayerPosView,
            ClientBoundPacket::Alive { .. } => PacketKind::Alive,
            ClientBoundPacket::Disconnect { .. } => PacketKind::Disconnect,
        }
    }

    pub fn write_body(&self, buffer: &mut PacketBuffer) {
        match self {
            ClientBoundPacket::LoginRequest => {}
            ClientBoundPacket::LoginSuccess { uuid, name } => {
                buffer.write(uuid);
                buffer.write(name);
            }
            ClientBoundPacket::RegistrySync { registries } => buffer.write_array(registries),
            ClientBoundPacket::GameData {
                world,
                view_distance,
                vertical_view_distance,
                max_move_distance,
                keepalive_timeout_ms,
            } => {
                buffer.write(world);
                buffer.write_varying(view_distance);
                buffer.write_varying(vertical_view_distance);
                buffer.write(max_move_distance);
                buffer.write_varying(keepalive_timeout_ms);
            }
            ClientBoundPacket::ChunkData { chunk } => buffer.write(chunk),
            ClientBoundPacket::ChunkUnload { pos } => buffer.write(pos),
            ClientBoundPacket::BlockUpdate { pos, block } => {
                buffer.write(pos);
                buffer.write_varying(&(*block as u32));
            }
            ClientBoundPacket::PlayerPosView {
                sequence,
                move_sequence,
                view,
            } => {
                buffer.write_varying(sequence);
                buffer.write_varying(move_sequence);
                buffer.write(view);
            }
            ClientBoundPacket::Alive { id } => buffer.write(id),
            ClientBoundPacket::Disconnect { reason } => buffer.write(reason),
        }
    }

    /// Reads the body of a packet of the given kind. Returns `None` if the kind is not sent by
    /// servers.
    pub fn read_body(
        kind: PacketKind,
        buffer: &mut PacketBuffer,
    ) -> Result<Option<Self>, PacketSerdeError> {
        let packet = match kind {
            PacketKind::LoginRequest => ClientBoundPacket::LoginRequest,
            PacketKind::LoginSuccess => ClientBoundPacket::LoginSuccess {
                uuid: buffer.read()?,
                name: buffer.read()?,
            },
            PacketKind::RegistrySync => ClientBoundPacket::RegistrySync {
                registries: buffer.read_array()?,
            },
            PacketKind::GameData => ClientBoundPacket::GameData {
                world: buffer.read()?,
                view_distance: buffer.read_varying()?,
                vertical_view_distance: buffer.read_varying()?,
                max_move_distance: buffer.read()?,
                keepalive_timeout_ms: buffer.read_varying()?,
            },
            PacketKind::ChunkData => ClientBoundPacket::ChunkData {
                chunk: buffer.read()?,
            },
            PacketKind::ChunkUnload => ClientBoundPacket::ChunkUnload { pos: buffer.read()? },
            PacketKind::BlockUpdate => {
                let pos = buffer.read()?;
                let block = buffer.read_varying::<u32>()?;
                if block > BlockId::MAX as u32 {
                    return Err(PacketSerdeError::Internal("Block id out of range"));
                }
                ClientBoundPacket::BlockUpdate {
                    pos,
                    block: block as BlockId,
                }
            }
            PacketKind::PlayerPosView => ClientBoundPacket::PlayerPosView {
                sequence: buffer.read_varying()?,
                move_sequence: buffer.read_varying()?,
                view: buffer.read()?,
            },
            PacketKind::Alive => ClientBoundPacket::Alive { id: buffer.read()? },
            PacketKind::Disconnect => ClientBoundPacket::Disconnect {
                reason: buffer.read()?,
            },
            _ => return Ok(None),
        };

        Ok(Some(packet))
    }
}
