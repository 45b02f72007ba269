use crate::{
    block::{Block, BlockId, BlockRegistry, RegistryError},
    hit::PostponedBlockHit,
    network::{
        packet::{ClientBoundPacket, PlayerActionKind, PosView, RegistryMapping, ServerBoundPacket},
        spawn_connection,
        AsyncWriteHandle,
        ConnectionEvent,
        PacketRegistry,
        Profile,
        ProtocolError,
        WrappedConnectionEvent,
    },
    world::{chunk::ChunkSnapshot, BlockChangeCause, BlockPos, ChunkPos, World},
};
use log::*;
use std::{
    collections::{HashMap, VecDeque},
    io,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpStream, ToSocketAddrs},
    runtime::Handle,
    sync::mpsc::{self, UnboundedReceiver},
};
use voxel_net::{ConnectionState, IoHandle, PacketBuffer, PROTOCOL_VERSION};
use voxel_util::UnlocalizedName;

/// How long the client waits for the server before the game data announces the real timeout.
pub const LOGIN_TIMEOUT: Duration = Duration::from_secs(30);

/// The most block updates held for chunks whose data has not arrived.
pub const MAX_BUFFERED_UPDATES: usize = 4096;

/// World settings announced by the server in Game-Data.
#[derive(Clone, Debug, PartialEq)]
pub struct GameSettings {
    pub world: String,
    pub view_distance: u32,
    pub vertical_view_distance: u32,
    pub max_move_distance: f64,
    pub keepalive_timeout: Duration,
}

/// The replica side of a connection. Applies what the server sends to a local world and predicts
/// the local player's own actions.
///
/// The session does no I/O of its own: frames are fed in by the owner and outgoing packets are
/// queued on the write handle.
pub struct ClientSession {
    handle: AsyncWriteHandle,
    phase: ConnectionState,
    packets: PacketRegistry,
    /// Every block this process knows how to handle, in local id order.
    known_blocks: Arc<BlockRegistry>,
    /// The known blocks renumbered to the server's ids.
    registry: Option<Arc<BlockRegistry>>,
    profile: Profile,
    settings: Option<GameSettings>,
    world: Option<Arc<World>>,
    view: PosView,
    move_sequence: u32,
    buffered: HashMap<ChunkPos, VecDeque<(BlockPos, BlockId)>>,
    buffered_count: usize,
    last_heard: Instant,
}

impl ClientSession {
    pub fn new(
        handle: AsyncWriteHandle,
        known_blocks: Arc<BlockRegistry>,
        profile: Profile,
        now: Instant,
    ) -> Self
    {
        ClientSession {
            handle,
            phase: ConnectionState::Handshake,
            packets: PacketRegistry::bootstrap(),
            known_blocks,
            registry: None,
            profile,
            settings: None,
            world: None,
            view: PosView::default(),
            move_sequence: 0,
            buffered: HashMap::new(),
            buffered_count: 0,
            last_heard: now,
        }
    }

    /// Opens the session by sending the handshake.
    pub fn start(&mut self) {
        self.send_packet(&ServerBoundPacket::Handshake {
            protocol_version: PROTOCOL_VERSION,
        });
        self.phase = ConnectionState::Login;
    }

    #[inline]
    pub fn phase(&self) -> ConnectionState {
        self.phase
    }

    #[inline]
    pub fn is_playing(&self) -> bool {
        self.phase == ConnectionState::Playing
    }

    /// The profile the server confirmed, or the one presented if login has not finished.
    #[inline]
    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    #[inline]
    pub fn settings(&self) -> Option<&GameSettings> {
        self.settings.as_ref()
    }

    /// The block registry synchronized with the server.
    #[inline]
    pub fn registry(&self) -> Option<&Arc<BlockRegistry>> {
        self.registry.as_ref()
    }

    /// The local replica of the server's world, available once Game-Data has arrived.
    #[inline]
    pub fn world(&self) -> Option<&Arc<World>> {
        self.world.as_ref()
    }

    #[inline]
    pub fn view(&self) -> PosView {
        self.view
    }

    /// The number of block updates waiting for their chunk.
    #[inline]
    pub fn buffered_updates(&self) -> usize {
        self.buffered_count
    }

    fn send_packet(&self, packet: &ServerBoundPacket) {
        self.handle.send_buffer(self.packets.encode_server_bound(packet));
    }

    /// Decodes and applies one frame from the server. On error the connection is closed and the
    /// error returned.
    pub fn handle_frame(&mut self, buffer: PacketBuffer, now: Instant) -> Result<(), ProtocolError> {
        if self.phase == ConnectionState::Disconnected {
            return Err(ProtocolError::Closed);
        }

        self.last_heard = now;
        let result = self
            .packets
            .decode_client_bound(buffer)
            .and_then(|packet| self.handle_packet(packet));

        if let Err(error) = &result {
            self.fail(error);
        }
        result
    }

    fn handle_packet(&mut self, packet: ClientBoundPacket) -> Result<(), ProtocolError> {
        let kind = packet.kind();
        if !kind.client_bound_in(self.phase) {
            return Err(ProtocolError::OutOfPhase {
                packet: kind,
                phase: self.phase,
            });
        }

        match packet {
            ClientBoundPacket::LoginRequest => {
                self.send_packet(&ServerBoundPacket::LoginProfile {
                    uuid: self.profile.uuid,
                    name: self.profile.name.clone(),
                });
                Ok(())
            }
            ClientBoundPacket::LoginSuccess { uuid, name } => {
                debug!("Logged in as {} ({})", name, uuid);
                self.profile = Profile::new(uuid, name);
                self.phase = ConnectionState::RegistrySync;
                Ok(())
            }
            ClientBoundPacket::RegistrySync { registries } => self.handle_registry_sync(registries),
            ClientBoundPacket::GameData {
                world,
                view_distance,
                vertical_view_distance,
                max_move_distance,
                keepalive_timeout_ms,
            } => {
                let registry = self
                    .registry
                    .clone()
                    .ok_or_else(|| ProtocolError::Violation("game data before registries".to_owned()))?;

                self.world = Some(Arc::new(World::new(world.clone(), registry)));
                self.settings = Some(GameSettings {
                    world,
                    view_distance,
                    vertical_view_distance,
                    max_move_distance,
                    keepalive_timeout: Duration::from_millis(keepalive_timeout_ms),
                });
                self.phase = ConnectionState::Playing;
                Ok(())
            }
            ClientBoundPacket::ChunkData { chunk } => self.handle_chunk_data(chunk),
            ClientBoundPacket::ChunkUnload { pos } => {
                if let Some(world) = &self.world {
                    world.unload_chunk(pos);
                }
                if let Some(dropped) = self.buffered.remove(&pos) {
                    self.buffered_count -= dropped.len();
                }
                Ok(())
            }
            ClientBoundPacket::BlockUpdate { pos, block } => self.handle_block_update(pos, block),
            ClientBoundPacket::PlayerPosView {
                sequence,
                move_sequence,
                view,
            } => self.handle_posview(sequence, move_sequence, view),
            ClientBoundPacket::Alive { id } => {
                self.send_packet(&ServerBoundPacket::Alive { id });
                Ok(())
            }
            ClientBoundPacket::Disconnect { reason } => {
                info!("Disconnected by server: {}", reason);
                self.handle.shutdown_connection();
                self.phase = ConnectionState::Disconnected;
                Err(ProtocolError::Remote(reason))
            }
        }
    }

    fn handle_registry_sync(&mut self, registries: Vec<RegistryMapping>) -> Result<(), ProtocolError> {
        let mut blocks = None;
        let mut packets = None;

        for mapping in registries {
            if mapping.registry == UnlocalizedName::engine(RegistryMapping::BLOCKS) {
                let entries = mapping
                    .entries
                    .into_iter()
                    .map(|(name, id)| match BlockId::try_from(id) {
                        Ok(id) => Ok((name, id)),
                        Err(_) => Err(ProtocolError::Malformed(format!(
                            "block id {} out of range",
                            id
                        ))),
                    })
                    .collect::<Result<Vec<_>, _>>()?;

                let remapped = self.known_blocks.remap(&entries).map_err(|error| match error {
                    RegistryError::UnknownName(name) => ProtocolError::UnknownRegistryEntry {
                        registry: RegistryMapping::BLOCKS.to_owned(),
                        name: name.to_string(),
                    },
                    other => ProtocolError::Malformed(other.to_string()),
                })?;
                blocks = Some(Arc::new(remapped));
            } else if mapping.registry == UnlocalizedName::engine(RegistryMapping::PACKETS) {
                packets = Some(PacketRegistry::from_mapping(&mapping.entries)?);
            } else {
                debug!("Ignoring unknown registry {}", mapping.registry);
            }
        }

        let blocks =
            blocks.ok_or_else(|| ProtocolError::Malformed("missing block registry".to_owned()))?;

        // Nothing is applied unless every registry was valid
        self.registry = Some(blocks);
        if let Some(packets) = packets {
            self.packets = packets;
        }
        self.phase = ConnectionState::GameData;
        Ok(())
    }

    fn handle_chunk_data(&mut self, snapshot: ChunkSnapshot) -> Result<(), ProtocolError> {
        let (world, registry) = self.world_and_registry()?;
        let pos = snapshot.pos;
        let chunk = snapshot
            .into_chunk(registry)
            .map_err(|error| ProtocolError::Malformed(error.to_string()))?;
        world.cache_chunk(chunk);

        if let Some(updates) = self.buffered.remove(&pos) {
            self.buffered_count -= updates.len();
            for (pos, block) in updates {
                self.apply_block_update(&world, pos, block)?;
            }
        }
        Ok(())
    }

    fn handle_block_update(&mut self, pos: BlockPos, block: BlockId) -> Result<(), ProtocolError> {
        let (world, _) = self.world_and_registry()?;
        if world.is_loaded(pos.chunk()) {
            return self.apply_block_update(&world, pos, block);
        }

        if self.buffered_count >= MAX_BUFFERED_UPDATES {
            return Err(ProtocolError::Violation(
                "too many block updates for missing chunks".to_owned(),
            ));
        }

        trace!("Buffering update at {:?} until its chunk arrives", pos);
        self.buffered.entry(pos.chunk()).or_default().push_back((pos, block));
        self.buffered_count += 1;
        Ok(())
    }

    fn apply_block_update(
        &self,
        world: &World,
        pos: BlockPos,
        block: BlockId,
    ) -> Result<(), ProtocolError>
    {
        let block = world
            .registry()
            .block(block)
            .ok_or_else(|| ProtocolError::Malformed(format!("unknown block id {}", block)))?
            .clone();

        world
            .set_block(pos, &block, BlockChangeCause::NetworkApply { origin: None })
            .map(|_| ())
            .map_err(|error| ProtocolError::Malformed(error.to_string()))
    }

    fn handle_posview(
        &mut self,
        sequence: u32,
        move_sequence: u32,
        view: PosView,
    ) -> Result<(), ProtocolError>
    {
        if !view.is_finite() {
            return Err(ProtocolError::Malformed("non-finite position".to_owned()));
        }

        let max_move_distance = self
            .settings
            .as_ref()
            .map(|settings| settings.max_move_distance)
            .unwrap_or(0.0);
        let diverged =
            view.position.distance_sq(&self.view.position) > max_move_distance * max_move_distance;

        if move_sequence >= self.move_sequence || diverged {
            self.view = view;
        }

        self.send_packet(&ServerBoundPacket::PlayerPosViewConfirm { sequence });
        Ok(())
    }

    fn world_and_registry(&self) -> Result<(Arc<World>, Arc<BlockRegistry>), ProtocolError> {
        match &self.world {
            Some(world) => Ok((world.clone(), world.registry().clone())),
            None => Err(ProtocolError::Violation("world data before game data".to_owned())),
        }
    }

    /// Moves the local player and tells the server. Returns false if the move was not sent.
    pub fn move_to(&mut self, view: PosView) -> bool {
        if !self.is_playing() || !view.is_finite() {
            return false;
        }

        self.move_sequence += 1;
        self.view = view;
        self.send_packet(&ServerBoundPacket::PlayerMove {
            sequence: self.move_sequence,
            view,
        });
        true
    }

    /// The block the local player is looking at, within the given distance.
    pub fn look_target(&self, max_distance: f64) -> Option<PostponedBlockHit> {
        let world = self.world.as_ref()?;
        world
            .raycast(self.view.position, self.view.look(), max_distance)
            .hit()
            .map(|hit| hit.postpone())
    }

    /// Applies an action to the local world immediately and sends it to the server, which
    /// corrects the replica if it disagrees. Returns false if the action could not be predicted.
    pub fn perform_action(&mut self, action: PlayerActionKind, hit: PostponedBlockHit) -> bool {
        let world = match &self.world {
            Some(world) if self.phase == ConnectionState::Playing && world.name() == hit.world =>
                world.clone(),
            _ => return false,
        };

        let (target, block): (BlockPos, Arc<Block>) = match action {
            PlayerActionKind::DestroyBlock => (hit.pos, world.registry().air().clone()),
            PlayerActionKind::PlaceBlock(id) => match world.registry().block(id) {
                Some(block) if world.block(hit.pos.offset(hit.direction)).is_passable() =>
                    (hit.pos.offset(hit.direction), block.clone()),
                _ => return false,
            },
        };

        if let Err(e) = world.set_block(target, &block, BlockChangeCause::PlayerAction) {
            debug!("Could not predict action at {:?}: {}", target, e);
            return false;
        }

        self.send_packet(&ServerBoundPacket::PlayerAction { action, hit });
        true
    }

    /// Checks that the server is still talking to us.
    pub fn tick(&mut self, now: Instant) -> Result<(), ProtocolError> {
        if self.phase == ConnectionState::Disconnected {
            return Ok(());
        }

        let limit = match &self.settings {
            Some(settings) => settings.keepalive_timeout * 2,
            None => LOGIN_TIMEOUT,
        };

        if now.saturating_duration_since(self.last_heard) > limit {
            let error = ProtocolError::TimedOut("server");
            self.fail(&error);
            return Err(error);
        }

        Ok(())
    }

    /// Leaves the server with the given reason.
    pub fn disconnect(&mut self, reason: &str) {
        if self.phase == ConnectionState::Disconnected {
            return;
        }

        self.send_packet(&ServerBoundPacket::Disconnect {
            reason: reason.to_owned(),
        });
        self.handle.shutdown_connection();
        self.phase = ConnectionState::Disconnected;
    }

    /// Closes the connection because of the given error, telling the server why when the error
    /// started on this side.
    fn fail(&mut self, error: &ProtocolError) {
        match error {
            ProtocolError::Remote(_) | ProtocolError::Closed => {
                self.handle.shutdown_connection();
                self.phase = ConnectionState::Disconnected;
            }
            _ => {
                error!("Closing connection: {}", error);
                self.disconnect(&error.reason());
            }
        }
    }
}

/// Drives a `ClientSession` over a stream. Frames are read and written on runtime tasks and
/// applied to the session on the thread that polls this connection.
pub struct ClientConnection {
    session: ClientSession,
    events: UnboundedReceiver<WrappedConnectionEvent>,
}

impl ClientConnection {
    /// Connects to a server over TCP and starts the handshake.
    pub async fn connect<A: ToSocketAddrs>(
        addr: A,
        profile: Profile,
        known_blocks: Arc<BlockRegistry>,
        compression_threshold: i32,
    ) -> io::Result<Self>
    {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self::from_stream(
            stream,
            profile,
            known_blocks,
            IoHandle::new(compression_threshold),
        ))
    }

    /// Starts a session over an already connected stream. Must be called within a runtime.
    pub fn from_stream<S>(
        stream: S,
        profile: Profile,
        known_blocks: Arc<BlockRegistry>,
        io: IoHandle,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (sender, receiver) = mpsc::unbounded_channel();
        let handle = spawn_connection(&Handle::current(), 0, stream, io, sender);
        let mut session = ClientSession::new(handle, known_blocks, profile, Instant::now());
        session.start();

        ClientConnection {
            session,
            events: receiver,
        }
    }

    #[inline]
    pub fn session(&self) -> &ClientSession {
        &self.session
    }

    #[inline]
    pub fn session_mut(&mut self) -> &mut ClientSession {
        &mut self.session
    }

    /// Applies every event that has already arrived, then checks the server timeout.
    pub fn poll(&mut self, now: Instant) -> Result<(), ProtocolError> {
        while let Ok(WrappedConnectionEvent { event, .. }) = self.events.try_recv() {
            self.handle_event(event, now)?;
        }
        self.session.tick(now)
    }

    /// Waits for the next event and applies it.
    pub async fn next_event(&mut self) -> Result<(), ProtocolError> {
        match self.events.recv().await {
            Some(WrappedConnectionEvent { event, .. }) => self.handle_event(event, Instant::now()),
            None => Err(ProtocolError::Closed),
        }
    }

    /// Applies events until the condition holds for the session.
    pub async fn wait_until<F>(&mut self, mut condition: F) -> Result<(), ProtocolError>
    where F: FnMut(&ClientSession) -> bool {
        while !condition(&self.session) {
            self.next_event().await?;
        }
        Ok(())
    }

    fn handle_event(&mut self, event: ConnectionEvent, now: Instant) -> Result<(), ProtocolError> {
        match event {
            ConnectionEvent::Connected(_) => Ok(()),
            ConnectionEvent::Frame(buffer) => self.session.handle_frame(buffer, now),
            ConnectionEvent::Closed(reason) => {
                if let Some(reason) = reason {
                    warn!("Lost connection to server: {}", reason);
                }
                self.session.fail(&ProtocolError::Closed);
                Err(ProtocolError::Closed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        network::{packet::RegistryMapping, WrappedPacket},
        world::chunk::Chunk,
    };
    use uuid::Uuid;
    use voxel_util::Vector;

    struct Harness {
        session: ClientSession,
        outbound: UnboundedReceiver<WrappedPacket>,
        server_packets: PacketRegistry,
        now: Instant,
    }

    impl Harness {
        fn new() -> Self {
            let (handle, outbound) = AsyncWriteHandle::channel();
            let now = Instant::now();
            let mut session = ClientSession::new(
                handle,
                Arc::new(BlockRegistry::with_defaults()),
                Profile::new(Uuid::new_v4(), "tester"),
                now,
            );
            session.start();

            Harness {
                session,
                outbound,
                server_packets: PacketRegistry::bootstrap(),
                now,
            }
        }

        fn deliver(&mut self, packet: ClientBoundPacket) -> Result<(), ProtocolError> {
            let buffer = self.server_packets.encode_client_bound(&packet);
            self.session.handle_frame(buffer, self.now)
        }

        fn sent(&mut self) -> Vec<ServerBoundPacket> {
            let mut packets = Vec::new();
            while let Ok(WrappedPacket::Buffer(buffer)) = self.outbound.try_recv() {
                packets.push(self.session.packets.decode_server_bound(buffer).unwrap());
            }
            packets
        }

        fn block_mapping(&self) -> RegistryMapping {
            RegistryMapping {
                registry: UnlocalizedName::engine(RegistryMapping::BLOCKS),
                entries: BlockRegistry::with_defaults()
                    .to_mapping()
                    .into_iter()
                    .map(|(name, id)| (name, id as i32))
                    .collect(),
            }
        }

        fn play(&mut self) {
            self.deliver(ClientBoundPacket::LoginRequest).unwrap();
            self.deliver(ClientBoundPacket::LoginSuccess {
                uuid: self.session.profile().uuid,
                name: "tester".to_owned(),
            })
            .unwrap();
            let registries = vec![self.block_mapping()];
            self.deliver(ClientBoundPacket::RegistrySync { registries }).unwrap();
            self.deliver(ClientBoundPacket::GameData {
                world: "overworld".to_owned(),
                view_distance: 2,
                vertical_view_distance: 1,
                max_move_distance: 10.0,
                keepalive_timeout_ms: 1000,
            })
            .unwrap();
            self.sent();
        }

        fn stone(&self) -> BlockId {
            let registry = self.session.registry().unwrap();
            registry
                .id_of(registry.by_name(&UnlocalizedName::engine("stone")).unwrap())
                .unwrap()
        }
    }

    #[test]
    fn login_sequence() {
        let mut harness = Harness::new();
        assert!(matches!(harness.sent()[..], [ServerBoundPacket::Handshake {
            protocol_version: PROTOCOL_VERSION
        }]));

        harness.deliver(ClientBoundPacket::LoginRequest).unwrap();
        assert!(matches!(harness.sent()[..], [ServerBoundPacket::LoginProfile { .. }]));

        harness.play();
        assert!(harness.session.is_playing());
        assert_eq!(harness.session.world().unwrap().name(), "overworld");
    }

    #[test]
    fn out_of_phase_packets_close_the_session() {
        let mut harness = Harness::new();
        let result = harness.deliver(ClientBoundPacket::ChunkUnload {
            pos: ChunkPos::new(0, 0, 0),
        });

        assert!(matches!(result, Err(ProtocolError::OutOfPhase { .. })));
        assert_eq!(harness.session.phase(), ConnectionState::Disconnected);
        assert!(harness
            .sent()
            .iter()
            .any(|packet| matches!(packet, ServerBoundPacket::Disconnect { .. })));
    }

    #[test]
    fn unknown_blocks_fail_registry_sync() {
        let mut harness = Harness::new();
        harness.deliver(ClientBoundPacket::LoginRequest).unwrap();
        harness
            .deliver(ClientBoundPacket::LoginSuccess {
                uuid: Uuid::new_v4(),
                name: "tester".to_owned(),
            })
            .unwrap();

        let mut mapping = harness.block_mapping();
        mapping.entries.push((UnlocalizedName::engine("lava"), 100));
        let result = harness.deliver(ClientBoundPacket::RegistrySync {
            registries: vec![mapping],
        });

        assert!(matches!(
            result,
            Err(ProtocolError::UnknownRegistryEntry { ref name, .. }) if name == "engine:lava"
        ));
        assert!(harness.session.registry().is_none());
    }

    #[test]
    fn updates_wait_for_their_chunk() {
        let mut harness = Harness::new();
        harness.play();
        let stone = harness.stone();
        let pos = BlockPos::new(1, 2, 3);

        harness.deliver(ClientBoundPacket::BlockUpdate { pos, block: stone }).unwrap();
        harness.deliver(ClientBoundPacket::BlockUpdate { pos, block: 0 }).unwrap();
        harness.deliver(ClientBoundPacket::BlockUpdate { pos, block: stone }).unwrap();
        assert_eq!(harness.session.buffered_updates(), 3);

        let registry = harness.session.registry().unwrap().clone();
        let chunk = ChunkSnapshot::of(&Chunk::air(pos.chunk(), registry));
        harness.deliver(ClientBoundPacket::ChunkData { chunk }).unwrap();

        assert_eq!(harness.session.buffered_updates(), 0);
        assert_eq!(harness.session.world().unwrap().block_id(pos), stone);
    }

    #[test]
    fn unloading_drops_buffered_updates() {
        let mut harness = Harness::new();
        harness.play();
        let pos = BlockPos::new(40, 2, 3);
        let stone = harness.stone();

        harness.deliver(ClientBoundPacket::BlockUpdate { pos, block: stone }).unwrap();
        harness.deliver(ClientBoundPacket::ChunkUnload { pos: pos.chunk() }).unwrap();
        assert_eq!(harness.session.buffered_updates(), 0);
    }

    #[test]
    fn invalid_block_ids_are_malformed() {
        let mut harness = Harness::new();
        harness.play();
        let registry = harness.session.registry().unwrap().clone();
        let chunk = ChunkSnapshot::of(&Chunk::air(ChunkPos::new(0, 0, 0), registry));
        harness.deliver(ClientBoundPacket::ChunkData { chunk }).unwrap();

        let result = harness.deliver(ClientBoundPacket::BlockUpdate {
            pos: BlockPos::new(0, 0, 0),
            block: 999,
        });
        assert!(matches!(result, Err(ProtocolError::Malformed(_))));
    }

    #[test]
    fn keepalives_are_answered() {
        let mut harness = Harness::new();
        harness.play();

        harness.deliver(ClientBoundPacket::Alive { id: 77 }).unwrap();
        assert_eq!(harness.sent(), vec![ServerBoundPacket::Alive { id: 77 }]);
    }

    #[test]
    fn posviews_are_confirmed() {
        let mut harness = Harness::new();
        harness.play();
        let spawn = PosView::new(Vector::rect(0.5, 5.0, 0.5), 0.0, 0.0);

        harness
            .deliver(ClientBoundPacket::PlayerPosView {
                sequence: 1,
                move_sequence: 0,
                view: spawn,
            })
            .unwrap();
        assert_eq!(harness.session.view(), spawn);
        assert_eq!(harness.sent(), vec![ServerBoundPacket::PlayerPosViewConfirm {
            sequence: 1
        }]);

        // A periodic view that predates our latest move does not pull us back
        let ahead = PosView::new(Vector::rect(2.5, 5.0, 0.5), 0.0, 0.0);
        assert!(harness.session.move_to(ahead));
        harness
            .deliver(ClientBoundPacket::PlayerPosView {
                sequence: 2,
                move_sequence: 0,
                view: spawn,
            })
            .unwrap();
        assert_eq!(harness.session.view(), ahead);

        // A snap-back answering that move does
        harness
            .deliver(ClientBoundPacket::PlayerPosView {
                sequence: 3,
                move_sequence: 1,
                view: spawn,
            })
            .unwrap();
        assert_eq!(harness.session.view(), spawn);
    }

    #[test]
    fn silent_servers_time_out() {
        let mut harness = Harness::new();
        harness.play();

        assert!(harness.session.tick(harness.now + Duration::from_millis(1500)).is_ok());
        assert_eq!(
            harness.session.tick(harness.now + Duration::from_millis(2500)),
            Err(ProtocolError::TimedOut("server"))
        );
        assert_eq!(harness.session.phase(), ConnectionState::Disconnected);
    }

    #[test]
    fn actions_are_predicted() {
        let mut harness = Harness::new();
        harness.play();
        let stone = harness.stone();
        let registry = harness.session.registry().unwrap().clone();
        let world = harness.session.world().unwrap().clone();
        world.cache_chunk(Chunk::air(ChunkPos::new(0, 0, 0), registry.clone()));
        world
            .set_block(
                BlockPos::new(3, 1, 1),
                registry.block(stone).unwrap(),
                BlockChangeCause::WorldGen,
            )
            .unwrap();

        harness.session.view = PosView::new(Vector::rect(0.5, 1.5, 1.5), -90.0, 0.0);
        let hit = harness.session.look_target(8.0).expect("stone should be in view");
        assert_eq!(hit.pos, BlockPos::new(3, 1, 1));

        let mut changes = world.subscribe();
        assert!(harness
            .session
            .perform_action(PlayerActionKind::PlaceBlock(stone), hit.clone()));
        let placed = changes.try_recv().unwrap();
        assert_eq!(placed.pos, BlockPos::new(2, 1, 1));
        assert_eq!(placed.cause, BlockChangeCause::PlayerAction);

        assert!(matches!(harness.sent()[..], [ServerBoundPacket::PlayerAction { .. }]));
    }
}
