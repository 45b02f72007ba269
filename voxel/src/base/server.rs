use crate::{
    base::Config,
    block::BlockRegistry,
    network::{
        packet::{ClientBoundPacket, RegistryMapping},
        spawn_connection,
        ConnectionEvent,
        PacketRegistry,
        ProtocolError,
        ServerSession,
        WrappedConnectionEvent,
    },
    world::{
        chunk::{ChunkProvider, ChunkSnapshot, ChunkSource, ProviderEvent},
        BlockChange,
        ChunkPos,
        World,
        WorldStore,
    },
};
use log::*;
use std::{
    collections::HashMap,
    io,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Instant,
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpListener,
    runtime::Handle,
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    time::{interval, MissedTickBehavior},
};
use voxel_net::IoHandle;
use voxel_util::UnlocalizedName;

/// Identifies one connection for as long as the server runs.
pub type ClientId = usize;

/// The authoritative side of the engine: owns the worlds, streams chunks to connected clients and
/// applies their actions.
///
/// All state is mutated from whichever task calls `tick`. Connections run on their own tasks and
/// only exchange events and encoded frames with the server.
pub struct SyncServer {
    pub(crate) config: Arc<Config>,
    pub(crate) worlds: WorldStore,
    pub(crate) world: Arc<World>,
    pub(crate) chunk_provider: ChunkProvider,
    /// The packet mapping announced to clients during registry synchronization.
    pub(crate) packets: Arc<PacketRegistry>,
    /// The list of connected clients.
    pub(crate) client_list: ClientList,
    block_changes: UnboundedReceiver<BlockChange>,
    event_sender: UnboundedSender<WrappedConnectionEvent>,
    event_receiver: UnboundedReceiver<WrappedConnectionEvent>,
    next_client_id: Arc<AtomicUsize>,
    running: Arc<AtomicBool>,
    rt: Handle,
}

impl SyncServer {
    /// Creates a server with one world named by the config, backed by the given chunk source.
    pub fn new(
        config: Config,
        registry: Arc<BlockRegistry>,
        source: Arc<dyn ChunkSource>,
        rt: Handle,
    ) -> Self
    {
        let world = Arc::new(World::new(config.world_name.clone(), registry));
        let block_changes = world.subscribe();
        let mut worlds = WorldStore::new();
        worlds.insert(world.clone());

        let (event_sender, event_receiver) = mpsc::unbounded_channel();

        SyncServer {
            config: Arc::new(config),
            worlds,
            chunk_provider: ChunkProvider::new(world.clone(), source, rt.clone()),
            world,
            packets: Arc::new(PacketRegistry::bootstrap()),
            client_list: ClientList::new(),
            block_changes,
            event_sender,
            event_receiver,
            next_client_id: Arc::new(AtomicUsize::new(1)),
            running: Arc::new(AtomicBool::new(true)),
            rt,
        }
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The world players join.
    #[inline]
    pub fn world(&self) -> &Arc<World> {
        &self.world
    }

    #[inline]
    pub fn worlds(&self) -> &WorldStore {
        &self.worlds
    }

    #[inline]
    pub fn client_list(&self) -> &ClientList {
        &self.client_list
    }

    #[inline]
    pub fn chunk_provider(&self) -> &ChunkProvider {
        &self.chunk_provider
    }

    /// A flag that stops `run` when cleared.
    pub fn running(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    fn io_handle(&self) -> IoHandle {
        IoHandle::new(self.config.compression_threshold)
    }

    /// Attaches a connected stream. The client is registered on the next tick.
    pub fn connect<S>(&self, stream: S) -> ClientId
    where S: AsyncRead + AsyncWrite + Send + 'static {
        let id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
        spawn_connection(&self.rt, id, stream, self.io_handle(), self.event_sender.clone());
        id
    }

    /// Binds the configured address and accepts connections in the background.
    pub async fn bind(&self) -> io::Result<()> {
        let listener = TcpListener::bind(self.config.bind_address()).await?;
        info!("Listening on {}", listener.local_addr()?);
        self.listen(listener);
        Ok(())
    }

    /// Accepts connections from the given listener in the background until the server stops.
    pub fn listen(&self, listener: TcpListener) {
        let rt = self.rt.clone();
        let io = self.io_handle();
        let events = self.event_sender.clone();
        let next_client_id = self.next_client_id.clone();
        let running = self.running.clone();

        self.rt.spawn(async move {
            while running.load(Ordering::Acquire) {
                match listener.accept().await {
                    Ok((socket, addr)) => {
                        if let Err(e) = socket.set_nodelay(true) {
                            debug!("Failed to set TCP_NODELAY for {}: {}", addr, e);
                        }

                        let id = next_client_id.fetch_add(1, Ordering::Relaxed);
                        debug!("Client {} connected from {}", id, addr);
                        spawn_connection(&rt, id, socket, io, events.clone());
                    }
                    Err(e) => error!("Failed to accept TCP socket: {}", e),
                }
            }
        });
    }

    /// Ticks the server at the configured rate until the running flag is cleared, then
    /// disconnects everyone and waits for outstanding chunk loads.
    pub async fn run(&mut self) {
        let mut ticker = interval(self.config.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Started server");
        while self.running.load(Ordering::Acquire) {
            ticker.tick().await;
            self.tick(Instant::now()).await;
        }

        self.shutdown().await;
    }

    /// Disconnects every client and applies outstanding chunk loads.
    pub async fn shutdown(&mut self) {
        info!("Shutting down server");
        self.running.store(false, Ordering::Release);
        for session in self.client_list.iter_mut() {
            session.disconnect("Server closed");
        }
        self.client_list.retain_connected();
        self.chunk_provider.join_pending().await;
    }

    /// Runs one server tick: applies connection events, advances session clocks, forwards block
    /// changes, streams loaded chunks and unloads chunks nobody can see.
    pub async fn tick(&mut self, now: Instant) {
        self.handle_events(now);
        self.tick_sessions(now);
        self.broadcast_block_changes();

        let provider_events = self.chunk_provider.flush_ready().await;
        self.handle_provider_events(provider_events);

        self.unload_unwatched_chunks();
        self.client_list.retain_connected();
    }

    fn handle_events(&mut self, now: Instant) {
        while let Ok(WrappedConnectionEvent { sender, event }) = self.event_receiver.try_recv() {
            match event {
                ConnectionEvent::Connected(handle) => {
                    let session = ServerSession::new(sender, handle, now, &self.config);
                    self.client_list.add_client(session);
                }
                ConnectionEvent::Frame(buffer) => self.handle_frame(sender, buffer, now),
                ConnectionEvent::Closed(reason) => self.handle_closed(sender, reason),
            }
        }
    }

    fn handle_closed(&mut self, id: ClientId, reason: Option<String>) {
        if let Some(mut session) = self.client_list.remove_client(id) {
            match (session.profile(), reason) {
                (Some(profile), None) => info!("{} left the game", profile.name),
                (Some(profile), Some(reason)) =>
                    info!("{} lost connection: {}", profile.name, reason),
                (None, _) => debug!("Client {} disconnected", id),
            }
            session.close();
        }
    }

    fn tick_sessions(&mut self, now: Instant) {
        let config = self.config.clone();
        for session in self.client_list.iter_mut() {
            if let Err(error) = session.tick(now, &config) {
                disconnect_session(session, &error);
            }
        }
    }

    /// Disconnects a client because of a protocol error.
    pub(crate) fn disconnect_client(&mut self, id: ClientId, error: &ProtocolError) {
        if let Some(session) = self.client_list.get_mut(id) {
            disconnect_session(session, error);
        }
    }

    /// The registries announced during registry synchronization.
    pub(crate) fn registry_mappings(&self) -> Vec<RegistryMapping> {
        vec![
            RegistryMapping {
                registry: UnlocalizedName::engine(RegistryMapping::BLOCKS),
                entries: self
                    .world
                    .registry()
                    .to_mapping()
                    .into_iter()
                    .map(|(name, id)| (name, id as i32))
                    .collect(),
            },
            RegistryMapping {
                registry: UnlocalizedName::engine(RegistryMapping::PACKETS),
                entries: self.packets.to_mapping(),
            },
        ]
    }

    /// Recomputes a playing client's interest set around its current position, unloading chunks
    /// it left and sending or requesting chunks it entered.
    pub(crate) fn update_interest(&mut self, id: ClientId) {
        let world = self.world.clone();
        let session = match self.client_list.get_mut(id) {
            Some(session) if session.is_playing() => session,
            _ => return,
        };

        let center = ChunkPos::of(crate::world::BlockPos::containing(session.view().position));
        let left = session.update_interest(
            center,
            self.config.view_distance,
            self.config.vertical_view_distance,
        );
        for pos in left {
            session.send_packet(&ClientBoundPacket::ChunkUnload { pos });
        }

        for pos in session.unsent_interest() {
            match world.loaded_chunk_at(pos) {
                Some(chunk) => {
                    let chunk = ChunkSnapshot::of(&chunk.read());
                    session.send_packet(&ClientBoundPacket::ChunkData { chunk });
                    session.mark_sent(pos);
                }
                None => {
                    self.chunk_provider.request(pos);
                }
            }
        }
    }

    fn handle_provider_events(&mut self, events: Vec<ProviderEvent>) {
        for event in events {
            let pos = match event {
                ProviderEvent::Loaded(pos) => pos,
                ProviderEvent::Failed(pos) => {
                    debug!("Chunk {:?} is unavailable until requested again", pos);
                    continue;
                }
            };

            let chunk = match self.world.loaded_chunk_at(pos) {
                Some(chunk) => chunk,
                None => continue,
            };

            let mut snapshot = None;
            for session in self.client_list.iter_mut() {
                if session.is_playing() && session.is_interested(pos) && !session.has_sent(pos) {
                    let chunk = snapshot
                        .get_or_insert_with(|| ChunkSnapshot::of(&chunk.read()))
                        .clone();
                    session.send_packet(&ClientBoundPacket::ChunkData { chunk });
                    session.mark_sent(pos);
                }
            }
        }
    }

    fn broadcast_block_changes(&mut self) {
        while let Ok(change) = self.block_changes.try_recv() {
            let block = match self.world.registry().id_of(&change.current) {
                Some(id) => id,
                None => {
                    warn!("Changed block {} is not registered", change.current);
                    continue;
                }
            };

            let chunk = change.pos.chunk();
            for session in self.client_list.iter() {
                if session.is_playing()
                    && session.has_sent(chunk)
                    && !change.cause.is_echo_for(session.id())
                {
                    session.send_packet(&ClientBoundPacket::BlockUpdate {
                        pos: change.pos,
                        block,
                    });
                }
            }
        }
    }

    fn unload_unwatched_chunks(&mut self) {
        for pos in self.world.loaded_chunks() {
            if !self.client_list.iter().any(|session| session.is_interested(pos)) {
                self.world.unload_chunk(pos);
            }
        }
    }
}

fn disconnect_session(session: &mut ServerSession, error: &ProtocolError) {
    match session.profile() {
        Some(profile) => warn!("Disconnecting {}: {}", profile.name, error),
        None => warn!("Disconnecting client {}: {}", session.id(), error),
    }
    session.disconnect(&error.reason());
}

/// The sessions of every open connection, keyed by connection id.
pub struct ClientList(HashMap<ClientId, ServerSession>);

impl ClientList {
    /// Creates a new, empty client list.
    pub fn new() -> Self {
        ClientList(HashMap::new())
    }

    pub fn add_client(&mut self, session: ServerSession) {
        self.0.insert(session.id(), session);
    }

    pub fn remove_client(&mut self, client_id: ClientId) -> Option<ServerSession> {
        self.0.remove(&client_id)
    }

    pub fn get(&self, client_id: ClientId) -> Option<&ServerSession> {
        self.0.get(&client_id)
    }

    pub fn get_mut(&mut self, client_id: ClientId) -> Option<&mut ServerSession> {
        self.0.get_mut(&client_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ServerSession> + '_ {
        self.0.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ServerSession> + '_ {
        self.0.values_mut()
    }

    /// Returns the number of open connections.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the number of players currently logged in.
    pub fn online_count(&self) -> usize {
        self.0
            .values()
            .filter(|session| session.profile().is_some())
            .count()
    }

    /// Finds the logged in session using the given name or uuid.
    pub fn find_player(&self, name: &str, uuid: uuid::Uuid) -> Option<&ServerSession> {
        self.0.values().find(|session| {
            session
                .profile()
                .map(|profile| profile.uuid == uuid || profile.name.eq_ignore_ascii_case(name))
                .unwrap_or(false)
        })
    }

    fn retain_connected(&mut self) {
        self.0
            .retain(|_, session| session.phase() != voxel_net::ConnectionState::Disconnected);
    }
}

impl Default for ClientList {
    fn default() -> Self {
        Self::new()
    }
}
