use crate::{
    base::{ClientId, Config},
    network::{
        packet::{ClientBoundPacket, PosView},
        registry::PacketRegistry,
        AsyncWriteHandle,
        ProtocolError,
    },
    world::ChunkPos,
};
use log::{debug, trace, warn};
use rand::Rng;
use std::{
    collections::HashSet,
    sync::Arc,
    time::{Duration, Instant},
};
use uuid::Uuid;
use voxel_net::ConnectionState;

/// The identity a client presented during login.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Profile {
    pub uuid: Uuid,
    pub name: String,
}

impl Profile {
    pub const MAX_NAME_LENGTH: usize = 16;

    pub fn new(uuid: Uuid, name: impl Into<String>) -> Self {
        Profile {
            uuid,
            name: name.into(),
        }
    }

    /// Whether the name is 1 to 16 characters of ASCII letters, digits and underscores.
    pub fn is_valid(&self) -> bool {
        !self.name.is_empty()
            && self.name.len() <= Self::MAX_NAME_LENGTH
            && self
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
    }
}

/// Where a connection stands in the keepalive exchange.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnKeepalive {
    /// No keepalive is outstanding; the next one goes out at `sending_at`.
    Sending { sending_at: Instant },
    /// A keepalive was sent and must be answered with `expected_id` before `expected_by`.
    Waiting {
        expected_id: i64,
        expected_by: Instant,
    },
}

/// What the server did with a Player-Move.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MoveOutcome {
    /// The position was accepted.
    Accepted,
    /// The move was older than one already processed.
    Stale,
    /// A snap-back is outstanding, so the move was dropped.
    Ignored,
    /// The move went too far. The caller must send a snap-back view.
    SnapBack,
}

#[derive(Clone, Copy, Debug)]
struct OutstandingView {
    sequence: u32,
    sent_at: Instant,
    snap_back: bool,
}

/// The server's view of one connection: its phase, the packet mapping in effect, the player it
/// belongs to once logged in, and which chunks it has been sent.
pub struct ServerSession {
    id: ClientId,
    handle: AsyncWriteHandle,
    phase: ConnectionState,
    packets: Arc<PacketRegistry>,
    profile: Option<Profile>,
    login_deadline: Instant,
    keepalive: ConnKeepalive,
    view: PosView,
    move_sequence: u32,
    posview_sequence: u32,
    outstanding_view: Option<OutstandingView>,
    next_posview: Instant,
    center: Option<ChunkPos>,
    interest: HashSet<ChunkPos>,
    sent: HashSet<ChunkPos>,
}

impl ServerSession {
    pub fn new(id: ClientId, handle: AsyncWriteHandle, now: Instant, config: &Config) -> Self {
        ServerSession {
            id,
            handle,
            phase: ConnectionState::Handshake,
            packets: Arc::new(PacketRegistry::bootstrap()),
            profile: None,
            login_deadline: now + config.keepalive_timeout(),
            keepalive: ConnKeepalive::Sending { sending_at: now },
            view: PosView::default(),
            move_sequence: 0,
            posview_sequence: 0,
            outstanding_view: None,
            next_posview: now,
            center: None,
            interest: HashSet::new(),
            sent: HashSet::new(),
        }
    }

    #[inline]
    pub fn id(&self) -> ClientId {
        self.id
    }

    #[inline]
    pub fn phase(&self) -> ConnectionState {
        self.phase
    }

    /// Moves to the given phase. Phases only move forward.
    pub fn set_phase(&mut self, phase: ConnectionState) {
        debug_assert!(phase >= self.phase, "Session {} moved back to {}", self.id, phase);
        trace!("Session {} entered {}", self.id, phase);
        self.phase = phase;
    }

    #[inline]
    pub fn is_playing(&self) -> bool {
        self.phase == ConnectionState::Playing
    }

    #[inline]
    pub fn packets(&self) -> &PacketRegistry {
        &self.packets
    }

    /// Switches the mapping used to encode and decode packets for the rest of the session.
    pub fn set_packets(&mut self, packets: Arc<PacketRegistry>) {
        self.packets = packets;
    }

    #[inline]
    pub fn profile(&self) -> Option<&Profile> {
        self.profile.as_ref()
    }

    pub fn set_profile(&mut self, profile: Profile) {
        self.profile = Some(profile);
    }

    /// The player's last accepted position and look.
    #[inline]
    pub fn view(&self) -> PosView {
        self.view
    }

    #[inline]
    pub fn keepalive(&self) -> ConnKeepalive {
        self.keepalive
    }

    /// Encodes and queues a packet with the mapping currently in effect.
    pub fn send_packet(&self, packet: &ClientBoundPacket) {
        if self.phase == ConnectionState::Disconnected {
            debug!("Dropped {} for disconnected session {}", packet.kind(), self.id);
            return;
        }

        debug_assert!(
            packet.kind().client_bound_in(self.phase),
            "Sent {} to session {} during {}",
            packet.kind(),
            self.id,
            self.phase
        );
        self.handle.send_buffer(self.packets.encode_client_bound(packet));
    }

    /// Sends a Disconnect with the given reason and closes the connection once it is written.
    pub fn disconnect(&mut self, reason: &str) {
        if self.phase == ConnectionState::Disconnected {
            return;
        }

        self.send_packet(&ClientBoundPacket::Disconnect {
            reason: reason.to_owned(),
        });
        self.close();
    }

    /// Closes the connection without telling the peer anything.
    pub fn close(&mut self) {
        self.handle.shutdown_connection();
        self.phase = ConnectionState::Disconnected;
    }

    /// Enters the playing phase: the keepalive and position clocks start now.
    pub fn start_playing(&mut self, now: Instant, spawn: PosView, config: &Config) {
        self.set_phase(ConnectionState::Playing);
        self.keepalive = ConnKeepalive::Sending {
            sending_at: now + config.keepalive_interval(),
        };
        self.view = spawn;
        self.send_posview(now, false);
        self.next_posview = now + config.posview_interval();
    }

    /// Advances the connection's clocks. Returns an error if the peer has stopped answering.
    pub fn tick(&mut self, now: Instant, config: &Config) -> Result<(), ProtocolError> {
        match self.phase {
            ConnectionState::Disconnected => Ok(()),
            ConnectionState::Playing => {
                self.tick_keepalive(now, config.keepalive_timeout())?;
                self.tick_posview(now, config)
            }
            _ =>
                if now >= self.login_deadline {
                    Err(ProtocolError::TimedOut("login"))
                } else {
                    Ok(())
                },
        }
    }

    fn tick_keepalive(&mut self, now: Instant, timeout: Duration) -> Result<(), ProtocolError> {
        match self.keepalive {
            ConnKeepalive::Sending { sending_at } =>
                if now >= sending_at {
                    let id = rand::thread_rng().gen_range(0 ..= i64::MAX);
                    trace!("Sending keepalive {} to session {}", id, self.id);
                    self.keepalive = ConnKeepalive::Waiting {
                        expected_id: id,
                        expected_by: now + timeout,
                    };
                    self.send_packet(&ClientBoundPacket::Alive { id });
                },
            ConnKeepalive::Waiting { expected_by, .. } =>
                if now >= expected_by {
                    warn!("Session {} timed out", self.id);
                    return Err(ProtocolError::TimedOut("keepalive"));
                },
        }

        Ok(())
    }

    /// Handles a keepalive answer. Answers nobody asked for and answers with the wrong id break
    /// the exchange.
    pub fn handle_alive(
        &mut self,
        id: i64,
        now: Instant,
        interval: Duration,
    ) -> Result<(), ProtocolError>
    {
        match self.keepalive {
            ConnKeepalive::Sending { .. } =>
                Err(ProtocolError::Violation("unrequested keepalive".to_owned())),
            ConnKeepalive::Waiting { expected_id, .. } =>
                if id == expected_id {
                    trace!("Received keepalive {} from session {}", id, self.id);
                    self.keepalive = ConnKeepalive::Sending {
                        sending_at: now + interval,
                    };
                    Ok(())
                } else {
                    Err(ProtocolError::Violation(format!(
                        "keepalive {} does not match {}",
                        id, expected_id
                    )))
                },
        }
    }

    fn tick_posview(&mut self, now: Instant, config: &Config) -> Result<(), ProtocolError> {
        if let Some(outstanding) = self.outstanding_view {
            if now.saturating_duration_since(outstanding.sent_at) >= config.keepalive_timeout() {
                return Err(ProtocolError::TimedOut("position confirmation"));
            }
        } else if now >= self.next_posview {
            self.send_posview(now, false);
        }

        if now >= self.next_posview {
            self.next_posview = now + config.posview_interval();
        }

        Ok(())
    }

    /// Restates the authoritative position. A snap-back view blocks moves until it is confirmed.
    pub fn send_posview(&mut self, now: Instant, snap_back: bool) {
        self.posview_sequence = self.posview_sequence.wrapping_add(1);
        self.outstanding_view = Some(OutstandingView {
            sequence: self.posview_sequence,
            sent_at: now,
            snap_back,
        });

        self.send_packet(&ClientBoundPacket::PlayerPosView {
            sequence: self.posview_sequence,
            move_sequence: self.move_sequence,
            view: self.view,
        });
    }

    /// Handles a Player-PosView-Confirm. Confirms of older views are ignored.
    pub fn handle_posview_confirm(&mut self, sequence: u32) -> Result<(), ProtocolError> {
        if sequence == 0 || sequence > self.posview_sequence {
            return Err(ProtocolError::Violation(format!(
                "confirm for view {} which was never sent",
                sequence
            )));
        }

        match self.outstanding_view {
            Some(outstanding) if outstanding.sequence == sequence => {
                if outstanding.snap_back {
                    debug!("Session {} accepted snap-back {}", self.id, sequence);
                }
                self.outstanding_view = None;
            }
            _ => trace!("Ignoring stale view confirm {} from session {}", sequence, self.id),
        }

        Ok(())
    }

    /// Handles a Player-Move. On `SnapBack` the rejected sequence is recorded so the client
    /// recognizes the following view as the answer to that move.
    pub fn handle_move(
        &mut self,
        sequence: u32,
        view: PosView,
        max_move_distance: f64,
    ) -> Result<MoveOutcome, ProtocolError>
    {
        if !view.is_finite() {
            return Err(ProtocolError::Malformed("non-finite position".to_owned()));
        }

        if matches!(self.outstanding_view, Some(OutstandingView { snap_back: true, .. })) {
            return Ok(MoveOutcome::Ignored);
        }

        if sequence <= self.move_sequence {
            return Ok(MoveOutcome::Stale);
        }

        self.move_sequence = sequence;
        if view.position.distance_sq(&self.view.position) > max_move_distance * max_move_distance {
            return Ok(MoveOutcome::SnapBack);
        }

        self.view = view;
        Ok(MoveOutcome::Accepted)
    }

    /// The chunk the player is in.
    #[inline]
    pub fn center(&self) -> Option<ChunkPos> {
        self.center
    }

    #[inline]
    pub fn is_interested(&self, pos: ChunkPos) -> bool {
        self.interest.contains(&pos)
    }

    #[inline]
    pub fn has_sent(&self, pos: ChunkPos) -> bool {
        self.sent.contains(&pos)
    }

    pub fn mark_sent(&mut self, pos: ChunkPos) {
        self.sent.insert(pos);
    }

    /// Chunks in the interest set whose data has not been sent yet, nearest first.
    pub fn unsent_interest(&self) -> Vec<ChunkPos> {
        let mut unsent = self
            .interest
            .iter()
            .copied()
            .filter(|pos| !self.sent.contains(pos))
            .collect::<Vec<_>>();
        self.sort_by_distance(&mut unsent);
        unsent
    }

    /// Recomputes the interest set around the given chunk. Returns the chunks that left the set
    /// after having been sent, which the client must be told to unload.
    pub fn update_interest(
        &mut self,
        center: ChunkPos,
        view_distance: u32,
        vertical_view_distance: u32,
    ) -> Vec<ChunkPos>
    {
        self.center = Some(center);

        let h = view_distance as i32;
        let v = vertical_view_distance as i32;
        let mut interest = HashSet::with_capacity(((2 * h + 1) * (2 * h + 1) * (2 * v + 1)) as usize);
        for x in -h ..= h {
            for y in -v ..= v {
                for z in -h ..= h {
                    interest.insert(ChunkPos::new(center.x + x, center.y + y, center.z + z));
                }
            }
        }

        let mut left = self
            .sent
            .iter()
            .copied()
            .filter(|pos| !interest.contains(pos))
            .collect::<Vec<_>>();
        left.sort();
        for pos in &left {
            self.sent.remove(pos);
        }

        self.interest = interest;
        left
    }

    fn sort_by_distance(&self, chunks: &mut [ChunkPos]) {
        if let Some(center) = self.center {
            chunks.sort_by_key(|&pos| (center.distance(pos), pos));
        } else {
            chunks.sort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::WrappedPacket;
    use tokio::sync::mpsc::UnboundedReceiver;
    use voxel_util::Vector;

    fn session() -> (ServerSession, UnboundedReceiver<WrappedPacket>, Instant, Config) {
        let (handle, rx) = AsyncWriteHandle::channel();
        let config = Config::default();
        let now = Instant::now();
        (ServerSession::new(3, handle, now, &config), rx, now, config)
    }

    fn playing() -> (ServerSession, UnboundedReceiver<WrappedPacket>, Instant, Config) {
        let (mut session, rx, now, config) = session();
        session.phase = ConnectionState::GameData;
        session.start_playing(now, PosView::new(Vector::rect(0.5, 5.0, 0.5), 0.0, 0.0), &config);
        (session, rx, now, config)
    }

    fn next_packet(
        session: &ServerSession,
        rx: &mut UnboundedReceiver<WrappedPacket>,
    ) -> Option<ClientBoundPacket> {
        match rx.try_recv().ok()? {
            WrappedPacket::Buffer(buffer) => session.packets().decode_client_bound(buffer).ok(),
            WrappedPacket::Disconnect => None,
        }
    }

    #[test]
    fn profile_names_are_validated() {
        let uuid = Uuid::new_v4();
        assert!(Profile::new(uuid, "Steve_42").is_valid());
        assert!(!Profile::new(uuid, "").is_valid());
        assert!(!Profile::new(uuid, "a name").is_valid());
        assert!(!Profile::new(uuid, "x".repeat(17)).is_valid());
    }

    #[test]
    fn login_must_finish_in_time() {
        let (mut session, _rx, now, config) = session();
        assert!(session.tick(now, &config).is_ok());
        assert_eq!(
            session.tick(now + config.keepalive_timeout(), &config),
            Err(ProtocolError::TimedOut("login"))
        );
    }

    #[test]
    fn keepalive_round_trip() {
        let (mut session, mut rx, now, config) = playing();
        assert!(matches!(
            next_packet(&session, &mut rx),
            Some(ClientBoundPacket::PlayerPosView { sequence: 1, .. })
        ));

        let later = now + config.keepalive_interval();
        session.tick(later, &config).unwrap();
        let id = match next_packet(&session, &mut rx) {
            Some(ClientBoundPacket::Alive { id }) => id,
            other => panic!("Expected keepalive, found {:?}", other),
        };

        assert!(session.handle_alive(id.wrapping_add(1), later, config.keepalive_interval()).is_err());
        session.handle_alive(id, later, config.keepalive_interval()).unwrap();
        assert!(matches!(session.keepalive(), ConnKeepalive::Sending { .. }));

        // Nothing is outstanding now, so another answer is out of order
        assert!(session.handle_alive(id, later, config.keepalive_interval()).is_err());
    }

    #[test]
    fn unanswered_keepalive_times_out() {
        let (mut session, _rx, now, config) = playing();

        let sent_at = now + config.keepalive_interval();
        session.tick(sent_at, &config).unwrap();
        assert_eq!(
            session.tick(sent_at + config.keepalive_timeout(), &config),
            Err(ProtocolError::TimedOut("keepalive"))
        );
    }

    #[test]
    fn posview_confirms() {
        let (mut session, _rx, now, _config) = playing();

        assert!(session.handle_posview_confirm(2).is_err());
        session.send_posview(now, false);
        session.handle_posview_confirm(1).unwrap();
        assert!(session.outstanding_view.is_some());
        session.handle_posview_confirm(2).unwrap();
        assert!(session.outstanding_view.is_none());
    }

    #[test]
    fn moves_are_sequenced_and_bounded() {
        let (mut session, _rx, now, config) = playing();
        let max = config.max_move_distance;
        let step = |x: f64| PosView::new(Vector::rect(x, 5.0, 0.5), 90.0, 0.0);

        assert_eq!(session.handle_move(1, step(2.0), max), Ok(MoveOutcome::Accepted));
        assert_eq!(session.handle_move(1, step(3.0), max), Ok(MoveOutcome::Stale));
        assert_eq!(session.view().position.x, 2.0);

        assert_eq!(session.handle_move(2, step(500.0), max), Ok(MoveOutcome::SnapBack));
        session.send_posview(now, true);
        assert_eq!(session.handle_move(3, step(3.0), max), Ok(MoveOutcome::Ignored));

        session.handle_posview_confirm(2).unwrap();
        assert_eq!(session.handle_move(4, step(3.0), max), Ok(MoveOutcome::Accepted));

        let broken = PosView::new(Vector::rect(f64::NAN, 0.0, 0.0), 0.0, 0.0);
        assert!(matches!(
            session.handle_move(5, broken, max),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn interest_follows_the_player() {
        let (mut session, _rx, _now, _config) = session();
        assert!(session.update_interest(ChunkPos::new(0, 0, 0), 1, 0).is_empty());
        assert_eq!(session.unsent_interest().len(), 9);
        assert_eq!(session.unsent_interest()[0], ChunkPos::new(0, 0, 0));

        for pos in session.unsent_interest() {
            session.mark_sent(pos);
        }

        let left = session.update_interest(ChunkPos::new(1, 0, 0), 1, 0);
        assert_eq!(left, vec![
            ChunkPos::new(-1, 0, -1),
            ChunkPos::new(-1, 0, 0),
            ChunkPos::new(-1, 0, 1)
        ]);
        assert!(!session.has_sent(ChunkPos::new(-1, 0, 0)));
        assert_eq!(session.unsent_interest(), vec![
            ChunkPos::new(2, 0, -1),
            ChunkPos::new(2, 0, 0),
            ChunkPos::new(2, 0, 1)
        ]);
    }
}
