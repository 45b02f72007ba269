use crate::{
    base::{ClientId, SyncServer},
    block::AIR_ID,
    hit::{PostponedBlockHit, RAY_EPSILON},
    network::{
        packet::{ClientBoundPacket, PlayerActionKind, PosView, ServerBoundPacket},
        MoveOutcome,
        Profile,
        ProtocolError,
    },
    world::{BlockChangeCause, BlockPos},
};
use log::*;
use std::time::Instant;
use uuid::Uuid;
use voxel_net::{ConnectionState, PacketBuffer, PROTOCOL_VERSION};

impl SyncServer {
    /// Decodes a frame from the given client with the client's current packet mapping and
    /// handles it. Any protocol error disconnects the client.
    pub(crate) fn handle_frame(&mut self, id: ClientId, buffer: PacketBuffer, now: Instant) {
        let session = match self.client_list.get(id) {
            Some(session) if session.phase() != ConnectionState::Disconnected => session,
            _ => {
                trace!("Dropping frame from closed client {}", id);
                return;
            }
        };

        let phase = session.phase();
        let decoded = session.packets().decode_server_bound(buffer);
        let result = decoded.and_then(|packet| {
            if packet.kind().server_bound_in(phase) {
                self.dispatch_packet(id, packet, now)
            } else {
                Err(ProtocolError::OutOfPhase {
                    packet: packet.kind(),
                    phase,
                })
            }
        });

        if let Err(error) = result {
            self.disconnect_client(id, &error);
        }
    }

    fn dispatch_packet(
        &mut self,
        id: ClientId,
        packet: ServerBoundPacket,
        now: Instant,
    ) -> Result<(), ProtocolError>
    {
        match packet {
            ServerBoundPacket::Handshake { protocol_version } =>
                self.handle_handshake(id, protocol_version),
            ServerBoundPacket::LoginProfile { uuid, name } =>
                self.handle_login_profile(id, uuid, name, now),
            ServerBoundPacket::PlayerMove { sequence, view } =>
                self.handle_player_move(id, sequence, view, now),
            ServerBoundPacket::PlayerPosViewConfirm { sequence } => match self.client_list.get_mut(id) {
                Some(session) => session.handle_posview_confirm(sequence),
                None => Ok(()),
            },
            ServerBoundPacket::PlayerAction { action, hit } =>
                self.handle_player_action(id, action, &hit),
            ServerBoundPacket::Alive { id: alive_id } => {
                let interval = self.config.keepalive_interval();
                match self.client_list.get_mut(id) {
                    Some(session) => session.handle_alive(alive_id, now, interval),
                    None => Ok(()),
                }
            }
            ServerBoundPacket::Disconnect { reason } => {
                if let Some(session) = self.client_list.get_mut(id) {
                    match session.profile() {
                        Some(profile) => info!("{} disconnected: {}", profile.name, reason),
                        None => debug!("Client {} disconnected: {}", id, reason),
                    }
                    session.close();
                }
                Ok(())
            }
        }
    }

    fn handle_handshake(&mut self, id: ClientId, version: i32) -> Result<(), ProtocolError> {
        if version != PROTOCOL_VERSION {
            return Err(ProtocolError::VersionMismatch {
                expected: PROTOCOL_VERSION,
                found: version,
            });
        }

        if let Some(session) = self.client_list.get_mut(id) {
            session.set_phase(ConnectionState::Login);
            session.send_packet(&ClientBoundPacket::LoginRequest);
        }
        Ok(())
    }

    fn handle_login_profile(
        &mut self,
        id: ClientId,
        uuid: Uuid,
        name: String,
        now: Instant,
    ) -> Result<(), ProtocolError>
    {
        let profile = Profile::new(uuid, name);
        if !profile.is_valid() {
            return Err(ProtocolError::Rejected("Invalid profile".to_owned()));
        }

        if self.client_list.find_player(&profile.name, uuid).is_some() {
            return Err(ProtocolError::Rejected("Already logged in".to_owned()));
        }

        if self.client_list.online_count() >= self.config.max_players as usize {
            return Err(ProtocolError::Rejected("Server is full".to_owned()));
        }

        let registries = self.registry_mappings();
        let packets = self.packets.clone();
        let config = self.config.clone();
        let session = match self.client_list.get_mut(id) {
            Some(session) => session,
            None => return Ok(()),
        };

        info!("{} ({}) joined the game", profile.name, profile.uuid);
        session.send_packet(&ClientBoundPacket::LoginSuccess {
            uuid: profile.uuid,
            name: profile.name.clone(),
        });
        session.set_profile(profile);

        // Registry-Sync is the last packet encoded with the bootstrap mapping
        session.set_phase(ConnectionState::RegistrySync);
        session.send_packet(&ClientBoundPacket::RegistrySync { registries });
        session.set_packets(packets);

        session.set_phase(ConnectionState::GameData);
        session.send_packet(&ClientBoundPacket::GameData {
            world: self.world.name().to_owned(),
            view_distance: config.view_distance,
            vertical_view_distance: config.vertical_view_distance,
            max_move_distance: config.max_move_distance,
            keepalive_timeout_ms: config.keepalive_timeout_ms,
        });

        session.start_playing(now, PosView::new(config.spawn(), 0.0, 0.0), &config);
        self.update_interest(id);
        Ok(())
    }

    fn handle_player_move(
        &mut self,
        id: ClientId,
        sequence: u32,
        view: PosView,
        now: Instant,
    ) -> Result<(), ProtocolError>
    {
        let max_move_distance = self.config.max_move_distance;
        let session = match self.client_list.get_mut(id) {
            Some(session) => session,
            None => return Ok(()),
        };

        let previous_center = session.center();
        match session.handle_move(sequence, view, max_move_distance)? {
            MoveOutcome::Accepted => {
                let center = BlockPos::containing(session.view().position).chunk();
                if previous_center != Some(center) {
                    self.update_interest(id);
                }
            }
            MoveOutcome::SnapBack => {
                debug!("Client {} moved too far, snapping back", id);
                session.send_posview(now, true);
            }
            MoveOutcome::Stale | MoveOutcome::Ignored =>
                trace!("Dropped move {} from client {}", sequence, id),
        }

        Ok(())
    }

    fn handle_player_action(
        &mut self,
        id: ClientId,
        action: PlayerActionKind,
        hit: &PostponedBlockHit,
    ) -> Result<(), ProtocolError>
    {
        if !hit.hit_point.is_finite() {
            return Err(ProtocolError::Malformed("non-finite hit point".to_owned()));
        }

        let eye = match self.client_list.get(id) {
            Some(session) => session.view().position,
            None => return Ok(()),
        };

        let resolved = match hit.build(&self.worlds) {
            Some(resolved) => resolved,
            None => {
                warn!("Client {} acted on unknown world {}", id, hit.world);
                return Ok(());
            }
        };
        let world = resolved.world();
        let registry = world.registry();

        let (target, block) = match action {
            PlayerActionKind::DestroyBlock => (resolved.pos(), registry.air().clone()),
            PlayerActionKind::PlaceBlock(block_id) => match registry.block(block_id) {
                Some(block) => (resolved.pos().offset(resolved.direction()), block.clone()),
                None =>
                    return Err(ProtocolError::Malformed(format!(
                        "unknown block id {}",
                        block_id
                    ))),
            },
        };

        if !world.is_loaded(target.chunk()) {
            warn!(
                "Client {} acted on {:?} in unloaded chunk {:?}",
                id,
                target,
                target.chunk()
            );
            return Ok(());
        }

        // Hit points are client input and must sit on the struck block
        let reach = self.config.max_ray_distance + 1.0;
        let struck = resolved.pos();
        let rejection = if !struck.touches(resolved.hit_point(), RAY_EPSILON) {
            Some("hit point off the block")
        } else if struck.closest_point(eye).distance_sq(&eye) > reach * reach
            || resolved.hit_point().distance_sq(&eye) > reach * reach
        {
            Some("out of reach")
        } else if matches!(action, PlayerActionKind::PlaceBlock(AIR_ID)) {
            Some("placing air")
        } else if matches!(action, PlayerActionKind::PlaceBlock(_))
            && !world.block(target).is_passable()
        {
            Some("target occupied")
        } else {
            None
        };

        if let Some(reason) = rejection {
            debug!("Rejected action of client {} at {:?}: {}", id, target, reason);
            let current = world.block_id(target);
            if let Some(session) = self.client_list.get(id) {
                if session.has_sent(target.chunk()) {
                    session.send_packet(&ClientBoundPacket::BlockUpdate {
                        pos: target,
                        block: current,
                    });
                }
            }
            return Ok(());
        }

        if let Err(e) = world.set_block(target, &block, BlockChangeCause::NetworkApply {
            origin: Some(id),
        }) {
            warn!("Failed to apply action of client {}: {}", id, e);
        }

        Ok(())
    }
}
