//! Connection handler module
//!
//! Handles the lifecycle of client connections including:
//! - Framing the socket and creating the session
//! - A reader task feeding the session's inbound queue
//! - A writer task draining the session's outbound queue
//! - The session actor, which owns the player and processes one command at a time
//! - Saving and deregistering the player on disconnect

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tracing::{debug, error, info, trace, warn};

use crate::error::{GameError, NetworkError, ProtocolError, Result, RhisisError};
use crate::game::persistence::PlayerData;
use crate::game::player::Player;
use crate::game::quest::QuestId;
use crate::game::quest_engine::{QuestCompletion, QuestEngine};
use crate::game::resources::GameResources;
use crate::net::codec::FrameCodec;
use crate::net::session::{Session, SessionCommand, SessionState};
use crate::protocol::packets::{
    ClientPacket, JoinResult, JoinResultPacket, Opcode, PacketCodec, PongPacket, WhisperPacket,
    NULL_OBJECT_ID,
};
use crate::protocol::snapshot::{DefineText, Outbox, Snapshot};
use crate::AppState;

/// How long queued packets may take to flush after the session ends
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection handler for processing client connections
pub struct ConnectionHandler {
    /// Shared application state
    state: Arc<AppState>,
}

impl ConnectionHandler {
    /// Create a new connection handler
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Handle a TCP connection until the session ends
    pub async fn handle_tcp(&self, stream: TcpStream, addr: SocketAddr) -> Result<()> {
        debug!(address = %addr, "Handling TCP connection");
        stream.set_nodelay(true)?;

        let server = &self.state.config.server;
        let framed = Framed::new(stream, FrameCodec::new(server.max_packet_size));
        let (mut sink, mut frames) = framed.split();

        let (inbound_tx, inbound_rx) = mpsc::channel(server.inbound_queue_depth);
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Bytes>(server.outbound_queue_depth);
        let session = self
            .state
            .session_manager
            .create_session(addr, inbound_tx, outbound_tx)?;
        let session_id = session.id;

        let writer = tokio::spawn(async move {
            while let Some(bytes) = outbound_rx.recv().await {
                if let Err(e) = sink.send(bytes).await {
                    debug!(session_id, error = %e, "Writer stopped");
                    return;
                }
            }
            let _ = sink.close().await;
        });

        let reader_session = session.clone();
        let reader = tokio::spawn(async move {
            while let Some(frame) = frames.next().await {
                let payload = match frame {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!(session_id, error = %e, "Dropping connection on bad frame");
                        break;
                    }
                };
                trace!(session_id, size = payload.len(), "Received frame");
                if reader_session
                    .command(SessionCommand::Packet(payload))
                    .await
                    .is_err()
                {
                    return;
                }
            }
            let _ = reader_session.command(SessionCommand::Disconnected).await;
        });

        let actor = SessionActor::new(self.state.clone(), session);
        actor.run(inbound_rx).await;

        reader.abort();
        let _ = reader.await;

        // Every outbound sender is gone once the session and player are dropped
        if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer).await.is_err() {
            warn!(session_id, "Timed out flushing outbound packets");
        }

        debug!(session_id, "Connection handler ending");
        Ok(())
    }
}

/// What the actor does after a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// Owner of one session's player
pub struct SessionActor {
    state: Arc<AppState>,
    session: Arc<Session>,
    outbox: Outbox,
    player: Option<Player>,
}

impl SessionActor {
    pub fn new(state: Arc<AppState>, session: Arc<Session>) -> Self {
        let outbox = Outbox::new(state.pool.clone(), session.outbound().clone());
        Self {
            state,
            session,
            outbox,
            player: None,
        }
    }

    /// Process commands until the session stops, then clean up
    pub async fn run(mut self, mut inbound: mpsc::Receiver<SessionCommand>) {
        while let Some(command) = inbound.recv().await {
            match self.handle_command(command).await {
                Ok(Flow::Continue) => {}
                Ok(Flow::Stop) => break,
                Err(e) => {
                    warn!(session_id = self.session.id, error = %e, "Closing session");
                    break;
                }
            }
        }

        self.session.set_state(SessionState::Disconnecting);
        self.cleanup().await;
    }

    async fn handle_command(&mut self, command: SessionCommand) -> Result<Flow> {
        match command {
            SessionCommand::Packet(payload) => {
                let packet = match ClientPacket::decode(&payload) {
                    Ok(packet) => packet,
                    Err(ProtocolError::UnknownOpcode(opcode)) => {
                        warn!(
                            session_id = self.session.id,
                            opcode = format_args!("0x{opcode:08X}"),
                            "Ignoring unknown opcode"
                        );
                        return Ok(Flow::Continue);
                    }
                    Err(e) => return Err(e.into()),
                };

                match self.handle_packet(packet).await {
                    Err(RhisisError::Game(e)) => {
                        self.notify_error(&e);
                        Ok(Flow::Continue)
                    }
                    other => other,
                }
            }
            SessionCommand::Whisper { from, message } => {
                if let Some(player) = &self.player {
                    player.send(Snapshot::Whisper { from, message });
                }
                Ok(Flow::Continue)
            }
            SessionCommand::QuestProgress(action) => {
                if let Some(player) = self.player.as_mut() {
                    QuestEngine::new(player, &self.state.resources).update(&action);
                }
                Ok(Flow::Continue)
            }
            SessionCommand::Evict => {
                info!(session_id = self.session.id, "Player joined on another node, evicting");
                Ok(Flow::Stop)
            }
            SessionCommand::Shutdown => {
                debug!(session_id = self.session.id, "Session shutting down");
                Ok(Flow::Stop)
            }
            SessionCommand::Disconnected => {
                debug!(session_id = self.session.id, "Connection closed");
                Ok(Flow::Stop)
            }
        }
    }

    async fn handle_packet(&mut self, packet: ClientPacket) -> Result<Flow> {
        match packet {
            ClientPacket::Join(join) => self.handle_join(join.player_id).await,
            ClientPacket::Ping(ping) => {
                let object_id = self
                    .player
                    .as_ref()
                    .map_or(NULL_OBJECT_ID, |player| player.object_id);
                self.outbox.send_bytes(PacketCodec::encode(
                    self.outbox.pool(),
                    object_id,
                    &PongPacket { time: ping.time },
                ));
                Ok(Flow::Continue)
            }
            ClientPacket::Logout => {
                info!(session_id = self.session.id, "Client logged out");
                Ok(Flow::Stop)
            }
            ClientPacket::QuestAccept(p) => self.accept_quest(p.quest_id),
            ClientPacket::QuestComplete(p) => self.complete_quest(p.quest_id),
            ClientPacket::QuestRemove(p) => {
                let (player, resources) = self.in_game(Opcode::QuestRemove)?;
                QuestEngine::new(player, resources).remove_quest(p.quest_id)?;
                Ok(Flow::Continue)
            }
            ClientPacket::QuestCheck(p) => {
                let (player, resources) = self.in_game(Opcode::QuestCheck)?;
                QuestEngine::new(player, resources).check_quest(p.quest_id)?;
                Ok(Flow::Continue)
            }
            ClientPacket::Whisper(whisper) => self.handle_whisper(whisper).await,
        }
    }

    // ============ Join ============

    async fn handle_join(&mut self, player_id: u32) -> Result<Flow> {
        if self.player.is_some() {
            return Err(self.unexpected(Opcode::Join));
        }

        let data = match self.state.store.load(player_id).await {
            Ok(Some(data)) => data,
            Ok(None) if self.state.config.server.dev_mode => {
                info!(player_id, "Creating character in development mode");
                PlayerData::new(player_id, format!("Player{player_id}"))
            }
            Ok(None) => {
                warn!(session_id = self.session.id, player_id, "Unknown character");
                self.send_join_result(NULL_OBJECT_ID, JoinResult::UnknownCharacter);
                return Ok(Flow::Continue);
            }
            Err(e) => {
                error!(player_id, error = %e, "Failed to load player");
                self.send_join_result(NULL_OBJECT_ID, JoinResult::ServerError);
                return Ok(Flow::Continue);
            }
        };

        let Some(object_id) =
            self.state
                .session_manager
                .bind_player(self.session.id, player_id, &data.name)
        else {
            warn!(session_id = self.session.id, player_id, "Character already connected");
            self.send_join_result(NULL_OBJECT_ID, JoinResult::AlreadyConnected);
            return Ok(Flow::Continue);
        };

        let player = Player::from_data(
            &data,
            object_id,
            &self.state.resources,
            self.outbox.clone(),
        );
        self.send_join_result(object_id, JoinResult::Success);

        if let Some(coordinator) = &self.state.coordinator {
            if let Err(e) = coordinator.register(player_id, &player.name) {
                warn!(player_id, error = %e, "Failed to register player with coordinator");
            }
        }

        player.send_full_state();
        info!(
            session_id = self.session.id,
            player_id,
            object_id,
            name = %player.name,
            "Player joined"
        );
        self.player = Some(player);

        Ok(Flow::Continue)
    }

    fn send_join_result(&self, object_id: u32, result: JoinResult) {
        self.outbox.send_bytes(PacketCodec::encode(
            self.outbox.pool(),
            object_id,
            &JoinResultPacket { result },
        ));
    }

    // ============ Quests ============

    fn accept_quest(&mut self, quest_id: QuestId) -> Result<Flow> {
        let (player, resources) = self.in_game(Opcode::QuestAccept)?;
        let properties = resources.quest(quest_id);
        // A quest already in the diary falls through so the duplicate surfaces as a conflict
        let in_diary = player.quest_diary.contains(quest_id);
        let mut engine = QuestEngine::new(player, resources);

        if properties.is_some() && !in_diary && !engine.can_start_quest(properties.as_deref())
        {
            return Err(GameError::Validation(format!(
                "requirements for quest {quest_id} are not met"
            ))
            .into());
        }

        engine.accept_quest(properties)?;
        Ok(Flow::Continue)
    }

    fn complete_quest(&mut self, quest_id: QuestId) -> Result<Flow> {
        let (player, resources) = self.in_game(Opcode::QuestComplete)?;
        let player_id = player.id;
        let mut engine = QuestEngine::new(player, resources);

        if !engine.conditions_met(quest_id) {
            return Err(GameError::Validation(format!(
                "quest {quest_id} is not ready to complete"
            ))
            .into());
        }

        match engine.complete_quest(quest_id)? {
            QuestCompletion::NoInventorySpace => {
                debug!(player_id, quest_id, "Quest completion postponed, inventory full");
            }
            QuestCompletion::Completed { gaps } => {
                debug!(player_id, quest_id, skipped_rewards = gaps.len(), "Quest completed");
            }
        }
        Ok(Flow::Continue)
    }

    // ============ Whisper ============

    async fn handle_whisper(&mut self, whisper: WhisperPacket) -> Result<Flow> {
        let Some(player) = &self.player else {
            return Err(self.unexpected(Opcode::Whisper));
        };
        let from = player.name.clone();
        let WhisperPacket { target_id, message } = whisper;

        let command = SessionCommand::Whisper {
            from: from.clone(),
            message: message.clone(),
        };
        match self.state.session_manager.route_to_player(target_id, command) {
            Ok(()) => return Ok(Flow::Continue),
            Err(NetworkError::SessionNotFound(_)) => {}
            Err(e) => {
                warn!(target_id, error = %e, "Could not deliver whisper locally");
                return Ok(Flow::Continue);
            }
        }

        let delivered = match &self.state.coordinator {
            Some(coordinator) => match coordinator.lookup(target_id).await {
                Ok(Some(node_id)) => match coordinator.forward(target_id, &from, &message) {
                    Ok(()) => {
                        trace!(target_id, node_id, "Whisper forwarded");
                        true
                    }
                    Err(e) => {
                        warn!(target_id, node_id, error = %e, "Failed to forward whisper");
                        false
                    }
                },
                Ok(None) => false,
                Err(e) => {
                    warn!(target_id, error = %e, "Coordinator lookup failed");
                    false
                }
            },
            None => false,
        };

        if !delivered {
            if let Some(player) = &self.player {
                player.send_defined_text(
                    DefineText::WhisperTargetOffline,
                    vec![target_id.to_string()],
                );
            }
        }
        Ok(Flow::Continue)
    }

    // ============ Helpers ============

    /// The joined player and design data; packets other than join and ping need both
    fn in_game(&mut self, opcode: Opcode) -> Result<(&mut Player, &GameResources)> {
        let state = self.session.state();
        match self.player.as_mut() {
            Some(player) => Ok((player, &*self.state.resources)),
            None => Err(ProtocolError::UnexpectedPacket {
                state: state.to_string(),
                opcode: opcode.as_u32(),
            }
            .into()),
        }
    }

    fn unexpected(&self, opcode: Opcode) -> RhisisError {
        ProtocolError::UnexpectedPacket {
            state: self.session.state().to_string(),
            opcode: opcode.as_u32(),
        }
        .into()
    }

    /// Report a rejected game action to the client
    fn notify_error(&self, e: &GameError) {
        let Some(player) = &self.player else { return };
        debug!(player_id = player.id, error = %e, "Game action rejected");
        player.send(Snapshot::SystemMessage {
            text: e.to_string(),
        });
    }

    async fn cleanup(&mut self) {
        if let Some(player) = self.player.take() {
            if let Err(e) = self.state.store.save(&player.to_data()).await {
                error!(player_id = player.id, error = %e, "Failed to save player");
            }
            if let Some(coordinator) = &self.state.coordinator {
                if let Err(e) = coordinator.deregister(player.id) {
                    debug!(player_id = player.id, error = %e, "Failed to deregister player");
                }
            }
            info!(session_id = self.session.id, player_id = player.id, "Player left");
        }

        self.state.session_manager.remove(self.session.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::game::item::ItemProperties;
    use crate::game::persistence::PlayerStore;
    use crate::game::quest::{QuestItem, QuestProperties};
    use crate::net::pool::BufferPool;
    use crate::protocol::packets::{JoinPacket, QuestCommandPacket};
    use crate::protocol::snapshot::SnapshotPacket;
    use tokio::sync::broadcast;

    fn app_state(dev_mode: bool) -> Arc<AppState> {
        let mut config = ServerConfig::default();
        config.server.dev_mode = dev_mode;

        let mut quest = QuestProperties::new(10, "QUEST_10");
        quest.rewards.gold = 100;
        quest.rewards.items.push(QuestItem::new(500, 1));
        let resources = GameResources::new()
            .with_item(ItemProperties::new(500, "Potion"))
            .with_quest(quest)
            .with_text("QUEST_10", "First Steps");

        let (shutdown_tx, _) = broadcast::channel(1);
        Arc::new(AppState::new(config, resources, PlayerStore::memory(), shutdown_tx))
    }

    fn new_actor(state: &Arc<AppState>, port: u16) -> (SessionActor, mpsc::Receiver<Bytes>) {
        let (in_tx, _in_rx) = mpsc::channel(8);
        let (out_tx, out_rx) = mpsc::channel(64);
        let session = state
            .session_manager
            .create_session(format!("127.0.0.1:{port}").parse().unwrap(), in_tx, out_tx)
            .unwrap();
        (SessionActor::new(state.clone(), session), out_rx)
    }

    fn packet(packet: ClientPacket) -> SessionCommand {
        SessionCommand::Packet(packet.encode(&BufferPool::new(1)))
    }

    fn drain(rx: &mut mpsc::Receiver<Bytes>) -> Vec<Bytes> {
        let mut packets = Vec::new();
        while let Ok(bytes) = rx.try_recv() {
            packets.push(bytes);
        }
        packets
    }

    #[tokio::test]
    async fn test_join_unknown_character_rejected() {
        let state = app_state(false);
        let (mut actor, mut out) = new_actor(&state, 5000);

        let flow = actor
            .handle_command(packet(ClientPacket::Join(JoinPacket { player_id: 1 })))
            .await
            .unwrap();

        assert_eq!(flow, Flow::Continue);
        assert!(actor.player.is_none());
        let sent = drain(&mut out);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0][8], JoinResult::UnknownCharacter as u8);
    }

    #[tokio::test]
    async fn test_join_in_dev_mode_sends_state() {
        let state = app_state(true);
        let (mut actor, mut out) = new_actor(&state, 5001);

        actor
            .handle_command(packet(ClientPacket::Join(JoinPacket { player_id: 1 })))
            .await
            .unwrap();

        let player = actor.player.as_ref().unwrap();
        assert!(state.session_manager.is_player_online(1));
        let sent = drain(&mut out);
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0][8], JoinResult::Success as u8);
        let full_state = SnapshotPacket::decode(&sent[1]).unwrap();
        assert_eq!(full_state.recipient, player.object_id);
    }

    #[tokio::test]
    async fn test_quest_before_join_closes_session() {
        let state = app_state(true);
        let (mut actor, _out) = new_actor(&state, 5002);

        let result = actor
            .handle_command(packet(ClientPacket::QuestAccept(QuestCommandPacket {
                quest_id: 10,
            })))
            .await;

        assert!(matches!(
            result,
            Err(RhisisError::Protocol(ProtocolError::UnexpectedPacket { .. }))
        ));
    }

    #[tokio::test]
    async fn test_quest_accept_and_complete() {
        let state = app_state(true);
        let (mut actor, mut out) = new_actor(&state, 5003);
        actor
            .handle_command(packet(ClientPacket::Join(JoinPacket { player_id: 1 })))
            .await
            .unwrap();
        drain(&mut out);

        actor
            .handle_command(packet(ClientPacket::QuestAccept(QuestCommandPacket {
                quest_id: 10,
            })))
            .await
            .unwrap();
        assert!(actor.player.as_ref().unwrap().quest_diary.has_active_quest(10));
        assert_eq!(drain(&mut out).len(), 2);

        actor
            .handle_command(packet(ClientPacket::QuestComplete(QuestCommandPacket {
                quest_id: 10,
            })))
            .await
            .unwrap();
        let player = actor.player.as_ref().unwrap();
        assert!(player.quest_diary.has_completed_quest(10));
        assert_eq!(player.gold, 100);
        assert_eq!(player.inventory.count_item(500), 1);
    }

    #[tokio::test]
    async fn test_duplicate_accept_reports_conflict() {
        let state = app_state(true);
        let (mut actor, mut out) = new_actor(&state, 5004);
        actor
            .handle_command(packet(ClientPacket::Join(JoinPacket { player_id: 1 })))
            .await
            .unwrap();
        let accept = || packet(ClientPacket::QuestAccept(QuestCommandPacket { quest_id: 10 }));
        actor.handle_command(accept()).await.unwrap();
        drain(&mut out);

        let flow = actor.handle_command(accept()).await.unwrap();

        assert_eq!(flow, Flow::Continue);
        let sent = drain(&mut out);
        assert_eq!(sent.len(), 1);
        let notice = SnapshotPacket::decode(&sent[0]).unwrap();
        assert!(matches!(
            &notice.snapshots[0].1,
            Snapshot::SystemMessage { text } if text.starts_with("Conflict")
        ));
    }

    #[tokio::test]
    async fn test_unknown_opcode_ignored() {
        let state = app_state(true);
        let (mut actor, _out) = new_actor(&state, 5005);
        let mut buffer = crate::net::buffer::PacketBuffer::new();
        buffer.write_uint(0x00AB_CDEF);
        buffer.write_uint(NULL_OBJECT_ID);

        let flow = actor
            .handle_command(SessionCommand::Packet(Bytes::copy_from_slice(buffer.as_bytes())))
            .await
            .unwrap();
        assert_eq!(flow, Flow::Continue);
    }

    #[tokio::test]
    async fn test_local_whisper_and_offline_notice() {
        let state = app_state(true);
        let (mut alice, mut alice_out) = new_actor(&state, 5006);
        let (in_tx, mut bob_in) = mpsc::channel(8);
        let (out_tx, _bob_out) = mpsc::channel(8);
        let bob = state
            .session_manager
            .create_session("127.0.0.1:5007".parse().unwrap(), in_tx, out_tx)
            .unwrap();
        state.session_manager.bind_player(bob.id, 2, "Bob").unwrap();

        alice
            .handle_command(packet(ClientPacket::Join(JoinPacket { player_id: 1 })))
            .await
            .unwrap();
        drain(&mut alice_out);

        alice
            .handle_command(packet(ClientPacket::Whisper(WhisperPacket {
                target_id: 2,
                message: "hi".to_string(),
            })))
            .await
            .unwrap();
        assert_eq!(
            bob_in.recv().await.unwrap(),
            SessionCommand::Whisper {
                from: "Player1".to_string(),
                message: "hi".to_string(),
            }
        );

        alice
            .handle_command(packet(ClientPacket::Whisper(WhisperPacket {
                target_id: 3,
                message: "anyone?".to_string(),
            })))
            .await
            .unwrap();
        let notice = SnapshotPacket::decode(&drain(&mut alice_out)[0]).unwrap();
        assert_eq!(
            notice.snapshots[0].1,
            Snapshot::defined_text(DefineText::WhisperTargetOffline, vec!["3".to_string()])
        );
    }

    #[tokio::test]
    async fn test_cleanup_saves_and_removes_session() {
        let state = app_state(true);
        let (mut actor, _out) = new_actor(&state, 5008);
        actor
            .handle_command(packet(ClientPacket::Join(JoinPacket { player_id: 1 })))
            .await
            .unwrap();
        actor.player.as_mut().unwrap().gold = 42;

        let flow = actor.handle_command(SessionCommand::Evict).await.unwrap();
        assert_eq!(flow, Flow::Stop);
        actor.cleanup().await;

        assert_eq!(state.session_manager.count(), 0);
        assert!(!state.session_manager.is_player_online(1));
        let saved = state.store.load(1).await.unwrap().unwrap();
        assert_eq!(saved.gold, 42);
    }
}
