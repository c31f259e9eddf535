//! Session management module
//!
//! Manages client sessions including:
//! - Session lifecycle (creation, tracking, cleanup)
//! - Session state machine (connected -> in game -> disconnecting)
//! - The per-session inbound command queue
//! - Thread-safe session registry indexed by session and player id
//!
//! Only the session actor touches a player's aggregate. Anything else that
//! wants to affect a player (coordinator pushes, evictions, shutdown) sends a
//! [`SessionCommand`] into that player's queue.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{NetworkError, Result, RhisisError};
use crate::game::quest::QuestAction;

/// Unique session identifier
pub type SessionId = u64;

/// First object id handed to players
const FIRST_OBJECT_ID: u32 = 0x0100_0000;

/// Session state in the connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Connected, no character selected yet
    Connected,
    /// A character has joined the world
    InGame,
    /// Session is disconnecting
    Disconnecting,
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Connected => "Connected",
            SessionState::InGame => "InGame",
            SessionState::Disconnecting => "Disconnecting",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Work items processed by a session actor, one at a time
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    /// A client packet payload
    Packet(Bytes),
    /// A private message routed from this or another node
    Whisper { from: String, message: String },
    /// Quest progress triggered outside the client's own packets
    QuestProgress(QuestAction),
    /// The player logged in elsewhere; drop the session
    Evict,
    /// Server shutdown
    Shutdown,
    /// The client connection closed or sent an unreadable frame
    Disconnected,
}

/// The character bound to a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPlayer {
    pub player_id: u32,
    pub object_id: u32,
    pub name: String,
}

/// A connected client session
pub struct Session {
    /// Unique session identifier
    pub id: SessionId,
    /// Remote address of the client
    pub address: SocketAddr,
    state: RwLock<SessionState>,
    player: RwLock<Option<SessionPlayer>>,
    /// Time of session creation
    pub created_at: Instant,
    inbound_tx: mpsc::Sender<SessionCommand>,
    outbound_tx: mpsc::Sender<Bytes>,
}

impl Session {
    pub fn new(
        id: SessionId,
        address: SocketAddr,
        inbound_tx: mpsc::Sender<SessionCommand>,
        outbound_tx: mpsc::Sender<Bytes>,
    ) -> Self {
        Self {
            id,
            address,
            state: RwLock::new(SessionState::Connected),
            player: RwLock::new(None),
            created_at: Instant::now(),
            inbound_tx,
            outbound_tx,
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    pub fn set_state(&self, new_state: SessionState) {
        let old_state = std::mem::replace(&mut *self.state.write(), new_state);
        debug!(
            session_id = self.id,
            old_state = %old_state,
            new_state = %new_state,
            "Session state changed"
        );
    }

    pub fn player(&self) -> Option<SessionPlayer> {
        self.player.read().clone()
    }

    pub fn player_id(&self) -> Option<u32> {
        self.player.read().as_ref().map(|p| p.player_id)
    }

    /// Queue a command for the session actor without waiting
    pub fn try_command(&self, command: SessionCommand) -> std::result::Result<(), NetworkError> {
        self.inbound_tx.try_send(command).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => NetworkError::InboundQueueFull(self.id),
            mpsc::error::TrySendError::Closed(_) => NetworkError::ConnectionClosed,
        })
    }

    /// Queue a command, waiting for room in the inbound queue
    pub async fn command(&self, command: SessionCommand) -> std::result::Result<(), NetworkError> {
        self.inbound_tx
            .send(command)
            .await
            .map_err(|_| NetworkError::ConnectionClosed)
    }

    /// Queue an encoded packet for the writer task
    pub fn try_send(&self, data: Bytes) -> Result<()> {
        self.outbound_tx
            .try_send(data)
            .map_err(|_| RhisisError::Network(NetworkError::WriteBufferFull))
    }

    pub fn outbound(&self) -> &mpsc::Sender<Bytes> {
        &self.outbound_tx
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("state", &self.state())
            .field("player", &self.player())
            .field("age", &self.created_at.elapsed())
            .finish()
    }
}

/// Thread-safe session manager
pub struct SessionManager {
    sessions: DashMap<SessionId, Arc<Session>>,
    /// Player id -> session id for sessions with a joined character
    player_to_session: DashMap<u32, SessionId>,
    /// IP -> session count (for connection limiting)
    ip_counts: DashMap<String, usize>,
    next_id: AtomicU64,
    next_object_id: AtomicU32,
    max_per_ip: usize,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionManager {
    pub fn new() -> Self {
        Self::with_limits(10)
    }

    /// Create a session manager with a per-IP connection limit
    pub fn with_limits(max_per_ip: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            player_to_session: DashMap::new(),
            ip_counts: DashMap::new(),
            next_id: AtomicU64::new(1),
            next_object_id: AtomicU32::new(FIRST_OBJECT_ID),
            max_per_ip,
        }
    }

    /// Create and register a session with its two queues
    pub fn create_session(
        &self,
        address: SocketAddr,
        inbound_tx: mpsc::Sender<SessionCommand>,
        outbound_tx: mpsc::Sender<Bytes>,
    ) -> Result<Arc<Session>> {
        let ip = address.ip().to_string();
        {
            let mut count = self.ip_counts.entry(ip.clone()).or_insert(0);
            if *count >= self.max_per_ip {
                warn!(
                    ip = %ip,
                    count = *count,
                    max = self.max_per_ip,
                    "Connection limit exceeded for IP"
                );
                return Err(NetworkError::TooManyConnections(ip).into());
            }
            *count += 1;
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let session = Arc::new(Session::new(id, address, inbound_tx, outbound_tx));
        self.sessions.insert(id, session.clone());

        info!(session_id = id, address = %address, "Session created");
        Ok(session)
    }

    pub fn get(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.get(&id).map(|r| r.clone())
    }

    /// Session currently hosting a player
    pub fn get_by_player(&self, player_id: u32) -> Option<Arc<Session>> {
        self.player_to_session
            .get(&player_id)
            .and_then(|id| self.get(*id))
    }

    pub fn is_player_online(&self, player_id: u32) -> bool {
        self.player_to_session.contains_key(&player_id)
    }

    /// Bind a character to a session; returns the assigned object id.
    ///
    /// Fails when the player is already bound to another session.
    pub fn bind_player(&self, session_id: SessionId, player_id: u32, name: &str) -> Option<u32> {
        let session = self.get(session_id)?;

        match self.player_to_session.entry(player_id) {
            dashmap::mapref::entry::Entry::Occupied(entry) if *entry.get() != session_id => {
                return None;
            }
            entry => {
                entry.insert(session_id);
            }
        }

        let object_id = self.next_object_id.fetch_add(1, Ordering::SeqCst);
        *session.player.write() = Some(SessionPlayer {
            player_id,
            object_id,
            name: name.to_string(),
        });
        session.set_state(SessionState::InGame);

        debug!(session_id, player_id, object_id, "Player bound to session");
        Some(object_id)
    }

    /// Deliver a command to the session hosting `player_id`
    pub fn route_to_player(
        &self,
        player_id: u32,
        command: SessionCommand,
    ) -> std::result::Result<(), NetworkError> {
        let session = self
            .get_by_player(player_id)
            .ok_or(NetworkError::SessionNotFound(u64::from(player_id)))?;
        session.try_command(command)
    }

    /// Players currently hosted by this node
    pub fn hosted_players(&self) -> Vec<SessionPlayer> {
        self.sessions
            .iter()
            .filter_map(|entry| entry.value().player())
            .collect()
    }

    pub fn remove(&self, id: SessionId) {
        if let Some((_, session)) = self.sessions.remove(&id) {
            if let Some(player) = session.player.write().take() {
                self.player_to_session
                    .remove_if(&player.player_id, |_, bound| *bound == id);
            }

            let ip = session.address.ip().to_string();
            if let Some(mut count) = self.ip_counts.get_mut(&ip) {
                *count = count.saturating_sub(1);
            }
            self.ip_counts.remove_if(&ip, |_, count| *count == 0);

            info!(
                session_id = id,
                duration_secs = session.created_at.elapsed().as_secs(),
                "Session removed"
            );
        }
    }

    /// Ask every session actor to stop
    pub fn shutdown_all(&self) {
        for entry in self.sessions.iter() {
            if let Err(e) = entry.value().try_command(SessionCommand::Shutdown) {
                debug!(session_id = entry.key(), error = %e, "Could not signal shutdown");
            }
        }
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    pub fn player_count(&self) -> usize {
        self.player_to_session.len()
    }
}
