//! Cache coordinator client
//!
//! Each world node keeps one connection to the coordinator. The client
//! registers hosted players, resolves which node hosts a player and relays
//! whispers. Pushes and evictions arriving from the coordinator are routed
//! to the owning session actor through the [`SessionManager`].
//!
//! When the connection drops, lookups in flight fail, new requests fail
//! fast with [`NetworkError::CoordinatorUnavailable`], and a background task
//! reconnects with exponential backoff. After a reconnect every hosted
//! player is registered again.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use rand::Rng;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use crate::cluster::protocol::CoordinatorMessage;
use crate::config::CoordinatorEndpoint;
use crate::error::{NetworkError, ProtocolError, Result};
use crate::net::codec::FrameCodec;
use crate::net::pool::BufferPool;
use crate::net::session::{SessionCommand, SessionManager};

/// Messages buffered towards the coordinator
const OUTBOUND_QUEUE_DEPTH: usize = 256;

type CoordinatorStream = Framed<TcpStream, FrameCodec>;

// ============ Reconnect policy ============

/// Exponential backoff between reconnect attempts
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectPolicy {
    pub initial: Duration,
    pub max: Duration,
    /// Relative jitter applied to each delay, 0.2 is +/-20%
    pub jitter: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(30),
            jitter: 0.2,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (0-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self
            .initial
            .saturating_mul(1u32 << attempt.min(16))
            .min(self.max);

        if self.jitter <= 0.0 {
            return base;
        }
        let factor = rand::thread_rng().gen_range(1.0 - self.jitter..=1.0 + self.jitter);
        base.mul_f64(factor.max(0.0))
    }
}

// ============ Client ============

/// Handle to the coordinator connection; cheap to clone
#[derive(Clone)]
pub struct CoordinatorClient {
    inner: Arc<Inner>,
}

struct Inner {
    endpoint: CoordinatorEndpoint,
    node_id: u32,
    name: String,
    max_packet_size: usize,
    pool: BufferPool,
    sessions: Arc<SessionManager>,
    outbound: RwLock<Option<mpsc::Sender<Bytes>>>,
    pending: DashMap<u32, oneshot::Sender<Option<u32>>>,
    next_request: AtomicU32,
    policy: ReconnectPolicy,
}

impl CoordinatorClient {
    /// Connect and handshake once, then keep the connection alive in the background.
    ///
    /// A failed first attempt is returned to the caller; only later drops are retried.
    pub async fn connect(
        endpoint: CoordinatorEndpoint,
        node_id: u32,
        name: impl Into<String>,
        max_packet_size: usize,
        sessions: Arc<SessionManager>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<Self> {
        let inner = Arc::new(Inner::new(
            endpoint,
            node_id,
            name.into(),
            max_packet_size,
            sessions,
            ReconnectPolicy::default(),
        ));

        let stream = inner.open().await?;
        let outbound = inner.attach(stream);
        info!(
            node_id,
            coordinator = %inner.endpoint.address(),
            "Connected to cache coordinator"
        );

        tokio::spawn(inner.clone().run(outbound, shutdown_rx));
        Ok(Self { inner })
    }

    pub fn node_id(&self) -> u32 {
        self.inner.node_id
    }

    pub fn is_connected(&self) -> bool {
        self.inner.outbound.read().is_some()
    }

    /// Announce that this node now hosts `player_id`
    pub fn register(&self, player_id: u32, name: &str) -> std::result::Result<(), NetworkError> {
        self.inner.send(&CoordinatorMessage::Register {
            player_id,
            name: name.to_string(),
        })
    }

    pub fn deregister(&self, player_id: u32) -> std::result::Result<(), NetworkError> {
        self.inner
            .send(&CoordinatorMessage::Deregister { player_id })
    }

    /// Find the node hosting `player_id`; `None` when the player is offline
    pub async fn lookup(&self, player_id: u32) -> std::result::Result<Option<u32>, NetworkError> {
        let request_id = self.inner.next_request.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.inner.pending.insert(request_id, tx);

        if let Err(e) = self.inner.send(&CoordinatorMessage::Lookup {
            request_id,
            player_id,
        }) {
            self.inner.pending.remove(&request_id);
            return Err(e);
        }

        // The sender is dropped when the connection is lost
        rx.await.map_err(|_| NetworkError::CoordinatorUnavailable)
    }

    /// Relay a whisper to whichever node hosts `target_id`
    pub fn forward(
        &self,
        target_id: u32,
        from: &str,
        message: &str,
    ) -> std::result::Result<(), NetworkError> {
        self.inner.send(&CoordinatorMessage::Forward {
            target_id,
            from: from.to_string(),
            message: message.to_string(),
        })
    }
}

impl Inner {
    fn new(
        endpoint: CoordinatorEndpoint,
        node_id: u32,
        name: String,
        max_packet_size: usize,
        sessions: Arc<SessionManager>,
        policy: ReconnectPolicy,
    ) -> Self {
        Self {
            endpoint,
            node_id,
            name,
            max_packet_size,
            pool: BufferPool::new(16),
            sessions,
            outbound: RwLock::new(None),
            pending: DashMap::new(),
            next_request: AtomicU32::new(1),
            policy,
        }
    }

    /// Open a connection and complete the handshake
    async fn open(&self) -> Result<CoordinatorStream> {
        let stream = TcpStream::connect(self.endpoint.address()).await?;
        stream.set_nodelay(true)?;
        let mut framed = Framed::new(stream, FrameCodec::new(self.max_packet_size));

        let handshake = CoordinatorMessage::Handshake {
            node_id: self.node_id,
            name: self.name.clone(),
        };
        framed.send(handshake.encode(&self.pool)).await?;

        let frame = framed
            .next()
            .await
            .ok_or(NetworkError::ConnectionClosed)??;
        match CoordinatorMessage::decode(&frame)? {
            CoordinatorMessage::HandshakeAck { accepted: true, .. } => Ok(framed),
            CoordinatorMessage::HandshakeAck { reason, .. } => {
                Err(NetworkError::HandshakeRejected(reason).into())
            }
            other => Err(ProtocolError::UnexpectedPacket {
                state: "handshake".to_string(),
                opcode: other.opcode() as u32,
            }
            .into()),
        }
    }

    /// Install the writer for a fresh connection and re-register hosted players.
    ///
    /// Returns the read half for the run loop.
    fn attach(&self, stream: CoordinatorStream) -> OpenConnection {
        let (mut sink, stream) = stream.split();
        let (tx, mut rx) = mpsc::channel::<Bytes>(OUTBOUND_QUEUE_DEPTH);

        let writer = tokio::spawn(async move {
            while let Some(bytes) = rx.recv().await {
                if let Err(e) = sink.send(bytes).await {
                    debug!(error = %e, "Coordinator writer stopped");
                    break;
                }
            }
        });

        *self.outbound.write() = Some(tx);

        let hosted = self.sessions.hosted_players();
        for player in &hosted {
            if let Err(e) = self.send(&CoordinatorMessage::Register {
                player_id: player.player_id,
                name: player.name.clone(),
            }) {
                warn!(player_id = player.player_id, error = %e, "Failed to re-register player");
            }
        }
        if !hosted.is_empty() {
            info!(players = hosted.len(), "Re-registered hosted players");
        }

        OpenConnection { stream, writer }
    }

    /// Mark the connection lost and fail every lookup waiting on it
    fn detach(&self) {
        *self.outbound.write() = None;
        let failed = self.pending.len();
        self.pending.clear();
        if failed > 0 {
            debug!(failed, "Failed pending coordinator lookups");
        }
    }

    fn send(&self, message: &CoordinatorMessage) -> std::result::Result<(), NetworkError> {
        let outbound = self.outbound.read();
        let tx = outbound.as_ref().ok_or(NetworkError::CoordinatorUnavailable)?;
        tx.try_send(message.encode(&self.pool)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => NetworkError::WriteBufferFull,
            mpsc::error::TrySendError::Closed(_) => NetworkError::CoordinatorUnavailable,
        })
    }

    async fn run(
        self: Arc<Self>,
        mut connection: OpenConnection,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        loop {
            let lost = tokio::select! {
                result = self.read_loop(&mut connection.stream) => {
                    match result {
                        Ok(()) => warn!("Coordinator closed the connection"),
                        Err(e) => warn!(error = %e, "Coordinator connection lost"),
                    }
                    true
                }
                _ = shutdown_rx.recv() => false,
            };

            connection.writer.abort();
            self.detach();
            if !lost {
                debug!("Coordinator client shutting down");
                return;
            }

            let mut attempt = 0u32;
            let stream = loop {
                let delay = self.policy.delay(attempt);
                debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Reconnecting to coordinator"
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown_rx.recv() => return,
                }

                match self.open().await {
                    Ok(stream) => break stream,
                    Err(e) => {
                        warn!(attempt, error = %e, "Coordinator reconnect failed");
                        attempt = attempt.saturating_add(1);
                    }
                }
            };

            info!(
                node_id = self.node_id,
                attempts = attempt + 1,
                "Reconnected to cache coordinator"
            );
            connection = self.attach(stream);
        }
    }

    async fn read_loop(
        &self,
        stream: &mut futures_util::stream::SplitStream<CoordinatorStream>,
    ) -> Result<()> {
        while let Some(frame) = stream.next().await {
            let message = CoordinatorMessage::decode(&frame?)?;
            self.handle_message(message);
        }
        Ok(())
    }

    fn handle_message(&self, message: CoordinatorMessage) {
        match message {
            CoordinatorMessage::LookupResult {
                request_id,
                node_id,
            } => match self.pending.remove(&request_id) {
                Some((_, tx)) => {
                    let _ = tx.send(node_id);
                }
                None => debug!(request_id, "Late coordinator lookup result"),
            },
            CoordinatorMessage::Push {
                target_id,
                from,
                message,
            } => {
                if let Err(e) = self
                    .sessions
                    .route_to_player(target_id, SessionCommand::Whisper { from, message })
                {
                    debug!(player_id = target_id, error = %e, "Could not deliver pushed whisper");
                }
            }
            CoordinatorMessage::Evict { player_id } => {
                info!(player_id, "Coordinator evicted player");
                if let Err(e) = self
                    .sessions
                    .route_to_player(player_id, SessionCommand::Evict)
                {
                    debug!(player_id, error = %e, "Evicted player has no session");
                }
            }
            other => {
                warn!(opcode = ?other.opcode(), "Unexpected message from coordinator");
            }
        }
    }
}

struct OpenConnection {
    stream: futures_util::stream::SplitStream<CoordinatorStream>,
    writer: tokio::task::JoinHandle<()>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detached_client(sessions: Arc<SessionManager>) -> CoordinatorClient {
        CoordinatorClient {
            inner: Arc::new(Inner::new(
                CoordinatorEndpoint::default(),
                1,
                "world-1".to_string(),
                1024,
                sessions,
                ReconnectPolicy::default(),
            )),
        }
    }

    #[test]
    fn test_backoff_doubles_to_cap() {
        let policy = ReconnectPolicy {
            jitter: 0.0,
            ..Default::default()
        };
        assert_eq!(policy.delay(0), Duration::from_millis(500));
        assert_eq!(policy.delay(1), Duration::from_secs(1));
        assert_eq!(policy.delay(3), Duration::from_secs(4));
        assert_eq!(policy.delay(10), Duration::from_secs(30));
        assert_eq!(policy.delay(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn test_backoff_jitter_bounds() {
        let policy = ReconnectPolicy::default();
        for _ in 0..100 {
            let delay = policy.delay(2);
            assert!(delay >= Duration::from_millis(1600));
            assert!(delay <= Duration::from_millis(2400));
        }
    }

    #[tokio::test]
    async fn test_requests_fail_fast_while_disconnected() {
        let client = detached_client(Arc::new(SessionManager::new()));

        assert!(!client.is_connected());
        assert!(matches!(
            client.register(1, "Alice"),
            Err(NetworkError::CoordinatorUnavailable)
        ));
        assert!(matches!(
            client.lookup(1).await,
            Err(NetworkError::CoordinatorUnavailable)
        ));
        assert!(client.inner.pending.is_empty());
    }

    #[tokio::test]
    async fn test_detach_fails_pending_lookups() {
        let client = detached_client(Arc::new(SessionManager::new()));
        let (tx, _rx) = mpsc::channel(4);
        *client.inner.outbound.write() = Some(tx);

        let lookup = {
            let client = client.clone();
            tokio::spawn(async move { client.lookup(9).await })
        };
        while client.inner.pending.is_empty() {
            tokio::task::yield_now().await;
        }
        client.inner.detach();

        assert!(matches!(
            lookup.await.unwrap(),
            Err(NetworkError::CoordinatorUnavailable)
        ));
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_lookup_result_resolves_request() {
        let client = detached_client(Arc::new(SessionManager::new()));
        let (tx, mut rx) = mpsc::channel(4);
        *client.inner.outbound.write() = Some(tx);

        let lookup = {
            let client = client.clone();
            tokio::spawn(async move { client.lookup(9).await })
        };

        let sent = CoordinatorMessage::decode(&rx.recv().await.unwrap()).unwrap();
        let CoordinatorMessage::Lookup { request_id, player_id } = sent else {
            panic!("expected a lookup, got {sent:?}");
        };
        assert_eq!(player_id, 9);

        client.inner.handle_message(CoordinatorMessage::LookupResult {
            request_id,
            node_id: Some(3),
        });
        assert_eq!(lookup.await.unwrap().unwrap(), Some(3));
    }

    #[tokio::test]
    async fn test_push_routes_whisper_to_session() {
        let sessions = Arc::new(SessionManager::new());
        let (in_tx, mut in_rx) = mpsc::channel(4);
        let (out_tx, _out_rx) = mpsc::channel(4);
        let session = sessions
            .create_session("127.0.0.1:4000".parse().unwrap(), in_tx, out_tx)
            .unwrap();
        sessions.bind_player(session.id, 7, "Bob").unwrap();

        let client = detached_client(sessions);
        client.inner.handle_message(CoordinatorMessage::Push {
            target_id: 7,
            from: "Alice".to_string(),
            message: "hello".to_string(),
        });
        client.inner.handle_message(CoordinatorMessage::Evict { player_id: 7 });

        assert_eq!(
            in_rx.recv().await.unwrap(),
            SessionCommand::Whisper {
                from: "Alice".to_string(),
                message: "hello".to_string(),
            }
        );
        assert_eq!(in_rx.recv().await.unwrap(), SessionCommand::Evict);
    }
}
