//! Cache coordinator server
//!
//! Tracks which world node hosts each player. Nodes connect, handshake with
//! their node id, then register and deregister players as they join and
//! leave. The coordinator answers lookups, relays whispers to the hosting
//! node and evicts a player from its old node when it registers elsewhere.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_util::codec::Framed;
use tracing::{debug, error, info, warn};

use crate::cluster::protocol::CoordinatorMessage;
use crate::config::CoordinatorConfig;
use crate::error::{ProtocolError, Result};
use crate::net::codec::FrameCodec;
use crate::net::pool::BufferPool;

/// A connected world node
#[derive(Debug)]
struct NodeHandle {
    name: String,
    address: SocketAddr,
    tx: mpsc::Sender<Bytes>,
}

/// Node and player location registry
#[derive(Debug, Default)]
pub struct CoordinatorRegistry {
    nodes: DashMap<u32, NodeHandle>,
    /// Player id -> node id
    players: DashMap<u32, u32>,
}

impl CoordinatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node; false when the id is already connected
    fn add_node(
        &self,
        node_id: u32,
        name: String,
        address: SocketAddr,
        tx: mpsc::Sender<Bytes>,
    ) -> bool {
        match self.nodes.entry(node_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(NodeHandle { name, address, tx });
                true
            }
        }
    }

    /// Drop a node and every player it hosted; returns the number of players dropped
    pub fn remove_node(&self, node_id: u32) -> usize {
        self.nodes.remove(&node_id);
        let before = self.players.len();
        self.players.retain(|_, hosted_by| *hosted_by != node_id);
        before - self.players.len()
    }

    /// Record that `node_id` hosts `player_id`.
    ///
    /// Returns the previous node when the player moved.
    pub fn register_player(&self, player_id: u32, node_id: u32) -> Option<u32> {
        self.players
            .insert(player_id, node_id)
            .filter(|previous| *previous != node_id)
    }

    /// Forget a player if `node_id` still hosts it
    pub fn deregister_player(&self, player_id: u32, node_id: u32) -> bool {
        self.players
            .remove_if(&player_id, |_, hosted_by| *hosted_by == node_id)
            .is_some()
    }

    pub fn locate(&self, player_id: u32) -> Option<u32> {
        self.players.get(&player_id).map(|node| *node)
    }

    /// Queue a message for a node; false when it is gone or its queue is full
    fn send_to_node(&self, node_id: u32, bytes: Bytes) -> bool {
        let Some(node) = self.nodes.get(&node_id) else {
            return false;
        };
        match node.tx.try_send(bytes) {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    node_id,
                    node = %node.name,
                    address = %node.address,
                    error = %e,
                    "Could not queue message for node"
                );
                false
            }
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }
}

/// Cache coordinator server
pub struct CoordinatorServer {
    config: CoordinatorConfig,
    registry: Arc<CoordinatorRegistry>,
    pool: BufferPool,
}

impl CoordinatorServer {
    pub fn new(config: CoordinatorConfig) -> Self {
        Self {
            config,
            registry: Arc::new(CoordinatorRegistry::new()),
            pool: BufferPool::new(32),
        }
    }

    pub fn registry(&self) -> &Arc<CoordinatorRegistry> {
        &self.registry
    }

    /// Accept node connections until shutdown
    pub async fn serve(
        self: Arc<Self>,
        listener: TcpListener,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            info!(address = %addr, "New node connection");
                            let server = self.clone();
                            tokio::spawn(async move {
                                if let Err(e) = server.handle_node(stream, addr).await {
                                    warn!(address = %addr, error = %e, "Node connection error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept node connection");
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Coordinator acceptor shutting down");
                    break;
                }
            }
        }
    }

    async fn handle_node(&self, stream: TcpStream, addr: SocketAddr) -> Result<()> {
        stream.set_nodelay(true)?;
        let framed = Framed::new(stream, FrameCodec::new(self.config.max_packet_size));
        let (mut sink, mut stream) = framed.split();

        let Some(first) = stream.next().await else {
            return Ok(());
        };
        let (node_id, name) = match CoordinatorMessage::decode(&first?)? {
            CoordinatorMessage::Handshake { node_id, name } => (node_id, name),
            other => {
                return Err(ProtocolError::UnexpectedPacket {
                    state: "handshake".to_string(),
                    opcode: other.opcode() as u32,
                }
                .into())
            }
        };

        let (tx, mut rx) = mpsc::channel::<Bytes>(self.config.outbound_queue_depth);
        let reply_tx = tx.clone();
        if !self.registry.add_node(node_id, name.clone(), addr, tx) {
            warn!(node_id, node = %name, "Rejecting duplicate node id");
            let ack = CoordinatorMessage::HandshakeAck {
                accepted: false,
                reason: format!("node id {node_id} is already connected"),
            };
            sink.send(ack.encode(&self.pool)).await?;
            return Ok(());
        }

        let ack = CoordinatorMessage::HandshakeAck {
            accepted: true,
            reason: String::new(),
        };
        if let Err(e) = sink.send(ack.encode(&self.pool)).await {
            self.registry.remove_node(node_id);
            return Err(e);
        }
        info!(node_id, node = %name, address = %addr, "Node registered");

        let writer = tokio::spawn(async move {
            while let Some(bytes) = rx.recv().await {
                if sink.send(bytes).await.is_err() {
                    break;
                }
            }
        });

        let result = async {
            while let Some(frame) = stream.next().await {
                let message = CoordinatorMessage::decode(&frame?)?;
                self.handle_message(node_id, message, &reply_tx).await;
            }
            Ok(())
        }
        .await;

        let dropped = self.registry.remove_node(node_id);
        writer.abort();
        info!(node_id, node = %name, players = dropped, "Node disconnected");

        result
    }

    /// Messages from one node are handled in arrival order.
    ///
    /// Replies to the sending node wait for room on its queue, which pauses
    /// reading from that node until its writer catches up. Messages relayed
    /// to other nodes are dropped when their queue is full.
    async fn handle_message(
        &self,
        node_id: u32,
        message: CoordinatorMessage,
        reply: &mpsc::Sender<Bytes>,
    ) {
        match message {
            CoordinatorMessage::Register { player_id, name } => {
                debug!(node_id, player_id, name = %name, "Player registered");
                if let Some(previous) = self.registry.register_player(player_id, node_id) {
                    info!(
                        player_id,
                        from = previous,
                        to = node_id,
                        "Evicting player from previous node"
                    );
                    let evict = CoordinatorMessage::Evict { player_id };
                    self.registry.send_to_node(previous, evict.encode(&self.pool));
                }
            }
            CoordinatorMessage::Deregister { player_id } => {
                if self.registry.deregister_player(player_id, node_id) {
                    debug!(node_id, player_id, "Player deregistered");
                }
            }
            CoordinatorMessage::Lookup {
                request_id,
                player_id,
            } => {
                let result = CoordinatorMessage::LookupResult {
                    request_id,
                    node_id: self.registry.locate(player_id),
                };
                if reply.send(result.encode(&self.pool)).await.is_err() {
                    debug!(node_id, request_id, "Node closed before its lookup reply");
                }
            }
            CoordinatorMessage::Forward {
                target_id,
                from,
                message,
            } => match self.registry.locate(target_id) {
                Some(target_node) => {
                    let push = CoordinatorMessage::Push {
                        target_id,
                        from,
                        message,
                    };
                    self.registry.send_to_node(target_node, push.encode(&self.pool));
                }
                None => {
                    debug!(node_id, target_id, "Dropping whisper for offline player");
                }
            },
            other => {
                warn!(node_id, opcode = ?other.opcode(), "Unexpected message from node");
            }
        }
    }
}
