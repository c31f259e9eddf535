//! Integration tests for the world gateway and the cache coordinator
//!
//! These tests run real sockets on loopback and verify the end-to-end behavior of:
//! - Joining a world node and receiving the initial state
//! - Quest commands and their snapshots
//! - Player persistence across sessions
//! - Cross-node whispers and evictions through the coordinator
//! - Coordinator handshake validation

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_util::codec::Framed;

use rhisis_server::cluster::{CoordinatorClient, CoordinatorRegistry, CoordinatorServer};
use rhisis_server::config::{CoordinatorConfig, CoordinatorEndpoint, ServerConfig};
use rhisis_server::error::{NetworkError, RhisisError};
use rhisis_server::game::item::ItemProperties;
use rhisis_server::game::persistence::PlayerStore;
use rhisis_server::game::quest::{QuestItem, QuestProperties};
use rhisis_server::game::resources::GameResources;
use rhisis_server::net::codec::FrameCodec;
use rhisis_server::net::handler::ConnectionHandler;
use rhisis_server::net::pool::BufferPool;
use rhisis_server::protocol::packets::{
    ClientPacket, JoinPacket, JoinResult, Opcode, PacketCodec, QuestCommandPacket, WhisperPacket,
};
use rhisis_server::protocol::snapshot::{DefineText, Snapshot, SnapshotPacket};
use rhisis_server::AppState;

type Client = Framed<TcpStream, FrameCodec>;

const TIMEOUT: Duration = Duration::from_secs(5);

// ============ Harness ============

async fn start_coordinator() -> (SocketAddr, Arc<CoordinatorRegistry>, broadcast::Sender<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Arc::new(CoordinatorServer::new(CoordinatorConfig::default()));
    let registry = server.registry().clone();
    let (shutdown_tx, _) = broadcast::channel(1);
    tokio::spawn(server.serve(listener, shutdown_tx.subscribe()));
    (addr, registry, shutdown_tx)
}

fn endpoint(addr: SocketAddr) -> CoordinatorEndpoint {
    CoordinatorEndpoint {
        host: addr.ip().to_string(),
        port: addr.port(),
    }
}

fn resources() -> GameResources {
    let mut quest = QuestProperties::new(10, "QUEST_10");
    quest.rewards.gold = 250;
    quest.rewards.items.push(QuestItem::new(500, 3));

    GameResources::new()
        .with_item(ItemProperties::new(500, "Potion").stackable(10))
        .with_quest(quest)
        .with_text("QUEST_10", "First Steps")
}

/// Start a world node in development mode; returns its client address
async fn start_node(
    coordinator: SocketAddr,
    node_id: u32,
    store: PlayerStore,
) -> (SocketAddr, Arc<AppState>) {
    let mut config = ServerConfig::default();
    config.server.node_id = node_id;
    config.server.name = format!("world-{node_id}");
    config.server.dev_mode = true;
    config.coordinator = Some(endpoint(coordinator));

    let (shutdown_tx, _) = broadcast::channel(1);
    let state = AppState::new(config.clone(), resources(), store, shutdown_tx.clone());
    let client = CoordinatorClient::connect(
        endpoint(coordinator),
        node_id,
        config.server.name.clone(),
        config.server.max_packet_size,
        state.session_manager.clone(),
        shutdown_tx.subscribe(),
    )
    .await
    .unwrap();
    let state = Arc::new(state.with_coordinator(client));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accept_state = state.clone();
    tokio::spawn(async move {
        while let Ok((stream, peer)) = listener.accept().await {
            let handler = ConnectionHandler::new(accept_state.clone());
            tokio::spawn(async move {
                let _ = handler.handle_tcp(stream, peer).await;
            });
        }
    });

    (addr, state)
}

async fn connect(addr: SocketAddr) -> Client {
    let stream = TcpStream::connect(addr).await.unwrap();
    Framed::new(stream, FrameCodec::default())
}

async fn send(client: &mut Client, packet: ClientPacket) {
    let pool = BufferPool::new(1);
    client.send(packet.encode(&pool)).await.unwrap();
}

async fn recv(client: &mut Client) -> Option<Bytes> {
    tokio::time::timeout(TIMEOUT, client.next())
        .await
        .expect("timed out waiting for a frame")
        .map(|frame| frame.unwrap())
}

async fn recv_snapshot(client: &mut Client) -> SnapshotPacket {
    loop {
        let frame = recv(client).await.expect("connection closed");
        let (header, _) = PacketCodec::decode(&frame).unwrap();
        if header.opcode == Opcode::Snapshot.as_u32() {
            return SnapshotPacket::decode(&frame).unwrap();
        }
    }
}

/// Join and consume the join result plus the initial state
async fn join(client: &mut Client, player_id: u32) -> SnapshotPacket {
    send(client, ClientPacket::Join(JoinPacket { player_id })).await;

    let frame = recv(client).await.expect("connection closed");
    let (header, mut body) = PacketCodec::decode(&frame).unwrap();
    assert_eq!(header.opcode, Opcode::JoinResult.as_u32());
    assert_eq!(body.read_ubyte().unwrap(), JoinResult::Success as u8);

    let state = recv_snapshot(client).await;
    assert_eq!(state.recipient, header.object_id);
    state
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition never became true");
}

// ============ Gateway ============

#[tokio::test]
async fn test_join_sends_initial_state() {
    let (coordinator, registry, _shutdown) = start_coordinator().await;
    let (addr, _state) = start_node(coordinator, 1, PlayerStore::memory()).await;

    let mut client = connect(addr).await;
    let state = join(&mut client, 7).await;

    assert!(state
        .snapshots
        .iter()
        .any(|(_, snapshot)| matches!(snapshot, Snapshot::SetGold { gold: 0 })));
    assert!(state
        .snapshots
        .iter()
        .any(|(_, snapshot)| matches!(snapshot, Snapshot::QuestDiary(_))));

    wait_until(|| registry.locate(7) == Some(1)).await;
}

#[tokio::test]
async fn test_quest_accept_and_complete_over_the_wire() {
    let (coordinator, _registry, _shutdown) = start_coordinator().await;
    let (addr, _state) = start_node(coordinator, 1, PlayerStore::memory()).await;
    let mut client = connect(addr).await;
    join(&mut client, 7).await;

    send(&mut client, ClientPacket::QuestAccept(QuestCommandPacket { quest_id: 10 })).await;
    let set_quest = recv_snapshot(&mut client).await;
    assert!(matches!(&set_quest.snapshots[0].1, Snapshot::SetQuest(record) if record.id == 10));
    let started = recv_snapshot(&mut client).await;
    assert_eq!(
        started.snapshots[0].1,
        Snapshot::defined_text(DefineText::QuestStarted, vec!["\"First Steps\"".to_string()])
    );

    send(&mut client, ClientPacket::QuestComplete(QuestCommandPacket { quest_id: 10 })).await;
    let mut saw_gold = false;
    let mut saw_ended = false;
    while !saw_ended {
        let packet = recv_snapshot(&mut client).await;
        for (_, snapshot) in packet.snapshots {
            match snapshot {
                Snapshot::SetGold { gold } => {
                    assert_eq!(gold, 250);
                    saw_gold = true;
                }
                Snapshot::DefinedText { text, .. } if text == DefineText::QuestEnded => {
                    saw_ended = true;
                }
                _ => {}
            }
        }
    }
    assert!(saw_gold);
}

#[tokio::test]
async fn test_player_persists_across_sessions() {
    let players = tempfile::tempdir().unwrap();
    let (coordinator, registry, _shutdown) = start_coordinator().await;
    let (addr, state) = start_node(coordinator, 1, PlayerStore::json(players.path())).await;

    let mut client = connect(addr).await;
    join(&mut client, 7).await;
    send(&mut client, ClientPacket::QuestAccept(QuestCommandPacket { quest_id: 10 })).await;
    recv_snapshot(&mut client).await;
    send(&mut client, ClientPacket::Logout).await;
    while recv(&mut client).await.is_some() {}

    wait_until(|| state.session_manager.count() == 0).await;
    wait_until(|| registry.locate(7).is_none()).await;
    assert!(players.path().join("7.json").exists());

    let mut client = connect(addr).await;
    let initial = join(&mut client, 7).await;
    let diary = initial
        .snapshots
        .iter()
        .find_map(|(_, snapshot)| match snapshot {
            Snapshot::QuestDiary(diary) => Some(diary.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(diary.active.len(), 1);
    assert_eq!(diary.active[0].id, 10);
}

// ============ Cluster ============

#[tokio::test]
async fn test_whisper_crosses_nodes() {
    let (coordinator, registry, _shutdown) = start_coordinator().await;
    let (addr1, _state1) = start_node(coordinator, 1, PlayerStore::memory()).await;
    let (addr2, _state2) = start_node(coordinator, 2, PlayerStore::memory()).await;

    let mut alice = connect(addr1).await;
    join(&mut alice, 1).await;
    let mut bob = connect(addr2).await;
    join(&mut bob, 2).await;
    wait_until(|| registry.locate(2) == Some(2)).await;

    send(
        &mut alice,
        ClientPacket::Whisper(WhisperPacket {
            target_id: 2,
            message: "hello from world-1".to_string(),
        }),
    )
    .await;

    let whisper = recv_snapshot(&mut bob).await;
    assert_eq!(
        whisper.snapshots[0].1,
        Snapshot::Whisper {
            from: "Player1".to_string(),
            message: "hello from world-1".to_string(),
        }
    );
}

#[tokio::test]
async fn test_whisper_to_offline_player() {
    let (coordinator, _registry, _shutdown) = start_coordinator().await;
    let (addr, _state) = start_node(coordinator, 1, PlayerStore::memory()).await;
    let mut alice = connect(addr).await;
    join(&mut alice, 1).await;

    send(
        &mut alice,
        ClientPacket::Whisper(WhisperPacket {
            target_id: 99,
            message: "anyone?".to_string(),
        }),
    )
    .await;

    let notice = recv_snapshot(&mut alice).await;
    assert_eq!(
        notice.snapshots[0].1,
        Snapshot::defined_text(DefineText::WhisperTargetOffline, vec!["99".to_string()])
    );
}

#[tokio::test]
async fn test_join_elsewhere_evicts_old_session() {
    let (coordinator, registry, _shutdown) = start_coordinator().await;
    let (addr1, state1) = start_node(coordinator, 1, PlayerStore::memory()).await;
    let (addr2, _state2) = start_node(coordinator, 2, PlayerStore::memory()).await;

    let mut first = connect(addr1).await;
    join(&mut first, 5).await;
    wait_until(|| registry.locate(5) == Some(1)).await;

    let mut second = connect(addr2).await;
    join(&mut second, 5).await;

    // The old node drops the connection
    while recv(&mut first).await.is_some() {}
    wait_until(|| !state1.session_manager.is_player_online(5)).await;
    assert_eq!(registry.locate(5), Some(2));
}

#[tokio::test]
async fn test_duplicate_node_id_rejected() {
    let (coordinator, registry, _shutdown) = start_coordinator().await;
    let (_addr, _state) = start_node(coordinator, 1, PlayerStore::memory()).await;
    let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let result = CoordinatorClient::connect(
        endpoint(coordinator),
        1,
        "impostor",
        65535,
        Arc::new(Default::default()),
        shutdown_rx,
    )
    .await;

    assert!(matches!(
        result,
        Err(RhisisError::Network(NetworkError::HandshakeRejected(_)))
    ));
    assert_eq!(registry.node_count(), 1);
}

#[tokio::test]
async fn test_first_connect_failure_is_returned() {
    let unreachable = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let (_tx, rx) = broadcast::channel(1);
    let result = CoordinatorClient::connect(
        endpoint(unreachable),
        2,
        "world-2",
        65535,
        Arc::new(Default::default()),
        rx,
    )
    .await;
    assert!(matches!(result, Err(RhisisError::Io(_))));
}

// ============ Design data ============

#[tokio::test]
async fn test_bundled_resources_load() {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("data/resources");
    let resources = GameResources::load(&path).await.unwrap();

    let letter = resources.quest(3).unwrap();
    assert_eq!(letter.end_conditions.dialog_npc.as_deref(), Some("MaFl_Hyuit"));
    assert_eq!(resources.text(&letter.title), "A Letter to Flarine");
    assert_eq!(resources.quest(2).unwrap().start_requirements.previous_quest, Some(1));
    assert_eq!(resources.item(500).unwrap().max_stack, 9999);
}
