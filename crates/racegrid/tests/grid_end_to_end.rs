use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use racegrid::config::GridConfig;
use racegrid::error::GridError;
use racegrid::matchmaking::RaceEngine;
use racegrid::metrics::GridMetrics;
use racegrid::orchestrator::Orchestrator;
use racegrid::services::{MemoryAuth, MemoryGarage, MemoryLeaderboard, RacingNode};
use racegrid::storage::memory_race::MemoryRaceStore;
use racegrid::testing::{FixedRanker, RecordingGarage};
use racegrid::transport::grpc::{announce, GrpcConnector, GrpcRaceNotifier};
use racegrid::transport::proto;
use racegrid::transport::proto::registry_client::RegistryClient;
use racegrid::transport::server::{
    GrpcAuthServer, GrpcGarageServer, GrpcLeaderboardServer, GrpcLivenessServer,
    GrpcRacingServer, GrpcRegistryServer,
};
use racegrid::types::{PlayerDetails, ReplicaAddress, ServiceKind, Track};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::server::Router;
use tonic::transport::Server;

async fn bind() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

/// Serve `router` until the returned sender fires or is dropped.
async fn serve(router: Router, listener: TcpListener) -> oneshot::Sender<()> {
    let (tx, rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        router
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async {
                let _ = rx.await;
            })
            .await
            .unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    tx
}

fn config(replica_port: u16) -> GridConfig {
    GridConfig {
        service_port: replica_port,
        probe_timeout: Duration::from_millis(500),
        call_timeout: Duration::from_secs(5),
        matchmaking_timeout: Duration::from_secs(10),
        announce_interval: Duration::from_millis(50),
        tracks: vec![Track::new(1, "Mugello", 2)],
        ..Default::default()
    }
}

struct Orchestration {
    orchestrator: Arc<Orchestrator>,
    address: ReplicaAddress,
    _shutdown: oneshot::Sender<()>,
}

async fn start_orchestrator(config: &GridConfig, listener: TcpListener) -> Orchestration {
    let addr = listener.local_addr().unwrap();
    let orchestrator = Arc::new(
        Orchestrator::new(
            config,
            Arc::new(GrpcConnector::new(config)),
            Arc::new(GridMetrics::unregistered()),
        )
        .unwrap(),
    );
    let router = Server::builder().add_service(
        GrpcRegistryServer::new(
            orchestrator.listener().clone(),
            orchestrator.settlement().clone(),
        )
        .into_service(),
    );
    let shutdown = serve(router, listener).await;
    Orchestration {
        orchestrator,
        address: ReplicaAddress::new("127.0.0.1", addr.port()),
        _shutdown: shutdown,
    }
}

fn details(username: &str) -> PlayerDetails {
    PlayerDetails {
        username: username.into(),
        password: format!("{username}-pw"),
        email: format!("{username}@example.com"),
        phone: "555-0100".into(),
    }
}

/// Poll the leaderboard until `username` holds `expected` points. Settlement
/// runs after the racing call returns, and the last finisher is settled last.
async fn points_settle(o: &Orchestrator, username: &str, expected: i64, within: Duration) -> i64 {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        let points = o.player(username).await.unwrap().points;
        if points == expected || tokio::time::Instant::now() >= deadline {
            return points;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn filled_race_is_settled_across_the_grid() {
    let (orch_listener, _) = bind().await;
    let (replica_listener, replica_addr) = bind().await;
    let config = config(replica_addr.port());
    let orch = start_orchestrator(&config, orch_listener).await;

    // One process hosting a replica of every kind.
    let store = MemoryRaceStore::new(config.tracks.clone())
        .with_ranker(Arc::new(FixedRanker::new(["bob", "alice"])));
    let engine = RaceEngine::new(
        Arc::new(store),
        config.matchmaking_timeout,
        Arc::new(GridMetrics::unregistered()),
    );
    let notifier = GrpcRaceNotifier::new(&orch.address, &config).unwrap();
    let node = Arc::new(RacingNode::new(engine, Arc::new(notifier)));
    let router = Server::builder()
        .add_service(GrpcLivenessServer::new(node.clone()).into_service())
        .add_service(GrpcAuthServer::new(Arc::new(MemoryAuth::new())).into_service())
        .add_service(GrpcGarageServer::new(Arc::new(MemoryGarage::new())).into_service())
        .add_service(GrpcLeaderboardServer::new(Arc::new(MemoryLeaderboard::new())).into_service())
        .add_service(GrpcRacingServer::new(node).into_service());
    let _replica = serve(router, replica_listener).await;

    for kind in ServiceKind::ALL {
        announce(&orch.address, kind, &config).await;
    }
    let o = &orch.orchestrator;
    for kind in ServiceKind::ALL {
        assert_eq!(o.registry().len(kind), 1, "{kind} not registered");
    }

    for name in ["alice", "bob"] {
        assert!(o.register_player(&details(name)).await.unwrap());
        o.buy(name, 1).await.unwrap();
    }
    assert!(o.login("alice", "alice-pw").await.unwrap());
    assert!(!o.login("alice", "wrong").await.unwrap());

    let first = o.start_race("alice", 1).await.unwrap();
    assert_eq!(first.slots_left, 1);
    let garage = o.garage("alice").await.unwrap();
    assert_eq!(garage[0].racing_on.as_deref(), Some("Mugello"));

    let second = o.start_race("bob", 1).await.unwrap();
    assert!(second.filled_track());
    assert_eq!(points_settle(o, "alice", 1, Duration::from_secs(5)).await, 1);

    // 2000 starting money, 400 for motorcycle 1, then the race reward.
    assert_eq!(o.money("bob").await.unwrap(), 2600);
    assert_eq!(o.money("alice").await.unwrap(), 1700);

    let board = o.leaderboard().await.unwrap();
    assert_eq!(board[0].username, "bob");
    assert_eq!(board[0].points, 25);
    assert_eq!(o.player("alice").await.unwrap().points, 1);

    let history = o.history("alice").await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].position, 2);
    assert_eq!(history[0].total, 2);
    assert_eq!(history[0].track_name, "Mugello");

    let garage = o.garage("alice").await.unwrap();
    assert_eq!(garage[0].racing_on, None);
}

#[tokio::test]
async fn slow_replicas_do_not_cut_settlement_short() {
    let (orch_listener, _) = bind().await;
    let (replica_listener, replica_addr) = bind().await;
    // Stock timeouts: every liveness check below takes most of probe_timeout,
    // so settling two riders outlasts both call_timeout and
    // matchmaking_timeout.
    let config = GridConfig {
        service_port: replica_addr.port(),
        announce_interval: Duration::from_millis(50),
        tracks: vec![Track::new(1, "Mugello", 2)],
        ..Default::default()
    };
    let orch = start_orchestrator(&config, orch_listener).await;

    let garage = Arc::new(RecordingGarage::new());
    garage.liveness().set_delay(Duration::from_millis(700));
    let store = MemoryRaceStore::new(config.tracks.clone())
        .with_ranker(Arc::new(FixedRanker::new(["bob", "alice"])));
    let engine = RaceEngine::new(
        Arc::new(store),
        config.matchmaking_timeout,
        Arc::new(GridMetrics::unregistered()),
    );
    let notifier = GrpcRaceNotifier::new(&orch.address, &config).unwrap();
    let node = Arc::new(RacingNode::new(engine, Arc::new(notifier)));
    // Every kind answers liveness through the slow garage.
    let router = Server::builder()
        .add_service(GrpcLivenessServer::new(garage.clone()).into_service())
        .add_service(GrpcAuthServer::new(Arc::new(MemoryAuth::new())).into_service())
        .add_service(GrpcGarageServer::new(garage.clone()).into_service())
        .add_service(GrpcLeaderboardServer::new(Arc::new(MemoryLeaderboard::new())).into_service())
        .add_service(GrpcRacingServer::new(node).into_service());
    let _replica = serve(router, replica_listener).await;

    for kind in ServiceKind::ALL {
        announce(&orch.address, kind, &config).await;
    }
    let o = &orch.orchestrator;
    for name in ["alice", "bob"] {
        assert!(o.register_player(&details(name)).await.unwrap());
        o.buy(name, 1).await.unwrap();
    }
    o.start_race("alice", 1).await.unwrap();
    let ticket = o.start_race("bob", 1).await.unwrap();
    assert!(ticket.filled_track());

    assert_eq!(points_settle(o, "alice", 1, Duration::from_secs(15)).await, 1);
    assert_eq!(o.player("bob").await.unwrap().points, 25);
    let race_credits: Vec<(String, i64)> = garage
        .credits()
        .into_iter()
        .filter(|(_, amount)| *amount != config.rewards.starting_money)
        .collect();
    assert_eq!(
        race_credits,
        [("bob".to_string(), 1000), ("alice".to_string(), 100)]
    );
    assert_eq!(o.money("alice").await.unwrap(), 1700);
}

#[tokio::test]
async fn stopped_replica_is_evicted() {
    let (orch_listener, _) = bind().await;
    let (replica_listener, replica_addr) = bind().await;
    let config = config(replica_addr.port());
    let orch = start_orchestrator(&config, orch_listener).await;

    let garage = Arc::new(MemoryGarage::new());
    let router = Server::builder()
        .add_service(GrpcLivenessServer::new(garage.clone()).into_service())
        .add_service(GrpcGarageServer::new(garage).into_service());
    let replica = serve(router, replica_listener).await;

    announce(&orch.address, ServiceKind::Garage, &config).await;
    let registry = orch.orchestrator.registry();
    assert!(registry.select(ServiceKind::Garage).await.is_some());

    replica.send(()).unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(registry.select(ServiceKind::Garage).await.is_none());
    assert!(registry.is_empty(ServiceKind::Garage));
    assert!(matches!(
        orch.orchestrator.money("alice").await,
        Err(GridError::ServiceUnavailable {
            kind: ServiceKind::Garage
        })
    ));
}

#[tokio::test]
async fn unknown_kind_is_rejected() {
    let (orch_listener, _) = bind().await;
    let config = config(1);
    let orch = start_orchestrator(&config, orch_listener).await;

    let mut client = RegistryClient::connect(orch.address.endpoint()).await.unwrap();
    let status = client
        .register(proto::RegisterRequest {
            kind: "pitlane".into(),
        })
        .await
        .unwrap_err();
    assert_eq!(status.code(), tonic::Code::InvalidArgument);
    for kind in ServiceKind::ALL {
        assert!(orch.orchestrator.registry().is_empty(kind));
    }
}

#[tokio::test]
async fn unreachable_replica_is_not_registered() {
    let (orch_listener, _) = bind().await;
    // Nothing listens on the advertised service port.
    let (unused, unused_addr) = bind().await;
    drop(unused);
    let config = GridConfig {
        connect_timeout: Duration::from_millis(500),
        ..config(unused_addr.port())
    };
    let orch = start_orchestrator(&config, orch_listener).await;

    let mut client = RegistryClient::connect(orch.address.endpoint()).await.unwrap();
    let status = client
        .register(proto::RegisterRequest {
            kind: ServiceKind::Leaderboard.to_string(),
        })
        .await
        .unwrap_err();
    assert_eq!(status.code(), tonic::Code::Unavailable);
    assert!(orch.orchestrator.registry().is_empty(ServiceKind::Leaderboard));
}
