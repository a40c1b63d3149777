//! racegrid - orchestrator and service replicas for the racing game.
//!
//! Every process serves gRPC on the shared service port. Replicas announce
//! themselves to the orchestrator, which dials them back on that same port.
//!
//! ```bash
//! SERVICE_PORT=50051 racegrid orchestrator --web-port 8080
//! ORCHESTRATOR_ADDRESS=10.0.0.2:50051 racegrid garage
//! ORCHESTRATOR_ADDRESS=10.0.0.2:50051 racegrid racing
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use racegrid::config::{GridConfig, RewardTable};
use racegrid::matchmaking::{RaceEngine, RaceStore};
use racegrid::metrics::GridMetrics;
use racegrid::orchestrator::Orchestrator;
use racegrid::service::Liveness;
use racegrid::services::{MemoryAuth, MemoryGarage, MemoryLeaderboard, RacingNode};
use racegrid::storage::memory_race::MemoryRaceStore;
use racegrid::transport::grpc::{announce, GrpcConnector, GrpcRaceNotifier};
use racegrid::transport::server::{
    GrpcAuthServer, GrpcGarageServer, GrpcLeaderboardServer, GrpcLivenessServer,
    GrpcRacingServer, GrpcRegistryServer,
};
use racegrid::types::{ReplicaAddress, ServiceKind};
use tonic::transport::server::Router;
use tonic::transport::Server;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "racegrid")]
#[command(about = "Orchestrator and service replicas for the racegrid game")]
struct Cli {
    #[command(flatten)]
    grid: GridArgs,

    #[command(subcommand)]
    command: Command,
}

/// Settings shared by every process.
#[derive(Args, Debug)]
struct GridArgs {
    /// gRPC port served by every process and dialed by the orchestrator.
    #[arg(long, env = "SERVICE_PORT", default_value_t = 50051)]
    service_port: u16,

    /// Money for the race winner.
    #[arg(long, env = "MONEY_WIN", default_value_t = 1000)]
    money_win: i64,

    /// Money for the last finisher.
    #[arg(long, env = "MONEY_LAST", default_value_t = 100)]
    money_last: i64,

    /// Leaderboard points for the race winner.
    #[arg(long, env = "POINTS_WIN", default_value_t = 25)]
    points_win: i64,

    /// Leaderboard points for the last finisher.
    #[arg(long, env = "POINTS_LAST", default_value_t = 1)]
    points_last: i64,

    /// Balance granted on sign-up.
    #[arg(long, env = "START_MONEY", default_value_t = 2000)]
    start_money: i64,

    /// Liveness probe timeout in milliseconds.
    #[arg(long, env = "PROBE_TIMEOUT_MS", default_value_t = 1000)]
    probe_timeout_ms: u64,

    /// Per-call timeout in milliseconds.
    #[arg(long, env = "CALL_TIMEOUT_MS", default_value_t = 1000)]
    call_timeout_ms: u64,

    /// Settlement budget per race participant in milliseconds.
    #[arg(long, env = "SETTLE_TIMEOUT_MS", default_value_t = 4000)]
    settle_timeout_ms: u64,
}

impl GridArgs {
    fn config(&self) -> Result<GridConfig> {
        let config = GridConfig {
            service_port: self.service_port,
            probe_timeout: Duration::from_millis(self.probe_timeout_ms),
            call_timeout: Duration::from_millis(self.call_timeout_ms),
            settle_timeout: Duration::from_millis(self.settle_timeout_ms),
            rewards: RewardTable {
                money_for_first: self.money_win,
                money_for_last: self.money_last,
                points_for_first: self.points_win,
                points_for_last: self.points_last,
                starting_money: self.start_money,
            },
            ..Default::default()
        };
        config.validate()?;
        Ok(config)
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the orchestrator: registry, settlement and the HTTP API.
    Orchestrator(WebArgs),
    /// Run a racing replica.
    Racing(RacingArgs),
    /// Run a garage replica.
    Garage(ReplicaArgs),
    /// Run a leaderboard replica.
    Leaderboard(ReplicaArgs),
    /// Run an auth replica.
    Auth(ReplicaArgs),
    /// Run the orchestrator and one replica of every kind in one process.
    AllInOne(WebArgs),
}

#[derive(Args, Debug)]
struct WebArgs {
    /// HTTP API port.
    #[arg(long, env = "WEB_PORT", default_value_t = 8080)]
    web_port: u16,
}

#[derive(Args, Debug)]
struct ReplicaArgs {
    /// Orchestrator address, host:port.
    #[arg(long, env = "ORCHESTRATOR_ADDRESS")]
    orchestrator: String,
}

#[derive(Args, Debug)]
struct RacingArgs {
    #[command(flatten)]
    replica: ReplicaArgs,

    /// PostgreSQL connection string. Without it races are kept in memory.
    #[cfg(feature = "sql")]
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,
}

fn parse_orchestrator(s: &str) -> Result<ReplicaAddress> {
    s.parse::<ReplicaAddress>()
        .map_err(|e| anyhow::anyhow!("invalid orchestrator address: {e}"))
}

fn grpc_addr(config: &GridConfig) -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], config.service_port))
}

/// Serve `router` on the service port until the process exits.
fn spawn_grpc(router: Router, addr: SocketAddr) -> tokio::task::JoinHandle<Result<()>> {
    tracing::info!(%addr, "starting gRPC server");
    tokio::spawn(async move {
        router
            .serve(addr)
            .await
            .context("gRPC server failed")
    })
}

async fn race_store(config: &GridConfig, args: &RacingArgs) -> Result<Arc<dyn RaceStore>> {
    #[cfg(feature = "sql")]
    {
        if let Some(url) = &args.database_url {
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(10)
                .connect(url)
                .await
                .context("failed to connect to PostgreSQL")?;
            let store = racegrid::storage::sql_race::SqlRaceStore::new(pool);
            store.migrate().await?;
            store.provision_tracks(&config.tracks).await?;
            tracing::info!("using PostgreSQL race store");
            return Ok(Arc::new(store));
        }
    }
    #[cfg(not(feature = "sql"))]
    let _ = args;
    Ok(Arc::new(MemoryRaceStore::new(config.tracks.clone())))
}

fn racing_node(
    config: &GridConfig,
    store: Arc<dyn RaceStore>,
    orchestrator: &ReplicaAddress,
    metrics: Arc<GridMetrics>,
) -> Result<Arc<RacingNode>> {
    let engine = RaceEngine::new(store, config.matchmaking_timeout, metrics);
    let notifier = Arc::new(GrpcRaceNotifier::new(orchestrator, config)?);
    Ok(Arc::new(RacingNode::new(engine, notifier)))
}

async fn run_replica(
    config: GridConfig,
    kind: ServiceKind,
    orchestrator: ReplicaAddress,
    router: Router,
) -> Result<()> {
    let server = spawn_grpc(router, grpc_addr(&config));
    announce(&orchestrator, kind, &config).await;
    server.await?
}

async fn serve_web(orchestrator: Arc<Orchestrator>, registry: prometheus::Registry, port: u16) -> Result<()> {
    let app = api::create_router(Arc::new(api::AppState {
        orchestrator,
        metrics_registry: registry,
    }));
    let listener = tokio::net::TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], port))).await?;
    tracing::info!(port, "starting HTTP API");
    axum::serve(listener, app).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("racegrid=info".parse()?))
        .init();

    let cli = Cli::parse();
    let config = cli.grid.config()?;
    let prometheus_registry = prometheus::Registry::new();
    let metrics = Arc::new(GridMetrics::new(&prometheus_registry)?);

    match cli.command {
        Command::Orchestrator(web) => {
            let orchestrator = Arc::new(Orchestrator::new(
                &config,
                Arc::new(GrpcConnector::new(&config)),
                metrics,
            )?);
            let router = Server::builder().add_service(
                GrpcRegistryServer::new(
                    orchestrator.listener().clone(),
                    orchestrator.settlement().clone(),
                )
                .into_service(),
            );
            let server = spawn_grpc(router, grpc_addr(&config));
            tokio::select! {
                res = server => res??,
                res = serve_web(orchestrator, prometheus_registry, web.web_port) => res?,
            }
        }
        Command::Racing(args) => {
            let orchestrator = parse_orchestrator(&args.replica.orchestrator)?;
            let store = race_store(&config, &args).await?;
            let node = racing_node(&config, store, &orchestrator, metrics)?;
            let router = Server::builder()
                .add_service(GrpcLivenessServer::new(node.clone()).into_service())
                .add_service(GrpcRacingServer::new(node).into_service());
            run_replica(config, ServiceKind::Racing, orchestrator, router).await?;
        }
        Command::Garage(args) => {
            let orchestrator = parse_orchestrator(&args.orchestrator)?;
            let garage = Arc::new(MemoryGarage::new());
            let router = Server::builder()
                .add_service(GrpcLivenessServer::new(garage.clone()).into_service())
                .add_service(GrpcGarageServer::new(garage).into_service());
            run_replica(config, ServiceKind::Garage, orchestrator, router).await?;
        }
        Command::Leaderboard(args) => {
            let orchestrator = parse_orchestrator(&args.orchestrator)?;
            let leaderboard = Arc::new(MemoryLeaderboard::new());
            let router = Server::builder()
                .add_service(GrpcLivenessServer::new(leaderboard.clone()).into_service())
                .add_service(GrpcLeaderboardServer::new(leaderboard).into_service());
            run_replica(config, ServiceKind::Leaderboard, orchestrator, router).await?;
        }
        Command::Auth(args) => {
            let orchestrator = parse_orchestrator(&args.orchestrator)?;
            let auth = Arc::new(MemoryAuth::new());
            let router = Server::builder()
                .add_service(GrpcLivenessServer::new(auth.clone()).into_service())
                .add_service(GrpcAuthServer::new(auth).into_service());
            run_replica(config, ServiceKind::Auth, orchestrator, router).await?;
        }
        Command::AllInOne(web) => {
            let orchestrator = Arc::new(Orchestrator::new(
                &config,
                Arc::new(GrpcConnector::new(&config)),
                metrics.clone(),
            )?);
            let loopback = ReplicaAddress::new("127.0.0.1", config.service_port);
            let node = racing_node(
                &config,
                Arc::new(MemoryRaceStore::new(config.tracks.clone())),
                &loopback,
                metrics,
            )?;
            let probe: Arc<dyn Liveness> = node.clone();
            let router = Server::builder()
                .add_service(
                    GrpcRegistryServer::new(
                        orchestrator.listener().clone(),
                        orchestrator.settlement().clone(),
                    )
                    .into_service(),
                )
                .add_service(GrpcLivenessServer::new(probe).into_service())
                .add_service(GrpcAuthServer::new(Arc::new(MemoryAuth::new())).into_service())
                .add_service(GrpcGarageServer::new(Arc::new(MemoryGarage::new())).into_service())
                .add_service(
                    GrpcLeaderboardServer::new(Arc::new(MemoryLeaderboard::new())).into_service(),
                )
                .add_service(GrpcRacingServer::new(node).into_service());
            let server = spawn_grpc(router, grpc_addr(&config));
            for kind in ServiceKind::ALL {
                announce(&loopback, kind, &config).await;
            }
            tokio::select! {
                res = server => res??,
                res = serve_web(orchestrator, prometheus_registry, web.web_port) => res?,
            }
        }
    }

    tracing::info!("racegrid shutdown");
    Ok(())
}
