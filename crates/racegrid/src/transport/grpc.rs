//! gRPC clients for talking to replicas and to the orchestrator.
//!
//! Provides one client per service kind (each implementing that kind's
//! service trait plus [`Liveness`]), `GrpcConnector` (implements
//! [`ReplicaConnector`] for the registration listener), `GrpcRaceNotifier`
//! (streams finished races to the orchestrator) and [`announce`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tonic::transport::{Channel, Endpoint};
use tonic::{Request, Response, Status, Streaming};
use tracing::{info, instrument, warn};

use super::convert::race_motorcycle;
use super::proto;
use super::proto::auth_client::AuthClient;
use super::proto::garage_client::GarageClient;
use super::proto::leaderboard_client::LeaderboardClient;
use super::proto::liveness_client::LivenessClient;
use super::proto::racing_client::RacingClient;
use super::proto::registry_client::RegistryClient;
use crate::config::GridConfig;
use crate::error::GridError;
use crate::listener::ReplicaConnector;
use crate::service::{
    AuthService, GarageService, LeaderboardService, Liveness, RacingService, ServiceHandle,
};
use crate::services::RaceNotifier;
use crate::types::{
    LeaderboardPosition, MatchmakingTicket, Motorcycle, MotorcycleStats, Ownership,
    PlayerDetails, RaceResult, ReplicaAddress, ServiceKind,
};

fn rpc_error(operation: &'static str) -> impl Fn(Status) -> GridError {
    move |source| GridError::Rpc { operation, source }
}

/// Run a unary call under `timeout`.
async fn unary<T>(
    operation: &'static str,
    timeout: Duration,
    call: impl Future<Output = Result<Response<T>, Status>>,
) -> Result<T, GridError> {
    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(response)) => Ok(response.into_inner()),
        Ok(Err(status)) => Err(GridError::Rpc {
            operation,
            source: status,
        }),
        Err(_) => Err(GridError::Timeout { operation }),
    }
}

/// Run a server-streaming call under `timeout`, draining the whole stream.
async fn collect<T, U>(
    operation: &'static str,
    timeout: Duration,
    call: impl Future<Output = Result<Response<Streaming<T>>, Status>>,
    convert: impl Fn(T) -> Result<U, GridError>,
) -> Result<Vec<U>, GridError> {
    let drain = async {
        let mut stream = call.await.map_err(rpc_error(operation))?.into_inner();
        let mut items = Vec::new();
        while let Some(item) = stream.message().await.map_err(rpc_error(operation))? {
            items.push(convert(item)?);
        }
        Ok(items)
    };
    tokio::time::timeout(timeout, drain)
        .await
        .map_err(|_| GridError::Timeout { operation })?
}

/// Connection to one replica shared by its kind-specific client.
#[derive(Clone)]
struct Link {
    address: ReplicaAddress,
    channel: Channel,
    call_timeout: Duration,
}

impl Link {
    async fn still_alive(&self) -> Result<(), GridError> {
        let mut client = LivenessClient::new(self.channel.clone());
        unary(
            "liveness.still_alive",
            self.call_timeout,
            client.still_alive(Request::new(proto::Empty {})),
        )
        .await
        .map(|_| ())
        .map_err(|e| GridError::ReplicaUnavailable {
            address: self.address.clone(),
            source: Some(Box::new(e)),
        })
    }
}

// ---------------------------------------------------------------------------
// Clients
// ---------------------------------------------------------------------------

/// gRPC client for an auth replica.
pub struct GrpcAuth {
    link: Link,
    client: AuthClient<Channel>,
}

#[async_trait]
impl Liveness for GrpcAuth {
    async fn still_alive(&self) -> Result<(), GridError> {
        self.link.still_alive().await
    }
}

#[async_trait]
impl AuthService for GrpcAuth {
    #[instrument(skip(self, password), fields(replica = %self.link.address))]
    async fn login(&self, username: &str, password: &str) -> Result<bool, GridError> {
        let mut client = self.client.clone();
        let reply = unary(
            "auth.login",
            self.link.call_timeout,
            client.login(proto::PlayerCredentials {
                username: username.to_string(),
                password: password.to_string(),
            }),
        )
        .await?;
        Ok(reply.result)
    }

    #[instrument(skip_all, fields(replica = %self.link.address, username = %details.username))]
    async fn register(&self, details: &PlayerDetails) -> Result<bool, GridError> {
        let mut client = self.client.clone();
        let reply = unary(
            "auth.register",
            self.link.call_timeout,
            client.register(proto::PlayerDetails::from(details.clone())),
        )
        .await?;
        Ok(reply.result)
    }
}

/// gRPC client for a garage replica.
pub struct GrpcGarage {
    link: Link,
    client: GarageClient<Channel>,
}

impl GrpcGarage {
    fn player(username: &str) -> proto::PlayerUsername {
        proto::PlayerUsername {
            username: username.to_string(),
        }
    }

    fn player_motorcycle(username: &str, motorcycle_id: i32) -> proto::PlayerMotorcycle {
        proto::PlayerMotorcycle {
            username: username.to_string(),
            motorcycle_id,
        }
    }
}

#[async_trait]
impl Liveness for GrpcGarage {
    async fn still_alive(&self) -> Result<(), GridError> {
        self.link.still_alive().await
    }
}

#[async_trait]
impl GarageService for GrpcGarage {
    async fn get_user_money(&self, username: &str) -> Result<i64, GridError> {
        let mut client = self.client.clone();
        let reply = unary(
            "garage.get_user_money",
            self.link.call_timeout,
            client.get_user_money(Self::player(username)),
        )
        .await?;
        Ok(reply.money)
    }

    #[instrument(skip(self), fields(replica = %self.link.address))]
    async fn increase_user_money(&self, username: &str, amount: i64) -> Result<(), GridError> {
        let mut client = self.client.clone();
        unary(
            "garage.increase_user_money",
            self.link.call_timeout,
            client.increase_user_money(proto::MoneyIncrease {
                username: username.to_string(),
                money: amount,
            }),
        )
        .await?;
        Ok(())
    }

    async fn get_remaining_motorcycles(&self, username: &str) -> Result<Vec<Motorcycle>, GridError> {
        let mut client = self.client.clone();
        collect(
            "garage.get_remaining_motorcycles",
            self.link.call_timeout,
            client.get_remaining_motorcycles(Self::player(username)),
            |m| Ok(Motorcycle::from(m)),
        )
        .await
    }

    async fn get_user_motorcycles(&self, username: &str) -> Result<Vec<Ownership>, GridError> {
        let mut client = self.client.clone();
        collect(
            "garage.get_user_motorcycles",
            self.link.call_timeout,
            client.get_user_motorcycles(Self::player(username)),
            Ownership::try_from,
        )
        .await
    }

    async fn get_user_motorcycle_stats(
        &self,
        username: &str,
        motorcycle_id: i32,
    ) -> Result<Ownership, GridError> {
        let mut client = self.client.clone();
        let reply = unary(
            "garage.get_user_motorcycle_stats",
            self.link.call_timeout,
            client.get_user_motorcycle_stats(Self::player_motorcycle(username, motorcycle_id)),
        )
        .await?;
        Ownership::try_from(reply)
    }

    #[instrument(skip(self), fields(replica = %self.link.address))]
    async fn buy_motorcycle(&self, username: &str, motorcycle_id: i32) -> Result<(), GridError> {
        let mut client = self.client.clone();
        unary(
            "garage.buy_motorcycle",
            self.link.call_timeout,
            client.buy_motorcycle(Self::player_motorcycle(username, motorcycle_id)),
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(replica = %self.link.address))]
    async fn upgrade_motorcycle(
        &self,
        username: &str,
        motorcycle_id: i32,
    ) -> Result<(), GridError> {
        let mut client = self.client.clone();
        unary(
            "garage.upgrade_motorcycle",
            self.link.call_timeout,
            client.upgrade_motorcycle(Self::player_motorcycle(username, motorcycle_id)),
        )
        .await?;
        Ok(())
    }
}

/// gRPC client for a leaderboard replica.
pub struct GrpcLeaderboard {
    link: Link,
    client: LeaderboardClient<Channel>,
}

#[async_trait]
impl Liveness for GrpcLeaderboard {
    async fn still_alive(&self) -> Result<(), GridError> {
        self.link.still_alive().await
    }
}

#[async_trait]
impl LeaderboardService for GrpcLeaderboard {
    #[instrument(skip(self), fields(replica = %self.link.address))]
    async fn add_points(&self, username: &str, points: i64) -> Result<(), GridError> {
        let mut client = self.client.clone();
        unary(
            "leaderboard.add_points",
            self.link.call_timeout,
            client.add_points(proto::PointIncrement {
                username: username.to_string(),
                points,
            }),
        )
        .await?;
        Ok(())
    }

    async fn get_player(&self, username: &str) -> Result<LeaderboardPosition, GridError> {
        let mut client = self.client.clone();
        let reply = unary(
            "leaderboard.get_player",
            self.link.call_timeout,
            client.get_player(proto::PlayerUsername {
                username: username.to_string(),
            }),
        )
        .await?;
        Ok(reply.into())
    }

    async fn get_full_leaderboard(&self) -> Result<Vec<LeaderboardPosition>, GridError> {
        let mut client = self.client.clone();
        collect(
            "leaderboard.get_full_leaderboard",
            self.link.call_timeout,
            client.get_full_leaderboard(proto::Empty {}),
            |p| Ok(LeaderboardPosition::from(p)),
        )
        .await
    }
}

/// gRPC client for a racing replica.
///
/// Matchmaking calls may complete a race on the replica, so they get the
/// longer matchmaking timeout.
pub struct GrpcRacing {
    link: Link,
    client: RacingClient<Channel>,
    matchmaking_timeout: Duration,
}

#[async_trait]
impl Liveness for GrpcRacing {
    async fn still_alive(&self) -> Result<(), GridError> {
        self.link.still_alive().await
    }
}

#[async_trait]
impl RacingService for GrpcRacing {
    #[instrument(skip(self, motorcycle), fields(replica = %self.link.address, motorcycle_id = motorcycle.id))]
    async fn start_matchmaking(
        &self,
        username: &str,
        motorcycle: MotorcycleStats,
    ) -> Result<MatchmakingTicket, GridError> {
        let mut client = self.client.clone();
        let reply = unary(
            "racing.start_matchmaking",
            self.matchmaking_timeout,
            client.start_matchmaking(race_motorcycle(username, motorcycle)),
        )
        .await?;
        Ok(reply.into())
    }

    async fn check_is_racing(
        &self,
        username: &str,
        motorcycle_id: i32,
    ) -> Result<Option<String>, GridError> {
        let mut client = self.client.clone();
        let reply = unary(
            "racing.check_is_racing",
            self.link.call_timeout,
            client.check_is_racing(proto::PlayerMotorcycle {
                username: username.to_string(),
                motorcycle_id,
            }),
        )
        .await?;
        Ok(reply.is_racing.then_some(reply.track_name))
    }

    async fn get_history(&self, username: &str) -> Result<Vec<RaceResult>, GridError> {
        let mut client = self.client.clone();
        collect(
            "racing.get_history",
            self.link.call_timeout,
            client.get_history(proto::PlayerUsername {
                username: username.to_string(),
            }),
            RaceResult::try_from,
        )
        .await
    }
}

// ---------------------------------------------------------------------------
// Connector
// ---------------------------------------------------------------------------

/// [`ReplicaConnector`] that dials replicas over gRPC.
pub struct GrpcConnector {
    connect_timeout: Duration,
    call_timeout: Duration,
    matchmaking_timeout: Duration,
}

impl GrpcConnector {
    pub fn new(config: &GridConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout,
            call_timeout: config.call_timeout,
            matchmaking_timeout: config.matchmaking_timeout,
        }
    }

    async fn open(&self, address: &ReplicaAddress) -> Result<Channel, GridError> {
        let unavailable = |e: tonic::transport::Error| GridError::ReplicaUnavailable {
            address: address.clone(),
            source: Some(Box::new(e)),
        };
        Endpoint::from_shared(address.endpoint())
            .map_err(unavailable)?
            .connect_timeout(self.connect_timeout)
            .connect()
            .await
            .map_err(unavailable)
    }
}

#[async_trait]
impl ReplicaConnector for GrpcConnector {
    #[instrument(skip(self), fields(replica_address = %address))]
    async fn connect(
        &self,
        kind: ServiceKind,
        address: &ReplicaAddress,
    ) -> Result<ServiceHandle, GridError> {
        let channel = self.open(address).await?;
        let link = Link {
            address: address.clone(),
            channel: channel.clone(),
            call_timeout: self.call_timeout,
        };
        Ok(match kind {
            ServiceKind::Auth => ServiceHandle::Auth(Arc::new(GrpcAuth {
                link,
                client: AuthClient::new(channel),
            })),
            ServiceKind::Garage => ServiceHandle::Garage(Arc::new(GrpcGarage {
                link,
                client: GarageClient::new(channel),
            })),
            ServiceKind::Leaderboard => ServiceHandle::Leaderboard(Arc::new(GrpcLeaderboard {
                link,
                client: LeaderboardClient::new(channel),
            })),
            ServiceKind::Racing => ServiceHandle::Racing(Arc::new(GrpcRacing {
                link,
                client: RacingClient::new(channel),
                matchmaking_timeout: self.matchmaking_timeout,
            })),
        })
    }
}

// ---------------------------------------------------------------------------
// Orchestrator-bound calls
// ---------------------------------------------------------------------------

/// [`RaceNotifier`] that streams results to the orchestrator's
/// `NotifyEndRace`.
///
/// The orchestrator answers only after settling every result, so the call is
/// bounded by [`GridConfig::settlement_deadline`] rather than `call_timeout`.
pub struct GrpcRaceNotifier {
    client: RegistryClient<Channel>,
    config: GridConfig,
}

impl GrpcRaceNotifier {
    /// The connection is opened on first use.
    pub fn new(orchestrator: &ReplicaAddress, config: &GridConfig) -> Result<Self, GridError> {
        let channel = Endpoint::from_shared(orchestrator.endpoint())
            .map_err(|e| GridError::InvalidConfig {
                reason: format!("invalid orchestrator address {orchestrator}: {e}"),
            })?
            .connect_timeout(config.connect_timeout)
            .connect_lazy();
        Ok(Self {
            client: RegistryClient::new(channel),
            config: config.clone(),
        })
    }
}

#[async_trait]
impl RaceNotifier for GrpcRaceNotifier {
    #[instrument(skip_all, fields(participants = results.len()))]
    async fn notify_end_race(&self, results: Vec<RaceResult>) -> Result<u32, GridError> {
        let mut client = self.client.clone();
        let deadline = self.config.settlement_deadline(results.len());
        let stream = tokio_stream::iter(results.into_iter().map(proto::RaceResult::from));
        let reply = unary(
            "registry.notify_end_race",
            deadline,
            client.notify_end_race(stream),
        )
        .await?;
        Ok(reply.settled)
    }
}

/// Register this process as a `kind` replica with the orchestrator, retrying
/// every `announce_interval` until the orchestrator accepts.
pub async fn announce(orchestrator: &ReplicaAddress, kind: ServiceKind, config: &GridConfig) {
    let mut attempt: u64 = 0;
    loop {
        attempt += 1;
        match try_announce(orchestrator, kind, config).await {
            Ok(()) => {
                info!(%orchestrator, %kind, attempt, "registered with orchestrator");
                return;
            }
            Err(e) => {
                warn!(%orchestrator, %kind, attempt, error = %e, "registration failed, retrying");
                tokio::time::sleep(config.announce_interval).await;
            }
        }
    }
}

async fn try_announce(
    orchestrator: &ReplicaAddress,
    kind: ServiceKind,
    config: &GridConfig,
) -> Result<(), GridError> {
    let unavailable = |e: tonic::transport::Error| GridError::ReplicaUnavailable {
        address: orchestrator.clone(),
        source: Some(Box::new(e)),
    };
    let channel = Endpoint::from_shared(orchestrator.endpoint())
        .map_err(unavailable)?
        .connect_timeout(config.connect_timeout)
        .connect()
        .await
        .map_err(unavailable)?;
    let mut client = RegistryClient::new(channel);
    unary(
        "registry.register",
        config.call_timeout,
        client.register(proto::RegisterRequest {
            kind: kind.to_string(),
        }),
    )
    .await?;
    Ok(())
}
