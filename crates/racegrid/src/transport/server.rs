//! gRPC servers exposing local services and the orchestrator's registry.
//!
//! Each server wraps one service trait object and converts [`GridError`]s to
//! `tonic::Status` at the boundary.

use std::pin::Pin;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use tonic::{Request, Response, Status, Streaming};
use tracing::instrument;

use super::convert::motorcycle_stats;
use super::proto;
use super::proto::auth_server::{Auth, AuthServer};
use super::proto::garage_server::{Garage, GarageServer};
use super::proto::leaderboard_server::{Leaderboard, LeaderboardServer};
use super::proto::liveness_server::LivenessServer;
use super::proto::racing_server::{Racing, RacingServer};
use super::proto::registry_server::{Registry, RegistryServer};
use crate::error::GridError;
use crate::listener::RegistrationListener;
use crate::service::{AuthService, GarageService, LeaderboardService, Liveness, RacingService};
use crate::settlement::SettlementPipeline;
use crate::types::{RaceResult, ServiceKind};

type ResponseStream<T> = Pin<Box<dyn Stream<Item = Result<T, Status>> + Send + 'static>>;

fn stream_of<T, U>(items: Vec<T>) -> ResponseStream<U>
where
    T: Into<U> + Send + 'static,
    U: Send + 'static,
{
    Box::pin(tokio_stream::iter(items.into_iter().map(|i| Ok(i.into()))))
}

// ---------------------------------------------------------------------------
// Liveness
// ---------------------------------------------------------------------------

/// Answers liveness probes on behalf of a local service.
pub struct GrpcLivenessServer {
    probe: Arc<dyn Liveness>,
}

impl GrpcLivenessServer {
    pub fn new(probe: Arc<dyn Liveness>) -> Self {
        Self { probe }
    }

    pub fn into_service(self) -> LivenessServer<Self> {
        LivenessServer::new(self)
    }
}

#[tonic::async_trait]
impl proto::liveness_server::Liveness for GrpcLivenessServer {
    async fn still_alive(
        &self,
        _request: Request<proto::Empty>,
    ) -> Result<Response<proto::Empty>, Status> {
        self.probe.still_alive().await?;
        Ok(Response::new(proto::Empty {}))
    }
}

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

pub struct GrpcAuthServer {
    inner: Arc<dyn AuthService>,
}

impl GrpcAuthServer {
    pub fn new(inner: Arc<dyn AuthService>) -> Self {
        Self { inner }
    }

    pub fn into_service(self) -> AuthServer<Self> {
        AuthServer::new(self)
    }
}

#[tonic::async_trait]
impl Auth for GrpcAuthServer {
    #[instrument(skip_all)]
    async fn login(
        &self,
        request: Request<proto::PlayerCredentials>,
    ) -> Result<Response<proto::BoolResult>, Status> {
        let credentials = request.into_inner();
        let result = self
            .inner
            .login(&credentials.username, &credentials.password)
            .await?;
        Ok(Response::new(proto::BoolResult { result }))
    }

    #[instrument(skip_all)]
    async fn register(
        &self,
        request: Request<proto::PlayerDetails>,
    ) -> Result<Response<proto::BoolResult>, Status> {
        let details = request.into_inner().into();
        let result = self.inner.register(&details).await?;
        Ok(Response::new(proto::BoolResult { result }))
    }
}

// ---------------------------------------------------------------------------
// Garage
// ---------------------------------------------------------------------------

pub struct GrpcGarageServer {
    inner: Arc<dyn GarageService>,
}

impl GrpcGarageServer {
    pub fn new(inner: Arc<dyn GarageService>) -> Self {
        Self { inner }
    }

    pub fn into_service(self) -> GarageServer<Self> {
        GarageServer::new(self)
    }
}

#[tonic::async_trait]
impl Garage for GrpcGarageServer {
    async fn get_user_money(
        &self,
        request: Request<proto::PlayerUsername>,
    ) -> Result<Response<proto::Money>, Status> {
        let money = self
            .inner
            .get_user_money(&request.into_inner().username)
            .await?;
        Ok(Response::new(proto::Money { money }))
    }

    #[instrument(skip_all)]
    async fn increase_user_money(
        &self,
        request: Request<proto::MoneyIncrease>,
    ) -> Result<Response<proto::Empty>, Status> {
        let increase = request.into_inner();
        self.inner
            .increase_user_money(&increase.username, increase.money)
            .await?;
        Ok(Response::new(proto::Empty {}))
    }

    type GetRemainingMotorcyclesStream = ResponseStream<proto::Motorcycle>;

    async fn get_remaining_motorcycles(
        &self,
        request: Request<proto::PlayerUsername>,
    ) -> Result<Response<Self::GetRemainingMotorcyclesStream>, Status> {
        let motorcycles = self
            .inner
            .get_remaining_motorcycles(&request.into_inner().username)
            .await?;
        Ok(Response::new(stream_of(motorcycles)))
    }

    type GetUserMotorcyclesStream = ResponseStream<proto::Ownership>;

    async fn get_user_motorcycles(
        &self,
        request: Request<proto::PlayerUsername>,
    ) -> Result<Response<Self::GetUserMotorcyclesStream>, Status> {
        let owned = self
            .inner
            .get_user_motorcycles(&request.into_inner().username)
            .await?;
        Ok(Response::new(stream_of(owned)))
    }

    async fn get_user_motorcycle_stats(
        &self,
        request: Request<proto::PlayerMotorcycle>,
    ) -> Result<Response<proto::Ownership>, Status> {
        let req = request.into_inner();
        let ownership = self
            .inner
            .get_user_motorcycle_stats(&req.username, req.motorcycle_id)
            .await?;
        Ok(Response::new(ownership.into()))
    }

    #[instrument(skip_all)]
    async fn buy_motorcycle(
        &self,
        request: Request<proto::PlayerMotorcycle>,
    ) -> Result<Response<proto::Empty>, Status> {
        let req = request.into_inner();
        self.inner
            .buy_motorcycle(&req.username, req.motorcycle_id)
            .await?;
        Ok(Response::new(proto::Empty {}))
    }

    #[instrument(skip_all)]
    async fn upgrade_motorcycle(
        &self,
        request: Request<proto::PlayerMotorcycle>,
    ) -> Result<Response<proto::Empty>, Status> {
        let req = request.into_inner();
        self.inner
            .upgrade_motorcycle(&req.username, req.motorcycle_id)
            .await?;
        Ok(Response::new(proto::Empty {}))
    }
}

// ---------------------------------------------------------------------------
// Leaderboard
// ---------------------------------------------------------------------------

pub struct GrpcLeaderboardServer {
    inner: Arc<dyn LeaderboardService>,
}

impl GrpcLeaderboardServer {
    pub fn new(inner: Arc<dyn LeaderboardService>) -> Self {
        Self { inner }
    }

    pub fn into_service(self) -> LeaderboardServer<Self> {
        LeaderboardServer::new(self)
    }
}

#[tonic::async_trait]
impl Leaderboard for GrpcLeaderboardServer {
    #[instrument(skip_all)]
    async fn add_points(
        &self,
        request: Request<proto::PointIncrement>,
    ) -> Result<Response<proto::Empty>, Status> {
        let increment = request.into_inner();
        self.inner
            .add_points(&increment.username, increment.points)
            .await?;
        Ok(Response::new(proto::Empty {}))
    }

    async fn get_player(
        &self,
        request: Request<proto::PlayerUsername>,
    ) -> Result<Response<proto::LeaderboardPosition>, Status> {
        let position = self
            .inner
            .get_player(&request.into_inner().username)
            .await?;
        Ok(Response::new(position.into()))
    }

    type GetFullLeaderboardStream = ResponseStream<proto::LeaderboardPosition>;

    async fn get_full_leaderboard(
        &self,
        _request: Request<proto::Empty>,
    ) -> Result<Response<Self::GetFullLeaderboardStream>, Status> {
        let board = self.inner.get_full_leaderboard().await?;
        Ok(Response::new(stream_of(board)))
    }
}

// ---------------------------------------------------------------------------
// Racing
// ---------------------------------------------------------------------------

pub struct GrpcRacingServer {
    inner: Arc<dyn RacingService>,
}

impl GrpcRacingServer {
    pub fn new(inner: Arc<dyn RacingService>) -> Self {
        Self { inner }
    }

    pub fn into_service(self) -> RacingServer<Self> {
        RacingServer::new(self)
    }
}

#[tonic::async_trait]
impl Racing for GrpcRacingServer {
    #[instrument(skip_all)]
    async fn start_matchmaking(
        &self,
        request: Request<proto::RaceMotorcycle>,
    ) -> Result<Response<proto::MatchmakingTicket>, Status> {
        let (username, motorcycle) = motorcycle_stats(request.into_inner());
        let ticket = self.inner.start_matchmaking(&username, motorcycle).await?;
        Ok(Response::new(ticket.into()))
    }

    async fn check_is_racing(
        &self,
        request: Request<proto::PlayerMotorcycle>,
    ) -> Result<Response<proto::RacingStatus>, Status> {
        let req = request.into_inner();
        let track = self
            .inner
            .check_is_racing(&req.username, req.motorcycle_id)
            .await?;
        Ok(Response::new(proto::RacingStatus {
            is_racing: track.is_some(),
            track_name: track.unwrap_or_default(),
        }))
    }

    type GetHistoryStream = ResponseStream<proto::RaceResult>;

    async fn get_history(
        &self,
        request: Request<proto::PlayerUsername>,
    ) -> Result<Response<Self::GetHistoryStream>, Status> {
        let history = self
            .inner
            .get_history(&request.into_inner().username)
            .await?;
        Ok(Response::new(stream_of(history)))
    }
}

// ---------------------------------------------------------------------------
// Registry (orchestrator side)
// ---------------------------------------------------------------------------

/// The orchestrator's inbound surface: replica registration and race-end
/// notifications.
pub struct GrpcRegistryServer {
    listener: Arc<RegistrationListener>,
    settlement: Arc<SettlementPipeline>,
}

impl GrpcRegistryServer {
    pub fn new(listener: Arc<RegistrationListener>, settlement: Arc<SettlementPipeline>) -> Self {
        Self {
            listener,
            settlement,
        }
    }

    pub fn into_service(self) -> RegistryServer<Self> {
        RegistryServer::new(self)
    }
}

#[tonic::async_trait]
impl Registry for GrpcRegistryServer {
    #[instrument(skip_all, fields(peer))]
    async fn register(
        &self,
        request: Request<proto::RegisterRequest>,
    ) -> Result<Response<proto::Empty>, Status> {
        let peer = request.remote_addr();
        if let Some(peer) = peer {
            tracing::Span::current().record("peer", tracing::field::display(peer));
        }
        let kind: ServiceKind = request
            .into_inner()
            .kind
            .parse()
            .map_err(|e: crate::types::UnknownServiceKind| GridError::invalid(e.to_string()))?;
        self.listener.on_register(kind, peer).await?;
        Ok(Response::new(proto::Empty {}))
    }

    #[instrument(skip_all)]
    async fn notify_end_race(
        &self,
        request: Request<Streaming<proto::RaceResult>>,
    ) -> Result<Response<proto::NotifyEndRaceResponse>, Status> {
        let results = request.into_inner().map(|item| {
            item.map_err(|source| GridError::Rpc {
                operation: "registry.notify_end_race",
                source,
            })
            .and_then(RaceResult::try_from)
        });
        let settled = self.settlement.settle(results).await?;
        Ok(Response::new(proto::NotifyEndRaceResponse { settled }))
    }
}
