//! Inbound registration of replicas.
//!
//! The caller's address always comes from the transport peer, combined with
//! the shared service port. A replica can therefore only register itself.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, instrument, warn};

use crate::error::GridError;
use crate::registry::{ReplicaId, ServiceRegistry};
use crate::service::ServiceHandle;
use crate::types::{ReplicaAddress, ServiceKind};

/// Opens an outbound connection to a replica.
#[async_trait]
pub trait ReplicaConnector: Send + Sync {
    async fn connect(
        &self,
        kind: ServiceKind,
        address: &ReplicaAddress,
    ) -> Result<ServiceHandle, GridError>;
}

/// Turns accepted registrations into pooled handles.
pub struct RegistrationListener {
    registry: Arc<ServiceRegistry>,
    connector: Arc<dyn ReplicaConnector>,
    service_port: u16,
}

impl RegistrationListener {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        connector: Arc<dyn ReplicaConnector>,
        service_port: u16,
    ) -> Self {
        Self {
            registry,
            connector,
            service_port,
        }
    }

    /// Register the replica that sent the call from `peer`.
    ///
    /// Nothing is registered unless the connection back to the replica
    /// could be opened.
    #[instrument(skip(self), fields(kind = %kind))]
    pub async fn on_register(
        &self,
        kind: ServiceKind,
        peer: Option<SocketAddr>,
    ) -> Result<ReplicaId, GridError> {
        let peer = peer.ok_or_else(|| GridError::Registration {
            reason: "caller address is unavailable".to_string(),
        })?;
        let address = ReplicaAddress::from_peer(peer, self.service_port);

        let handle = match self.connector.connect(kind, &address).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!(%address, error = %e, "could not connect back to replica");
                return Err(e);
            }
        };
        if handle.kind() != kind {
            return Err(GridError::Registration {
                reason: format!("connector returned a {} handle for {kind}", handle.kind()),
            });
        }

        let id = self.registry.register(handle);
        info!(%address, replica = %id, "replica registered");
        Ok(id)
    }
}
