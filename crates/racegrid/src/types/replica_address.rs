use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;

/// Network address of one service replica (host:port).
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct ReplicaAddress {
    pub host: String,
    pub port: u16,
}

impl ReplicaAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Address of a replica reachable on `port` at the host that originated a
    /// connection from `peer`. The peer's own (ephemeral) port is discarded.
    pub fn from_peer(peer: SocketAddr, port: u16) -> Self {
        Self::new(peer.ip().to_string(), port)
    }

    /// Endpoint URI understood by the gRPC transport.
    pub fn endpoint(&self) -> String {
        if self.host.contains(':') {
            format!("http://[{}]:{}", self.host, self.port)
        } else {
            format!("http://{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for ReplicaAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl std::str::FromStr for ReplicaAddress {
    type Err = String;

    /// Parse a `host:port` string.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| format!("expected host:port, got {s:?}"))?;
        let port: u16 = port
            .parse()
            .map_err(|e| format!("invalid port in {s:?}: {e}"))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(format!("missing host in {s:?}"));
        }
        Ok(Self::new(host, port))
    }
}
