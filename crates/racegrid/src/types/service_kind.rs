use serde::{Deserialize, Serialize};
use std::fmt;

/// The contract a replica implements.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    Auth,
    Garage,
    Leaderboard,
    Racing,
}

impl ServiceKind {
    pub const ALL: [ServiceKind; 4] = [
        ServiceKind::Auth,
        ServiceKind::Garage,
        ServiceKind::Leaderboard,
        ServiceKind::Racing,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::Garage => "garage",
            Self::Leaderboard => "leaderboard",
            Self::Racing => "racing",
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown service kind label.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown service kind {label:?}")]
pub struct UnknownServiceKind {
    pub label: String,
}

impl std::str::FromStr for ServiceKind {
    type Err = UnknownServiceKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownServiceKind {
                label: s.to_string(),
            })
    }
}
