use serde::{Deserialize, Serialize};

/// Sign-up details accepted by the auth service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerDetails {
    pub username: String,
    pub password: String,
    pub email: String,
    pub phone: String,
}
