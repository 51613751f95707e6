use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod store;

/// Durable client identity plus the cached credentials of the signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Session {
    pub session_id: String,
    pub auth_token: Option<String>,
    pub username: Option<String>,
}

impl Session {
    pub fn is_authenticated(&self) -> bool {
        self.auth_token.is_some()
    }

    pub fn sign_in(&mut self, token: String, username: String) {
        self.auth_token = Some(token);
        self.username = Some(username);
    }

    pub fn sign_out(&mut self) {
        self.auth_token = None;
        self.username = None;
    }
}

/// Persisted under the `greenie_auth` key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthBlob {
    pub token: String,
    pub username: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Assistant,
    Error,
    Thinking,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub id: u64,
    pub role: TurnRole,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}
