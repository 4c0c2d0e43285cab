use serde::{Deserialize, Serialize};

/// The authenticated principal attached to a dispatched request's context
/// after the authentication stage succeeds.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub username: String,
    pub issued_at: i64,
    pub expires_at: i64,
}

impl AuthenticatedUser {
    pub fn username(&self) -> &str {
        &self.username
    }
}
