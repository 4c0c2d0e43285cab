use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use keystone_security::{JwtIssuer, SecurityConfig};
use serde::Serialize;

/// Issues valid bearer tokens for a fixed test secret/issuer, for tests that
/// just need an authenticated principal and don't care about the token's
/// internals.
pub struct TestJwt {
    issuer: JwtIssuer,
}

impl TestJwt {
    pub fn new() -> Self {
        Self {
            issuer: JwtIssuer::new(SecurityConfig::new("test-jwt-secret", "keystone-test")),
        }
    }

    /// A signed, valid token for `username`.
    pub fn token_for(&self, username: &str) -> String {
        self.issuer.issue(username).expect("issue test token")
    }
}

impl Default for TestJwt {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
struct RawClaims {
    sub: String,
    iss: String,
    iat: i64,
    nbf: i64,
    exp: i64,
}

/// Builds deliberately non-standard tokens (wrong issuer, expired, wrong
/// secret) for exercising the dispatcher's authentication-stage rejection
/// paths, bypassing [`JwtIssuer`] entirely.
pub struct TokenBuilder {
    secret: String,
    sub: String,
    iss: String,
    iat: i64,
    exp: i64,
}

impl TokenBuilder {
    pub fn new(username: &str) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            secret: "test-jwt-secret".to_string(),
            sub: username.to_string(),
            iss: "keystone-test".to_string(),
            iat: now,
            exp: now + 3600,
        }
    }

    pub fn secret(mut self, secret: &str) -> Self {
        self.secret = secret.to_string();
        self
    }

    pub fn issuer(mut self, iss: &str) -> Self {
        self.iss = iss.to_string();
        self
    }

    /// Set both `iat` and `exp` so the token is already past expiry.
    pub fn expired(mut self) -> Self {
        self.iat = chrono::Utc::now().timestamp() - 7200;
        self.exp = chrono::Utc::now().timestamp() - 3600;
        self
    }

    pub fn expires_in(mut self, secs: i64) -> Self {
        self.exp = self.iat + secs;
        self
    }

    pub fn build(self) -> String {
        let claims = RawClaims {
            sub: self.sub,
            iss: self.iss,
            iat: self.iat,
            nbf: self.iat,
            exp: self.exp,
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .expect("encode test token")
    }
}
