//! HMAC-shared-secret JWT issuance and validation.
//!
//! The dispatcher's authentication stage extracts the bearer token
//! (Authorization header first, `jwt` body field second — see
//! `keystone-dispatch`) and hands it to [`JwtValidator::validate`].

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::config::SecurityConfig;
use crate::error::SecurityError;
use crate::identity::AuthenticatedUser;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Claims {
    sub: String,
    iss: String,
    iat: i64,
    nbf: i64,
    exp: i64,
}

/// Issues signed tokens for the `authenticate` action.
pub struct JwtIssuer {
    encoding_key: EncodingKey,
    config: SecurityConfig,
}

impl JwtIssuer {
    pub fn new(config: SecurityConfig) -> Self {
        let encoding_key = EncodingKey::from_secret(config.jwt_secret.as_bytes());
        Self { encoding_key, config }
    }

    pub fn issue(&self, username: &str) -> Result<String, SecurityError> {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            sub: username.to_string(),
            iss: self.config.jwt_issuer.clone(),
            iat: now,
            nbf: now,
            exp: now + self.config.jwt_expiry_s,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| SecurityError::InvalidToken(e.to_string()))
    }
}

/// Validates tokens issued by [`JwtIssuer`] and builds an [`AuthenticatedUser`].
pub struct JwtValidator {
    decoding_key: DecodingKey,
    config: SecurityConfig,
}

impl JwtValidator {
    pub fn new(config: SecurityConfig) -> Self {
        let decoding_key = DecodingKey::from_secret(config.jwt_secret.as_bytes());
        Self { decoding_key, config }
    }

    pub fn validate(&self, token: &str) -> Result<AuthenticatedUser, SecurityError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.config.jwt_issuer]);
        validation.validate_exp = true;
        validation.validate_nbf = true;

        let data = decode::<Claims>(token, &self.decoding_key, &validation).map_err(|e| {
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => SecurityError::TokenExpired,
                jsonwebtoken::errors::ErrorKind::InvalidIssuer => {
                    SecurityError::ValidationFailed("invalid issuer".into())
                }
                _ => SecurityError::InvalidToken(e.to_string()),
            }
        })?;

        Ok(AuthenticatedUser {
            username: data.claims.sub,
            issued_at: data.claims.iat,
            expires_at: data.claims.exp,
        })
    }
}

/// Extract a bearer token from an `Authorization` header value.
pub fn extract_bearer(header_value: &str) -> Result<&str, SecurityError> {
    let mut parts = header_value.splitn(2, ' ');
    match (parts.next(), parts.next()) {
        (Some(scheme), Some(token)) if scheme.eq_ignore_ascii_case("Bearer") => Ok(token),
        _ => Err(SecurityError::InvalidAuthScheme),
    }
}
