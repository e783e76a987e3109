use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::{rngs::OsRng, RngCore};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};

use crate::config::JwtConfig;
use crate::services::ServiceError;

/// Opaque token entropy in bytes (256 bits).
const OPAQUE_TOKEN_BYTES: usize = 32;

/// Signs and verifies HS256 access tokens and mints opaque tokens.
///
/// The signing secret is captured at construction; nothing here reads the
/// environment.
#[derive(Clone)]
pub struct TokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_token_ttl: Duration,
    refresh_token_ttl: Duration,
}

/// Claims carried by an access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    pub user_id: i64,
    pub email: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Not before (Unix timestamp)
    pub nbf: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
}

impl TokenCodec {
    pub fn new(config: &JwtConfig) -> Result<Self, anyhow::Error> {
        let secret = config.secret.expose_secret();
        if secret.is_empty() {
            anyhow::bail!("JWT secret must not be empty");
        }

        tracing::info!("Token codec initialized with HS256 shared secret");

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            access_token_ttl: Duration::minutes(config.access_token_expiry_minutes),
            refresh_token_ttl: Duration::days(config.refresh_token_expiry_days),
        })
    }

    pub fn issue_access_token(&self, user_id: i64, email: &str) -> Result<String, ServiceError> {
        let now = Utc::now();
        let claims = AccessTokenClaims {
            user_id,
            email: email.to_string(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            exp: (now + self.access_token_ttl).timestamp(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Failed to sign access token: {}", e)))
    }

    /// Checks signature, `exp` and `nbf` with zero leeway. Only HS256 is
    /// accepted, whatever the token header claims.
    pub fn verify_access_token(&self, token: &str) -> Result<AccessTokenClaims, ServiceError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "nbf", "iat"]);

        decode::<AccessTokenClaims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!(error = %e, "Access token rejected");
                ServiceError::InvalidToken
            })
    }

    /// 256 random bits from the OS CSPRNG, hex-encoded.
    pub fn issue_opaque_token(&self) -> String {
        let mut bytes = [0u8; OPAQUE_TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        hex::encode(bytes)
    }

    /// Refresh tokens are opaque; their authority lives in the store record.
    pub fn check_refresh_token_format(&self, token: &str) -> Result<(), ServiceError> {
        if token.trim().is_empty() {
            return Err(ServiceError::invalid_request("refresh token is required"));
        }
        Ok(())
    }

    pub fn access_token_ttl(&self) -> Duration {
        self.access_token_ttl
    }

    pub fn refresh_token_ttl(&self) -> Duration {
        self.refresh_token_ttl
    }

    pub fn access_token_expiry_seconds(&self) -> i64 {
        self.access_token_ttl.num_seconds()
    }
}
