//! Persistence capabilities for the three token kinds.
//!
//! Stores only execute what they are told: no expiry or revocation policy
//! lives here. Implementations receive raw opaque tokens and persist their
//! digest (see [`hash_token`]).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::models::{hash_token, EmailVerificationToken, PasswordResetToken, RefreshToken};

#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    async fn create(
        &self,
        user_id: i64,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<RefreshToken, anyhow::Error>;

    async fn get_by_token(&self, token: &str) -> Result<Option<RefreshToken>, anyhow::Error>;

    /// Returns `true` only when this call moved the token from active to
    /// revoked, so concurrent callers can tell who won.
    async fn revoke_by_token(&self, token: &str) -> Result<bool, anyhow::Error>;

    /// Revoke every active token for a user; returns the number revoked.
    async fn revoke_by_user_id(&self, user_id: i64) -> Result<u64, anyhow::Error>;

    async fn delete_expired(&self) -> Result<u64, anyhow::Error>;
}

#[async_trait]
pub trait PasswordResetTokenStore: Send + Sync {
    async fn create(
        &self,
        email: &str,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<PasswordResetToken, anyhow::Error>;

    async fn get_by_token(&self, token: &str)
        -> Result<Option<PasswordResetToken>, anyhow::Error>;

    async fn delete_by_email(&self, email: &str) -> Result<u64, anyhow::Error>;

    async fn delete_expired(&self) -> Result<u64, anyhow::Error>;
}

#[async_trait]
pub trait EmailVerificationTokenStore: Send + Sync {
    async fn create(
        &self,
        user_id: i64,
        email: &str,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<EmailVerificationToken, anyhow::Error>;

    async fn get_by_token(
        &self,
        token: &str,
    ) -> Result<Option<EmailVerificationToken>, anyhow::Error>;

    async fn delete_by_user_id(&self, user_id: i64) -> Result<u64, anyhow::Error>;

    async fn delete_expired(&self) -> Result<u64, anyhow::Error>;
}

#[async_trait]
pub trait StoreHealth: Send + Sync {
    async fn health_check(&self) -> Result<(), anyhow::Error>;
}

/// The per-kind stores handed to the credential service, usually all backed
/// by one implementation.
#[derive(Clone)]
pub struct CredentialStores {
    pub refresh_tokens: Arc<dyn RefreshTokenStore>,
    pub reset_tokens: Arc<dyn PasswordResetTokenStore>,
    pub verification_tokens: Arc<dyn EmailVerificationTokenStore>,
    pub health: Arc<dyn StoreHealth>,
}

impl CredentialStores {
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: RefreshTokenStore
            + PasswordResetTokenStore
            + EmailVerificationTokenStore
            + StoreHealth
            + 'static,
    {
        Self {
            refresh_tokens: backend.clone(),
            reset_tokens: backend.clone(),
            verification_tokens: backend.clone(),
            health: backend,
        }
    }
}

/// Process-local store for tests and single-node development.
///
/// Maps are keyed by token digest; each mutex guards one token kind and is
/// never held across an `.await`.
#[derive(Default)]
pub struct InMemoryCredentialStore {
    next_id: AtomicI64,
    refresh_tokens: Mutex<HashMap<String, RefreshToken>>,
    reset_tokens: Mutex<HashMap<String, PasswordResetToken>>,
    verification_tokens: Mutex<HashMap<String, EmailVerificationToken>>,
}

fn lock<'a, T>(mutex: &'a Mutex<T>, name: &str) -> Result<MutexGuard<'a, T>, anyhow::Error> {
    mutex
        .lock()
        .map_err(|e| anyhow::anyhow!("In-memory {} store mutex poisoned: {}", name, e))
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Active (non-revoked, unexpired) refresh tokens for a user.
    pub fn active_refresh_tokens(&self, user_id: i64) -> Result<usize, anyhow::Error> {
        Ok(lock(&self.refresh_tokens, "refresh token")?
            .values()
            .filter(|t| t.user_id == user_id && t.is_active())
            .count())
    }

    pub fn reset_tokens_for(&self, email: &str) -> Result<usize, anyhow::Error> {
        Ok(lock(&self.reset_tokens, "password reset token")?
            .values()
            .filter(|t| t.email == email)
            .count())
    }

    pub fn verification_tokens_for(&self, user_id: i64) -> Result<usize, anyhow::Error> {
        Ok(lock(&self.verification_tokens, "verification token")?
            .values()
            .filter(|t| t.user_id == user_id)
            .count())
    }
}

#[async_trait]
impl RefreshTokenStore for InMemoryCredentialStore {
    async fn create(
        &self,
        user_id: i64,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<RefreshToken, anyhow::Error> {
        let now = Utc::now();
        let record = RefreshToken {
            id: self.next_id(),
            user_id,
            token_hash: hash_token(token),
            expires_at,
            revoked: false,
            created_at: now,
            updated_at: now,
        };

        let mut tokens = lock(&self.refresh_tokens, "refresh token")?;
        if tokens.contains_key(&record.token_hash) {
            anyhow::bail!("duplicate refresh token");
        }
        tokens.insert(record.token_hash.clone(), record.clone());
        Ok(record)
    }

    async fn get_by_token(&self, token: &str) -> Result<Option<RefreshToken>, anyhow::Error> {
        Ok(lock(&self.refresh_tokens, "refresh token")?
            .get(&hash_token(token))
            .cloned())
    }

    async fn revoke_by_token(&self, token: &str) -> Result<bool, anyhow::Error> {
        let mut tokens = lock(&self.refresh_tokens, "refresh token")?;
        match tokens.get_mut(&hash_token(token)) {
            Some(record) if !record.revoked => {
                record.revoked = true;
                record.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_by_user_id(&self, user_id: i64) -> Result<u64, anyhow::Error> {
        let now = Utc::now();
        let mut revoked = 0;
        for record in lock(&self.refresh_tokens, "refresh token")?.values_mut() {
            if record.user_id == user_id && !record.revoked {
                record.revoked = true;
                record.updated_at = now;
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn delete_expired(&self) -> Result<u64, anyhow::Error> {
        let now = Utc::now();
        let mut tokens = lock(&self.refresh_tokens, "refresh token")?;
        let before = tokens.len();
        tokens.retain(|_, t| t.expires_at >= now);
        Ok((before - tokens.len()) as u64)
    }
}

#[async_trait]
impl PasswordResetTokenStore for InMemoryCredentialStore {
    async fn create(
        &self,
        email: &str,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<PasswordResetToken, anyhow::Error> {
        let record = PasswordResetToken {
            id: self.next_id(),
            email: email.to_string(),
            token_hash: hash_token(token),
            expires_at,
            created_at: Utc::now(),
        };

        lock(&self.reset_tokens, "password reset token")?
            .insert(record.token_hash.clone(), record.clone());
        Ok(record)
    }

    async fn get_by_token(
        &self,
        token: &str,
    ) -> Result<Option<PasswordResetToken>, anyhow::Error> {
        Ok(lock(&self.reset_tokens, "password reset token")?
            .get(&hash_token(token))
            .cloned())
    }

    async fn delete_by_email(&self, email: &str) -> Result<u64, anyhow::Error> {
        let mut tokens = lock(&self.reset_tokens, "password reset token")?;
        let before = tokens.len();
        tokens.retain(|_, t| t.email != email);
        Ok((before - tokens.len()) as u64)
    }

    async fn delete_expired(&self) -> Result<u64, anyhow::Error> {
        let now = Utc::now();
        let mut tokens = lock(&self.reset_tokens, "password reset token")?;
        let before = tokens.len();
        tokens.retain(|_, t| t.expires_at >= now);
        Ok((before - tokens.len()) as u64)
    }
}

#[async_trait]
impl EmailVerificationTokenStore for InMemoryCredentialStore {
    async fn create(
        &self,
        user_id: i64,
        email: &str,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<EmailVerificationToken, anyhow::Error> {
        let record = EmailVerificationToken {
            id: self.next_id(),
            user_id,
            email: email.to_string(),
            token_hash: hash_token(token),
            expires_at,
            created_at: Utc::now(),
        };

        lock(&self.verification_tokens, "verification token")?
            .insert(record.token_hash.clone(), record.clone());
        Ok(record)
    }

    async fn get_by_token(
        &self,
        token: &str,
    ) -> Result<Option<EmailVerificationToken>, anyhow::Error> {
        Ok(lock(&self.verification_tokens, "verification token")?
            .get(&hash_token(token))
            .cloned())
    }

    async fn delete_by_user_id(&self, user_id: i64) -> Result<u64, anyhow::Error> {
        let mut tokens = lock(&self.verification_tokens, "verification token")?;
        let before = tokens.len();
        tokens.retain(|_, t| t.user_id != user_id);
        Ok((before - tokens.len()) as u64)
    }

    async fn delete_expired(&self) -> Result<u64, anyhow::Error> {
        let now = Utc::now();
        let mut tokens = lock(&self.verification_tokens, "verification token")?;
        let before = tokens.len();
        tokens.retain(|_, t| t.expires_at >= now);
        Ok((before - tokens.len()) as u64)
    }
}

#[async_trait]
impl StoreHealth for InMemoryCredentialStore {
    async fn health_check(&self) -> Result<(), anyhow::Error> {
        Ok(())
    }
}
