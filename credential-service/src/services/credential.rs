//! Credential lifecycle: login, rotation, revocation, password reset and
//! email verification.
//!
//! Refresh tokens move `active -> revoked` or `active -> expired`; neither
//! terminal state ever returns to `active`. Reset and verification tokens are
//! single-use: consuming one deletes every token of that kind for its owner.

use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::instrument;

use crate::config::TokenPolicyConfig;
use crate::models::{AuthenticatedUser, DirectoryUser, PasswordResetToken};
use crate::services::events::{
    EventNotifier, PasswordResetCompleted, PasswordResetRequested, VerificationRequested,
};
use crate::services::store::CredentialStores;
use crate::services::user_directory::UserDirectory;
use crate::services::{non_critical, ServiceError, TokenCodec};
use crate::utils::{hash_password, verify_password};

/// Counted in characters, not bytes.
pub const MIN_PASSWORD_LEN: usize = 8;

/// Lifetimes of the one-time tokens and the bcrypt cost for new hashes.
#[derive(Debug, Clone, Copy)]
pub struct TokenPolicy {
    pub password_reset_ttl: Duration,
    pub email_verification_ttl: Duration,
    pub password_hash_cost: u32,
}

impl TokenPolicy {
    pub fn from_config(config: &TokenPolicyConfig) -> Self {
        Self {
            password_reset_ttl: Duration::minutes(config.password_reset_expiry_minutes),
            email_verification_ttl: Duration::hours(config.email_verification_expiry_hours),
            password_hash_cost: config.password_hash_cost,
        }
    }
}

impl Default for TokenPolicy {
    fn default() -> Self {
        Self {
            password_reset_ttl: Duration::hours(1),
            email_verification_ttl: Duration::hours(24),
            password_hash_cost: bcrypt::DEFAULT_COST,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
}

#[derive(Debug, Clone)]
pub struct LoginResult {
    pub tokens: TokenPair,
    pub user: AuthenticatedUser,
}

/// Rows removed by one expiry sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub refresh_tokens: u64,
    pub password_reset_tokens: u64,
    pub email_verification_tokens: u64,
}

impl PurgeReport {
    pub fn total(&self) -> u64 {
        self.refresh_tokens + self.password_reset_tokens + self.email_verification_tokens
    }
}

fn dependency(context: &'static str) -> impl FnOnce(anyhow::Error) -> ServiceError {
    move |e| ServiceError::DependencyFailure(e.context(context))
}

fn check_new_password(password: &str) -> Result<(), ServiceError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ServiceError::invalid_request(format!(
            "new password must be at least {} characters long",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

#[derive(Clone)]
pub struct CredentialService {
    stores: CredentialStores,
    codec: TokenCodec,
    directory: Arc<dyn UserDirectory>,
    notifier: EventNotifier,
    policy: TokenPolicy,
}

impl CredentialService {
    pub fn new(
        stores: CredentialStores,
        codec: TokenCodec,
        directory: Arc<dyn UserDirectory>,
        notifier: EventNotifier,
        policy: TokenPolicy,
    ) -> Self {
        Self {
            stores,
            codec,
            directory,
            notifier,
            policy,
        }
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    pub fn stores(&self) -> &CredentialStores {
        &self.stores
    }

    #[instrument(skip(self, email, password))]
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginResult, ServiceError> {
        let email = email.trim();
        if email.is_empty() || password.is_empty() {
            return Err(ServiceError::invalid_request(
                "email and password are required",
            ));
        }

        let user = self
            .directory
            .get_by_email(email)
            .await
            .map_err(dependency("user lookup by email"))?
            .ok_or(ServiceError::InvalidCredentials)?;

        // Deleted accounts are indistinguishable from unknown ones; blocked
        // accounts are reported as such.
        if user.is_deleted() {
            tracing::info!(user_id = user.id, "Login rejected for deleted account");
            return Err(ServiceError::InvalidCredentials);
        }
        if user.is_blocked {
            tracing::info!(user_id = user.id, "Login rejected for blocked account");
            return Err(ServiceError::AccountBlocked);
        }

        if !verify_password(password, &user.password_hash).await? {
            tracing::info!(user_id = user.id, "Login rejected: password mismatch");
            return Err(ServiceError::InvalidCredentials);
        }

        let tokens = self.issue_session(user.id, &user.email).await?;

        let directory = self.directory.clone();
        let user_id = user.id;
        non_critical::spawn("update_last_login", async move {
            directory.update_last_login(user_id).await
        });

        tracing::info!(user_id = user.id, "User logged in");
        Ok(LoginResult {
            tokens,
            user: user.into(),
        })
    }

    /// Rotate a refresh token.
    ///
    /// The replacement is persisted before the presented token is revoked.
    /// A failed revoke is logged and tolerated; a revoke that finds the token
    /// already revoked means a concurrent rotation won, so the replacement is
    /// withdrawn and the call fails.
    #[instrument(skip(self, refresh_token))]
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<TokenPair, ServiceError> {
        self.codec.check_refresh_token_format(refresh_token)?;

        let record = self
            .stores
            .refresh_tokens
            .get_by_token(refresh_token)
            .await
            .map_err(dependency("refresh token lookup"))?
            .ok_or(ServiceError::InvalidToken)?;

        if record.is_expired_at(Utc::now()) {
            return Err(ServiceError::TokenExpired);
        }
        if record.revoked {
            tracing::warn!(
                token_id = record.id,
                user_id = record.user_id,
                "Revoked refresh token presented"
            );
            return Err(ServiceError::TokenRevoked);
        }

        let user = self
            .directory
            .get_by_id(record.user_id)
            .await
            .map_err(dependency("user lookup by id"))?
            .ok_or(ServiceError::UserNotFound)?;

        let tokens = self.issue_session(user.id, &user.email).await?;

        let revoked = non_critical::run(
            "revoke_rotated_refresh_token",
            self.stores.refresh_tokens.revoke_by_token(refresh_token),
        )
        .await;

        if revoked == Some(false) {
            tracing::warn!(
                token_id = record.id,
                user_id = user.id,
                "Refresh token rotated concurrently, withdrawing replacement"
            );
            non_critical::run(
                "revoke_withdrawn_refresh_token",
                self.stores.refresh_tokens.revoke_by_token(&tokens.refresh_token),
            )
            .await;
            return Err(ServiceError::TokenRevoked);
        }

        tracing::info!(user_id = user.id, "Refresh token rotated");
        Ok(tokens)
    }

    #[instrument(skip(self, access_token))]
    pub async fn validate_token(
        &self,
        access_token: &str,
    ) -> Result<AuthenticatedUser, ServiceError> {
        if access_token.trim().is_empty() {
            return Err(ServiceError::invalid_request("access token is required"));
        }

        let claims = self.codec.verify_access_token(access_token)?;

        match self.directory.get_by_id(claims.user_id).await {
            Ok(Some(user)) if !user.is_deleted() => Ok(user.into()),
            Ok(_) => Err(ServiceError::UserNotFound),
            Err(e) => {
                tracing::warn!(
                    user_id = claims.user_id,
                    error = %e,
                    "User lookup failed during token validation"
                );
                Err(ServiceError::UserNotFound)
            }
        }
    }

    /// Revoke only the presented refresh token. Unknown, already revoked, or
    /// foreign tokens are a no-op.
    #[instrument(skip(self, refresh_token))]
    pub async fn logout(&self, refresh_token: &str, user_id: i64) -> Result<(), ServiceError> {
        if refresh_token.trim().is_empty() {
            return Err(ServiceError::invalid_request("refresh token is required"));
        }

        let record = self
            .stores
            .refresh_tokens
            .get_by_token(refresh_token)
            .await
            .map_err(dependency("refresh token lookup"))?;

        match record {
            None => {
                tracing::debug!(user_id = user_id, "Logout with unknown refresh token");
                return Ok(());
            }
            Some(record) if record.user_id != user_id => {
                tracing::warn!(
                    user_id = user_id,
                    owner_id = record.user_id,
                    "Logout attempted with another user's refresh token"
                );
                return Ok(());
            }
            Some(_) => {}
        }

        let revoked = self
            .stores
            .refresh_tokens
            .revoke_by_token(refresh_token)
            .await
            .map_err(dependency("refresh token revocation"))?;

        tracing::info!(user_id = user_id, revoked = revoked, "User logged out");
        Ok(())
    }

    /// Change a password and sign the user out everywhere.
    #[instrument(skip(self, old_password, new_password))]
    pub async fn change_password(
        &self,
        user_id: i64,
        old_password: &str,
        new_password: &str,
    ) -> Result<(), ServiceError> {
        if old_password.is_empty() || new_password.is_empty() {
            return Err(ServiceError::invalid_request(
                "old password and new password are required",
            ));
        }
        check_new_password(new_password)?;

        let user = self
            .directory
            .get_by_id(user_id)
            .await
            .map_err(dependency("user lookup by id"))?
            .ok_or(ServiceError::UserNotFound)?;

        if !verify_password(old_password, &user.password_hash).await? {
            return Err(ServiceError::InvalidCredentials);
        }

        self.replace_password(user.id, new_password).await?;

        tracing::info!(user_id = user.id, "Password changed");
        Ok(())
    }

    /// Always succeeds for well-formed input so callers cannot probe which
    /// emails exist. Only a known, live account gets a token and an event.
    #[instrument(skip(self, email))]
    pub async fn forgot_password(&self, email: &str) -> Result<(), ServiceError> {
        let email = email.trim();
        if email.is_empty() {
            return Err(ServiceError::invalid_request("email is required"));
        }

        let user = match self.directory.get_by_email(email).await {
            Ok(Some(user)) if !user.is_deleted() => user,
            Ok(_) => {
                tracing::info!("Password reset requested for unknown email");
                return Ok(());
            }
            Err(e) => {
                tracing::error!(error = %e, "User lookup failed during password reset request");
                return Ok(());
            }
        };

        if let Err(e) = self.issue_reset_token(&user).await {
            tracing::error!(user_id = user.id, error = %e, "Failed to issue password reset token");
        }

        Ok(())
    }

    async fn issue_reset_token(&self, user: &DirectoryUser) -> Result<(), anyhow::Error> {
        let superseded = self.stores.reset_tokens.delete_by_email(&user.email).await?;

        let token = self.codec.issue_opaque_token();
        let expires_at = Utc::now() + self.policy.password_reset_ttl;
        let record = self
            .stores
            .reset_tokens
            .create(&user.email, &token, expires_at)
            .await?;

        tracing::info!(
            user_id = user.id,
            token_id = record.id,
            superseded = superseded,
            "Password reset token issued"
        );

        self.notifier.password_reset_requested(PasswordResetRequested {
            email: user.email.clone(),
            token,
            user_id: user.id,
            user_name: user.name.clone(),
            expires_at: expires_at.timestamp(),
        });

        Ok(())
    }

    #[instrument(skip(self, token, new_password))]
    pub async fn reset_password(&self, token: &str, new_password: &str) -> Result<(), ServiceError> {
        if token.trim().is_empty() || new_password.is_empty() {
            return Err(ServiceError::invalid_request(
                "token and new password are required",
            ));
        }
        check_new_password(new_password)?;

        let record = self.active_reset_token(token).await?;

        let user = self
            .directory
            .get_by_email(&record.email)
            .await
            .map_err(dependency("user lookup by email"))?
            .filter(|u| !u.is_deleted())
            .ok_or(ServiceError::UserNotFound)?;

        let consumed = self
            .stores
            .reset_tokens
            .delete_by_email(&record.email)
            .await
            .map_err(dependency("password reset token cleanup"))?;

        self.replace_password(user.id, new_password).await?;

        tracing::info!(user_id = user.id, consumed = consumed, "Password reset completed");

        self.notifier.password_reset_completed(PasswordResetCompleted {
            user_id: user.id,
            email: user.email,
        });

        Ok(())
    }

    /// Check a reset token without consuming it; returns its email.
    #[instrument(skip(self, token))]
    pub async fn verify_reset_token(&self, token: &str) -> Result<String, ServiceError> {
        if token.trim().is_empty() {
            return Err(ServiceError::invalid_request("token is required"));
        }

        Ok(self.active_reset_token(token).await?.email)
    }

    async fn active_reset_token(&self, token: &str) -> Result<PasswordResetToken, ServiceError> {
        let record = self
            .stores
            .reset_tokens
            .get_by_token(token)
            .await
            .map_err(dependency("password reset token lookup"))?;

        match record {
            Some(record) if !record.is_expired() => Ok(record),
            _ => Err(ServiceError::InvalidOrExpiredToken),
        }
    }

    /// Hash, store via the directory, then revoke every refresh token.
    async fn replace_password(&self, user_id: i64, new_password: &str) -> Result<(), ServiceError> {
        let password_hash = hash_password(new_password, self.policy.password_hash_cost).await?;

        self.directory
            .update_password_hash(user_id, &password_hash)
            .await
            .map_err(dependency("password update"))?;

        let revoked = self
            .stores
            .refresh_tokens
            .revoke_by_user_id(user_id)
            .await
            .map_err(dependency("session revocation"))?;

        tracing::info!(user_id = user_id, revoked_sessions = revoked, "Sessions revoked");
        Ok(())
    }

    #[instrument(skip(self, email))]
    pub async fn send_verification_email(
        &self,
        user_id: i64,
        email: &str,
    ) -> Result<(), ServiceError> {
        let email = email.trim();
        if user_id <= 0 || email.is_empty() {
            return Err(ServiceError::invalid_request(
                "user id and email are required",
            ));
        }

        let user = self
            .directory
            .get_by_id(user_id)
            .await
            .map_err(dependency("user lookup by id"))?
            .ok_or(ServiceError::UserNotFound)?;

        self.stores
            .verification_tokens
            .delete_by_user_id(user_id)
            .await
            .map_err(dependency("verification token cleanup"))?;

        let token = self.codec.issue_opaque_token();
        let expires_at = Utc::now() + self.policy.email_verification_ttl;
        let record = self
            .stores
            .verification_tokens
            .create(user_id, email, &token, expires_at)
            .await
            .map_err(dependency("persist verification token"))?;

        tracing::info!(user_id = user_id, token_id = record.id, "Verification token issued");

        self.notifier.verification_requested(VerificationRequested {
            user_id,
            email: email.to_string(),
            name: user.name,
            verification_token: token,
        });

        Ok(())
    }

    /// Mark the owner's email verified and consume all of their verification
    /// tokens. Returns the user id.
    #[instrument(skip(self, token))]
    pub async fn verify_email(&self, token: &str) -> Result<i64, ServiceError> {
        if token.trim().is_empty() {
            return Err(ServiceError::invalid_request("token is required"));
        }

        let record = self
            .stores
            .verification_tokens
            .get_by_token(token)
            .await
            .map_err(dependency("verification token lookup"))?
            .filter(|r| !r.is_expired())
            .ok_or(ServiceError::InvalidOrExpiredToken)?;

        self.directory
            .update_email_verification(record.user_id, true)
            .await
            .map_err(dependency("email verification update"))?;

        self.stores
            .verification_tokens
            .delete_by_user_id(record.user_id)
            .await
            .map_err(dependency("verification token cleanup"))?;

        tracing::info!(user_id = record.user_id, "Email verified");
        Ok(record.user_id)
    }

    /// Physically delete expired tokens of every kind.
    pub async fn purge_expired(&self) -> Result<PurgeReport, ServiceError> {
        let report = PurgeReport {
            refresh_tokens: self
                .stores
                .refresh_tokens
                .delete_expired()
                .await
                .map_err(dependency("refresh token sweep"))?,
            password_reset_tokens: self
                .stores
                .reset_tokens
                .delete_expired()
                .await
                .map_err(dependency("password reset token sweep"))?,
            email_verification_tokens: self
                .stores
                .verification_tokens
                .delete_expired()
                .await
                .map_err(dependency("verification token sweep"))?,
        };

        Ok(report)
    }

    async fn issue_session(&self, user_id: i64, email: &str) -> Result<TokenPair, ServiceError> {
        let access_token = self.codec.issue_access_token(user_id, email)?;
        let refresh_token = self.codec.issue_opaque_token();
        let expires_at = Utc::now() + self.codec.refresh_token_ttl();

        self.stores
            .refresh_tokens
            .create(user_id, &refresh_token, expires_at)
            .await
            .map_err(dependency("persist refresh token"))?;

        Ok(TokenPair {
            access_token,
            refresh_token,
            expires_in: self.codec.access_token_expiry_seconds(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JwtConfig;
    use crate::models::RefreshToken;
    use crate::services::events::{
        MockEventPublisher, TOPIC_PASSWORD_RESET_COMPLETED, TOPIC_PASSWORD_RESET_REQUESTED,
        TOPIC_VERIFICATION_REQUESTED,
    };
    use crate::services::store::{
        EmailVerificationTokenStore, InMemoryCredentialStore, PasswordResetTokenStore,
        RefreshTokenStore,
    };
    use crate::services::user_directory::MockUserDirectory;
    use async_trait::async_trait;
    use chrono::DateTime;
    use secrecy::SecretString;

    const PASSWORD: &str = "pw123456";

    struct Harness {
        service: CredentialService,
        store: Arc<InMemoryCredentialStore>,
        directory: Arc<MockUserDirectory>,
        publisher: Arc<MockEventPublisher>,
    }

    fn codec() -> TokenCodec {
        TokenCodec::new(&JwtConfig {
            secret: SecretString::new("unit-test-secret".to_string()),
            access_token_expiry_minutes: 15,
            refresh_token_expiry_days: 7,
        })
        .unwrap()
    }

    fn policy() -> TokenPolicy {
        TokenPolicy {
            password_hash_cost: 4,
            ..TokenPolicy::default()
        }
    }

    fn directory_user(id: i64, email: &str) -> DirectoryUser {
        DirectoryUser {
            id,
            name: format!("User {}", id),
            email: email.to_string(),
            password_hash: bcrypt::hash(PASSWORD, 4).unwrap(),
            is_admin: false,
            is_blocked: false,
            email_verified: false,
            last_login_at: None,
            deleted_at: None,
        }
    }

    fn harness_with(stores: CredentialStores, store: Arc<InMemoryCredentialStore>) -> Harness {
        let directory = Arc::new(MockUserDirectory::new());
        directory.insert(directory_user(1, "a@x.com")).unwrap();
        let publisher = Arc::new(MockEventPublisher::new());

        let service = CredentialService::new(
            stores,
            codec(),
            directory.clone(),
            EventNotifier::new(publisher.clone()),
            policy(),
        );

        Harness {
            service,
            store,
            directory,
            publisher,
        }
    }

    fn harness() -> Harness {
        let store = Arc::new(InMemoryCredentialStore::new());
        harness_with(CredentialStores::from_backend(store.clone()), store)
    }

    async fn wait_for_events(publisher: &MockEventPublisher, topic: &str, count: usize) {
        for _ in 0..100 {
            if publisher.published_on(topic).len() >= count {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_login_issues_working_tokens() {
        let h = harness();

        let result = h.service.login("a@x.com", PASSWORD).await.unwrap();
        assert_eq!(result.user.id, 1);
        assert_eq!(result.tokens.expires_in, 900);

        let user = h.service.validate_token(&result.tokens.access_token).await.unwrap();
        assert_eq!(user.email, "a@x.com");
        assert_eq!(h.store.active_refresh_tokens(1).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_login_rejections() {
        let h = harness();

        assert!(matches!(
            h.service.login("", PASSWORD).await,
            Err(ServiceError::InvalidRequest(_))
        ));
        assert!(matches!(
            h.service.login("a@x.com", "wrong-password").await,
            Err(ServiceError::InvalidCredentials)
        ));
        assert!(matches!(
            h.service.login("nobody@x.com", PASSWORD).await,
            Err(ServiceError::InvalidCredentials)
        ));

        let mut blocked = directory_user(2, "blocked@x.com");
        blocked.is_blocked = true;
        h.directory.insert(blocked).unwrap();
        assert!(matches!(
            h.service.login("blocked@x.com", PASSWORD).await,
            Err(ServiceError::AccountBlocked)
        ));

        let mut deleted = directory_user(3, "gone@x.com");
        deleted.deleted_at = Some(Utc::now());
        h.directory.insert(deleted).unwrap();
        assert!(matches!(
            h.service.login("gone@x.com", PASSWORD).await,
            Err(ServiceError::InvalidCredentials)
        ));

        h.directory.set_unavailable(true);
        assert!(matches!(
            h.service.login("a@x.com", PASSWORD).await,
            Err(ServiceError::DependencyFailure(_))
        ));
    }

    #[tokio::test]
    async fn test_login_survives_last_login_failure() {
        let h = harness();
        h.directory.set_fail_last_login(true);

        assert!(h.service.login("a@x.com", PASSWORD).await.is_ok());
    }

    #[tokio::test]
    async fn test_refresh_rotates_and_rejects_reuse() {
        let h = harness();
        let login = h.service.login("a@x.com", PASSWORD).await.unwrap();

        let rotated = h
            .service
            .refresh_token(&login.tokens.refresh_token)
            .await
            .unwrap();
        assert_ne!(rotated.refresh_token, login.tokens.refresh_token);
        assert_eq!(h.store.active_refresh_tokens(1).unwrap(), 1);

        assert!(matches!(
            h.service.refresh_token(&login.tokens.refresh_token).await,
            Err(ServiceError::TokenRevoked)
        ));
        assert!(h.service.refresh_token(&rotated.refresh_token).await.is_ok());
    }

    #[tokio::test]
    async fn test_refresh_empty_and_unknown() {
        let h = harness();

        assert!(matches!(
            h.service.refresh_token("").await,
            Err(ServiceError::InvalidRequest(_))
        ));
        let unknown = h.service.codec().issue_opaque_token();
        assert!(matches!(
            h.service.refresh_token(&unknown).await,
            Err(ServiceError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn test_expired_refresh_token_reports_expired_even_if_revoked() {
        let h = harness();
        let token = h.service.codec().issue_opaque_token();
        let past = Utc::now() - Duration::minutes(1);

        RefreshTokenStore::create(h.store.as_ref(), 1, &token, past)
            .await
            .unwrap();
        assert!(matches!(
            h.service.refresh_token(&token).await,
            Err(ServiceError::TokenExpired)
        ));

        RefreshTokenStore::revoke_by_token(h.store.as_ref(), &token)
            .await
            .unwrap();
        assert!(matches!(
            h.service.refresh_token(&token).await,
            Err(ServiceError::TokenExpired)
        ));
    }

    /// Simulates a competing rotation landing between lookup and revoke.
    struct RacingRefreshStore {
        inner: Arc<InMemoryCredentialStore>,
    }

    #[async_trait]
    impl RefreshTokenStore for RacingRefreshStore {
        async fn create(
            &self,
            user_id: i64,
            token: &str,
            expires_at: DateTime<Utc>,
        ) -> Result<RefreshToken, anyhow::Error> {
            RefreshTokenStore::create(self.inner.as_ref(), user_id, token, expires_at).await
        }

        async fn get_by_token(&self, token: &str) -> Result<Option<RefreshToken>, anyhow::Error> {
            RefreshTokenStore::get_by_token(self.inner.as_ref(), token).await
        }

        async fn revoke_by_token(&self, token: &str) -> Result<bool, anyhow::Error> {
            self.inner.revoke_by_token(token).await?;
            self.inner.revoke_by_token(token).await
        }

        async fn revoke_by_user_id(&self, user_id: i64) -> Result<u64, anyhow::Error> {
            self.inner.revoke_by_user_id(user_id).await
        }

        async fn delete_expired(&self) -> Result<u64, anyhow::Error> {
            RefreshTokenStore::delete_expired(self.inner.as_ref()).await
        }
    }

    #[tokio::test]
    async fn test_losing_concurrent_rotation_withdraws_replacement() {
        let store = Arc::new(InMemoryCredentialStore::new());
        let mut stores = CredentialStores::from_backend(store.clone());
        stores.refresh_tokens = Arc::new(RacingRefreshStore {
            inner: store.clone(),
        });
        let h = harness_with(stores, store);

        let login = h.service.login("a@x.com", PASSWORD).await.unwrap();
        assert!(matches!(
            h.service.refresh_token(&login.tokens.refresh_token).await,
            Err(ServiceError::TokenRevoked)
        ));
        assert_eq!(h.store.active_refresh_tokens(1).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_refresh_has_single_winner() {
        let h = harness();
        let login = h.service.login("a@x.com", PASSWORD).await.unwrap();
        let token = login.tokens.refresh_token.clone();

        let (a, b) = tokio::join!(
            h.service.refresh_token(&token),
            h.service.refresh_token(&token)
        );

        let successes = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
        assert_eq!(successes, 1);
        assert_eq!(h.store.active_refresh_tokens(1).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_validate_token_reflects_directory() {
        let h = harness();
        let login = h.service.login("a@x.com", PASSWORD).await.unwrap();
        let access = login.tokens.access_token;

        assert!(matches!(
            h.service.validate_token("not-a-jwt").await,
            Err(ServiceError::InvalidToken)
        ));

        h.directory.set_unavailable(true);
        assert!(matches!(
            h.service.validate_token(&access).await,
            Err(ServiceError::UserNotFound)
        ));
        h.directory.set_unavailable(false);

        let mut user = h.directory.user(1).unwrap();
        user.deleted_at = Some(Utc::now());
        h.directory.insert(user).unwrap();
        assert!(matches!(
            h.service.validate_token(&access).await,
            Err(ServiceError::UserNotFound)
        ));
    }

    #[tokio::test]
    async fn test_logout_is_idempotent_and_owner_scoped() {
        let h = harness();
        h.directory.insert(directory_user(2, "b@x.com")).unwrap();
        let first = h.service.login("a@x.com", PASSWORD).await.unwrap();
        let second = h.service.login("a@x.com", PASSWORD).await.unwrap();

        h.service.logout(&second.tokens.refresh_token, 2).await.unwrap();
        assert_eq!(h.store.active_refresh_tokens(1).unwrap(), 2);

        h.service.logout(&first.tokens.refresh_token, 1).await.unwrap();
        h.service.logout(&first.tokens.refresh_token, 1).await.unwrap();
        assert_eq!(h.store.active_refresh_tokens(1).unwrap(), 1);

        assert!(h.service.refresh_token(&second.tokens.refresh_token).await.is_ok());
    }

    #[tokio::test]
    async fn test_change_password_revokes_all_sessions() {
        let h = harness();
        let login = h.service.login("a@x.com", PASSWORD).await.unwrap();
        h.service.login("a@x.com", PASSWORD).await.unwrap();

        assert!(matches!(
            h.service.change_password(1, "wrong-password", "newpass123").await,
            Err(ServiceError::InvalidCredentials)
        ));
        assert!(matches!(
            h.service.change_password(1, PASSWORD, "short").await,
            Err(ServiceError::InvalidRequest(_))
        ));

        h.service.change_password(1, PASSWORD, "newpass123").await.unwrap();
        assert_eq!(h.store.active_refresh_tokens(1).unwrap(), 0);
        assert!(matches!(
            h.service.refresh_token(&login.tokens.refresh_token).await,
            Err(ServiceError::TokenRevoked)
        ));
        assert!(h.service.login("a@x.com", "newpass123").await.is_ok());
    }

    #[tokio::test]
    async fn test_forgot_password_does_not_reveal_accounts() {
        let h = harness();

        h.service.forgot_password("nobody@x.com").await.unwrap();
        h.directory.set_unavailable(true);
        h.service.forgot_password("a@x.com").await.unwrap();
        h.directory.set_unavailable(false);

        assert_eq!(h.store.reset_tokens_for("a@x.com").unwrap(), 0);
        assert!(h.publisher.published().is_empty());

        assert!(matches!(
            h.service.forgot_password("  ").await,
            Err(ServiceError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_reset_password_flow() {
        let h = harness();
        h.service.login("a@x.com", PASSWORD).await.unwrap();

        h.service.forgot_password("a@x.com").await.unwrap();
        h.service.forgot_password("a@x.com").await.unwrap();
        assert_eq!(h.store.reset_tokens_for("a@x.com").unwrap(), 1);

        wait_for_events(&h.publisher, TOPIC_PASSWORD_RESET_REQUESTED, 2).await;
        let mut live = Vec::new();
        for event in h.publisher.published_on(TOPIC_PASSWORD_RESET_REQUESTED) {
            let token = event.envelope.data["token"].as_str().unwrap().to_string();
            match h.service.verify_reset_token(&token).await {
                Ok(email) => {
                    assert_eq!(email, "a@x.com");
                    live.push(token);
                }
                Err(e) => assert!(matches!(e, ServiceError::InvalidOrExpiredToken)),
            }
        }
        assert_eq!(live.len(), 1);
        let token = live.remove(0);

        h.service.reset_password(&token, "brandnew99").await.unwrap();
        assert_eq!(h.store.active_refresh_tokens(1).unwrap(), 0);
        assert_eq!(h.store.reset_tokens_for("a@x.com").unwrap(), 0);
        assert!(matches!(
            h.service.reset_password(&token, "brandnew99").await,
            Err(ServiceError::InvalidOrExpiredToken)
        ));
        assert!(h.service.login("a@x.com", "brandnew99").await.is_ok());

        wait_for_events(&h.publisher, TOPIC_PASSWORD_RESET_COMPLETED, 1).await;
        assert_eq!(h.publisher.published_on(TOPIC_PASSWORD_RESET_COMPLETED).len(), 1);
    }

    #[tokio::test]
    async fn test_reset_password_consumes_every_token_for_email() {
        let h = harness();
        let expires_at = Utc::now() + Duration::hours(1);
        PasswordResetTokenStore::create(h.store.as_ref(), "a@x.com", "reset-a", expires_at)
            .await
            .unwrap();
        PasswordResetTokenStore::create(h.store.as_ref(), "a@x.com", "reset-b", expires_at)
            .await
            .unwrap();

        h.service.reset_password("reset-a", "brandnew99").await.unwrap();

        assert!(matches!(
            h.service.verify_reset_token("reset-b").await,
            Err(ServiceError::InvalidOrExpiredToken)
        ));
        assert!(matches!(
            h.service.reset_password("reset-b", "another99").await,
            Err(ServiceError::InvalidOrExpiredToken)
        ));
        assert!(h.service.login("a@x.com", "brandnew99").await.is_ok());
    }

    /// Reset token store whose cleanup always fails.
    struct StuckResetStore {
        inner: Arc<InMemoryCredentialStore>,
    }

    #[async_trait]
    impl PasswordResetTokenStore for StuckResetStore {
        async fn create(
            &self,
            email: &str,
            token: &str,
            expires_at: DateTime<Utc>,
        ) -> Result<PasswordResetToken, anyhow::Error> {
            PasswordResetTokenStore::create(self.inner.as_ref(), email, token, expires_at).await
        }

        async fn get_by_token(
            &self,
            token: &str,
        ) -> Result<Option<PasswordResetToken>, anyhow::Error> {
            PasswordResetTokenStore::get_by_token(self.inner.as_ref(), token).await
        }

        async fn delete_by_email(&self, _email: &str) -> Result<u64, anyhow::Error> {
            Err(anyhow::anyhow!("reset token table unavailable"))
        }

        async fn delete_expired(&self) -> Result<u64, anyhow::Error> {
            PasswordResetTokenStore::delete_expired(self.inner.as_ref()).await
        }
    }

    #[tokio::test]
    async fn test_reset_password_leaves_password_when_token_cleanup_fails() {
        let store = Arc::new(InMemoryCredentialStore::new());
        let mut stores = CredentialStores::from_backend(store.clone());
        stores.reset_tokens = Arc::new(StuckResetStore {
            inner: store.clone(),
        });
        let h = harness_with(stores, store);

        let login = h.service.login("a@x.com", PASSWORD).await.unwrap();
        PasswordResetTokenStore::create(
            h.store.as_ref(),
            "a@x.com",
            "reset-a",
            Utc::now() + Duration::hours(1),
        )
        .await
        .unwrap();

        assert!(matches!(
            h.service.reset_password("reset-a", "brandnew99").await,
            Err(ServiceError::DependencyFailure(_))
        ));

        assert!(h.service.login("a@x.com", PASSWORD).await.is_ok());
        assert!(h.service.login("a@x.com", "brandnew99").await.is_err());
        assert!(h
            .service
            .refresh_token(&login.tokens.refresh_token)
            .await
            .is_ok());
        assert!(h.publisher.published_on(TOPIC_PASSWORD_RESET_COMPLETED).is_empty());
    }

    #[tokio::test]
    async fn test_verify_email_consumes_every_token_for_user() {
        let h = harness();
        let expires_at = Utc::now() + Duration::hours(24);
        EmailVerificationTokenStore::create(h.store.as_ref(), 1, "a@x.com", "verify-a", expires_at)
            .await
            .unwrap();
        EmailVerificationTokenStore::create(h.store.as_ref(), 1, "a@x.com", "verify-b", expires_at)
            .await
            .unwrap();

        assert_eq!(h.service.verify_email("verify-a").await.unwrap(), 1);
        assert!(h.directory.user(1).unwrap().email_verified);

        assert!(matches!(
            h.service.verify_email("verify-b").await,
            Err(ServiceError::InvalidOrExpiredToken)
        ));
        assert_eq!(h.store.verification_tokens_for(1).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_verification_flow() {
        let h = harness();

        h.service.send_verification_email(1, "a@x.com").await.unwrap();
        h.service.send_verification_email(1, "a@x.com").await.unwrap();
        assert_eq!(h.store.verification_tokens_for(1).unwrap(), 1);

        wait_for_events(&h.publisher, TOPIC_VERIFICATION_REQUESTED, 2).await;
        let tokens: Vec<String> = h
            .publisher
            .published_on(TOPIC_VERIFICATION_REQUESTED)
            .iter()
            .map(|e| e.envelope.data["verification_token"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(tokens.len(), 2);

        let mut verified = 0;
        let mut token = String::new();
        for candidate in tokens {
            if let Ok(user_id) = h.service.verify_email(&candidate).await {
                assert_eq!(user_id, 1);
                verified += 1;
                token = candidate;
            }
        }
        assert_eq!(verified, 1);
        assert!(h.directory.user(1).unwrap().email_verified);
        assert!(matches!(
            h.service.verify_email(&token).await,
            Err(ServiceError::InvalidOrExpiredToken)
        ));

        assert!(matches!(
            h.service.send_verification_email(99, "z@x.com").await,
            Err(ServiceError::UserNotFound)
        ));
        assert!(matches!(
            h.service.send_verification_email(0, "a@x.com").await,
            Err(ServiceError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_purge_expired_counts_each_kind() {
        let h = harness();
        let past = Utc::now() - Duration::minutes(5);
        let codec = h.service.codec().clone();

        RefreshTokenStore::create(h.store.as_ref(), 1, &codec.issue_opaque_token(), past)
            .await
            .unwrap();
        crate::services::store::PasswordResetTokenStore::create(
            h.store.as_ref(),
            "a@x.com",
            &codec.issue_opaque_token(),
            past,
        )
        .await
        .unwrap();
        h.service.login("a@x.com", PASSWORD).await.unwrap();

        let report = h.service.purge_expired().await.unwrap();
        assert_eq!(report.refresh_tokens, 1);
        assert_eq!(report.password_reset_tokens, 1);
        assert_eq!(report.email_verification_tokens, 0);
        assert_eq!(report.total(), 2);

        assert_eq!(h.service.purge_expired().await.unwrap(), PurgeReport::default());
    }
}
