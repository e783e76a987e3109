//! PostgreSQL-backed credential store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;

use crate::models::{hash_token, EmailVerificationToken, PasswordResetToken, RefreshToken};
use crate::services::store::{
    EmailVerificationTokenStore, PasswordResetTokenStore, RefreshTokenStore, StoreHealth,
};

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl StoreHealth for Database {
    async fn health_check(&self) -> Result<(), anyhow::Error> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| anyhow::anyhow!("Database health check failed: {}", e))?;
        Ok(())
    }
}

#[async_trait]
impl RefreshTokenStore for Database {
    async fn create(
        &self,
        user_id: i64,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<RefreshToken, anyhow::Error> {
        let record = sqlx::query_as::<_, RefreshToken>(
            r#"
            INSERT INTO refresh_tokens (user_id, token_hash, expires_at, revoked, created_at, updated_at)
            VALUES ($1, $2, $3, FALSE, NOW(), NOW())
            RETURNING id, user_id, token_hash, expires_at, revoked, created_at, updated_at
            "#,
        )
        .bind(user_id)
        .bind(hash_token(token))
        .bind(expires_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(record)
    }

    async fn get_by_token(&self, token: &str) -> Result<Option<RefreshToken>, anyhow::Error> {
        let record = sqlx::query_as::<_, RefreshToken>(
            r#"
            SELECT id, user_id, token_hash, expires_at, revoked, created_at, updated_at
            FROM refresh_tokens
            WHERE token_hash = $1
            "#,
        )
        .bind(hash_token(token))
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn revoke_by_token(&self, token: &str) -> Result<bool, anyhow::Error> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked = TRUE, updated_at = NOW()
            WHERE token_hash = $1 AND revoked = FALSE
            "#,
        )
        .bind(hash_token(token))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn revoke_by_user_id(&self, user_id: i64) -> Result<u64, anyhow::Error> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked = TRUE, updated_at = NOW()
            WHERE user_id = $1 AND revoked = FALSE
            "#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn delete_expired(&self) -> Result<u64, anyhow::Error> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at < NOW()")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl PasswordResetTokenStore for Database {
    async fn create(
        &self,
        email: &str,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<PasswordResetToken, anyhow::Error> {
        let record = sqlx::query_as::<_, PasswordResetToken>(
            r#"
            INSERT INTO password_reset_tokens (email, token_hash, expires_at, created_at)
            VALUES ($1, $2, $3, NOW())
            RETURNING id, email, token_hash, expires_at, created_at
            "#,
        )
        .bind(email)
        .bind(hash_token(token))
        .bind(expires_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(record)
    }

    async fn get_by_token(
        &self,
        token: &str,
    ) -> Result<Option<PasswordResetToken>, anyhow::Error> {
        let record = sqlx::query_as::<_, PasswordResetToken>(
            r#"
            SELECT id, email, token_hash, expires_at, created_at
            FROM password_reset_tokens
            WHERE token_hash = $1
            "#,
        )
        .bind(hash_token(token))
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn delete_by_email(&self, email: &str) -> Result<u64, anyhow::Error> {
        let result = sqlx::query("DELETE FROM password_reset_tokens WHERE email = $1")
            .bind(email)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_expired(&self) -> Result<u64, anyhow::Error> {
        let result = sqlx::query("DELETE FROM password_reset_tokens WHERE expires_at < NOW()")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl EmailVerificationTokenStore for Database {
    async fn create(
        &self,
        user_id: i64,
        email: &str,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<EmailVerificationToken, anyhow::Error> {
        let record = sqlx::query_as::<_, EmailVerificationToken>(
            r#"
            INSERT INTO email_verification_tokens (user_id, email, token_hash, expires_at, created_at)
            VALUES ($1, $2, $3, $4, NOW())
            RETURNING id, user_id, email, token_hash, expires_at, created_at
            "#,
        )
        .bind(user_id)
        .bind(email)
        .bind(hash_token(token))
        .bind(expires_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(record)
    }

    async fn get_by_token(
        &self,
        token: &str,
    ) -> Result<Option<EmailVerificationToken>, anyhow::Error> {
        let record = sqlx::query_as::<_, EmailVerificationToken>(
            r#"
            SELECT id, user_id, email, token_hash, expires_at, created_at
            FROM email_verification_tokens
            WHERE token_hash = $1
            "#,
        )
        .bind(hash_token(token))
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn delete_by_user_id(&self, user_id: i64) -> Result<u64, anyhow::Error> {
        let result = sqlx::query("DELETE FROM email_verification_tokens WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_expired(&self) -> Result<u64, anyhow::Error> {
        let result =
            sqlx::query("DELETE FROM email_verification_tokens WHERE expires_at < NOW()")
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }
}
