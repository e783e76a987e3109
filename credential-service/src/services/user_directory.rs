//! Access to the user directory that owns profiles and password hashes.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::StatusCode;
use serde_json::json;
use service_core::observability::TracedClientExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tracing::instrument;

use crate::config::UserDirectoryConfig;
use crate::models::DirectoryUser;

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get_by_id(&self, id: i64) -> Result<Option<DirectoryUser>, anyhow::Error>;
    async fn get_by_email(&self, email: &str) -> Result<Option<DirectoryUser>, anyhow::Error>;
    async fn update_password_hash(&self, id: i64, password_hash: &str)
        -> Result<(), anyhow::Error>;
    async fn update_email_verification(&self, id: i64, verified: bool)
        -> Result<(), anyhow::Error>;
    async fn update_last_login(&self, id: i64) -> Result<(), anyhow::Error>;
}

/// Talks to the directory's internal HTTP API.
#[derive(Clone)]
pub struct HttpUserDirectory {
    client: reqwest::Client,
    base_url: String,
}

impl HttpUserDirectory {
    pub fn new(config: &UserDirectoryConfig) -> Result<Self, anyhow::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build user directory client: {}", e))?;

        tracing::info!(base_url = %config.base_url, "User directory client configured");

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/internal/users{}", self.base_url, path)
    }

    async fn read_user(
        response: reqwest::Response,
    ) -> Result<Option<DirectoryUser>, anyhow::Error> {
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response.json().await?)),
            status => Err(anyhow::anyhow!("User directory returned {}", status)),
        }
    }

    fn expect_success(response: reqwest::Response, action: &str) -> Result<(), anyhow::Error> {
        if response.status().is_success() {
            Ok(())
        } else {
            Err(anyhow::anyhow!(
                "User directory {} failed with {}",
                action,
                response.status()
            ))
        }
    }
}

#[async_trait]
impl UserDirectory for HttpUserDirectory {
    #[instrument(skip(self))]
    async fn get_by_id(&self, id: i64) -> Result<Option<DirectoryUser>, anyhow::Error> {
        let response = self
            .client
            .traced_get(&self.url(&format!("/{}", id)))
            .send()
            .await?;
        Self::read_user(response).await
    }

    #[instrument(skip(self, email))]
    async fn get_by_email(&self, email: &str) -> Result<Option<DirectoryUser>, anyhow::Error> {
        let response = self
            .client
            .traced_get(&self.url("/by-email"))
            .query(&[("email", email)])
            .send()
            .await?;
        Self::read_user(response).await
    }

    #[instrument(skip(self, password_hash))]
    async fn update_password_hash(
        &self,
        id: i64,
        password_hash: &str,
    ) -> Result<(), anyhow::Error> {
        let response = self
            .client
            .traced_put(&self.url(&format!("/{}/password", id)))
            .json(&json!({ "password_hash": password_hash }))
            .send()
            .await?;
        Self::expect_success(response, "password update")
    }

    #[instrument(skip(self))]
    async fn update_email_verification(
        &self,
        id: i64,
        verified: bool,
    ) -> Result<(), anyhow::Error> {
        let response = self
            .client
            .traced_put(&self.url(&format!("/{}/email-verification", id)))
            .json(&json!({ "email_verified": verified }))
            .send()
            .await?;
        Self::expect_success(response, "email verification update")
    }

    #[instrument(skip(self))]
    async fn update_last_login(&self, id: i64) -> Result<(), anyhow::Error> {
        let response = self
            .client
            .traced_post(&self.url(&format!("/{}/last-login", id)))
            .send()
            .await?;
        Self::expect_success(response, "last login update")
    }
}

/// In-memory directory for tests and local runs.
pub struct MockUserDirectory {
    pub users: Mutex<HashMap<i64, DirectoryUser>>,
    unavailable: AtomicBool,
    fail_last_login: AtomicBool,
}

impl Default for MockUserDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl MockUserDirectory {
    pub fn new() -> Self {
        Self {
            users: Mutex::new(HashMap::new()),
            unavailable: AtomicBool::new(false),
            fail_last_login: AtomicBool::new(false),
        }
    }

    pub fn insert(&self, user: DirectoryUser) -> Result<(), anyhow::Error> {
        self.lock()?.insert(user.id, user);
        Ok(())
    }

    pub fn user(&self, id: i64) -> Option<DirectoryUser> {
        self.lock().ok().and_then(|users| users.get(&id).cloned())
    }

    /// Make every call fail as if the directory were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn set_fail_last_login(&self, fail: bool) {
        self.fail_last_login.store(fail, Ordering::SeqCst);
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<i64, DirectoryUser>>, anyhow::Error> {
        self.users
            .lock()
            .map_err(|e| anyhow::anyhow!("Mock directory mutex poisoned: {}", e))
    }

    fn check_available(&self) -> Result<(), anyhow::Error> {
        if self.unavailable.load(Ordering::SeqCst) {
            anyhow::bail!("user directory unavailable");
        }
        Ok(())
    }

    fn update<F>(&self, id: i64, f: F) -> Result<(), anyhow::Error>
    where
        F: FnOnce(&mut DirectoryUser),
    {
        self.check_available()?;
        let mut users = self.lock()?;
        let user = users
            .get_mut(&id)
            .ok_or_else(|| anyhow::anyhow!("user {} not found", id))?;
        f(user);
        Ok(())
    }
}

#[async_trait]
impl UserDirectory for MockUserDirectory {
    async fn get_by_id(&self, id: i64) -> Result<Option<DirectoryUser>, anyhow::Error> {
        self.check_available()?;
        Ok(self.lock()?.get(&id).cloned())
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<DirectoryUser>, anyhow::Error> {
        self.check_available()?;
        Ok(self
            .lock()?
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn update_password_hash(
        &self,
        id: i64,
        password_hash: &str,
    ) -> Result<(), anyhow::Error> {
        self.update(id, |u| u.password_hash = password_hash.to_string())
    }

    async fn update_email_verification(
        &self,
        id: i64,
        verified: bool,
    ) -> Result<(), anyhow::Error> {
        self.update(id, |u| u.email_verified = verified)
    }

    async fn update_last_login(&self, id: i64) -> Result<(), anyhow::Error> {
        if self.fail_last_login.load(Ordering::SeqCst) {
            anyhow::bail!("last login update rejected");
        }
        self.update(id, |u| u.last_login_at = Some(Utc::now()))
    }
}
