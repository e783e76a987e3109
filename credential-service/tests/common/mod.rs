//! Shared setup for credential-service integration tests.
//!
//! Wires the real router to the in-memory token store, a mock user directory
//! and a recording event publisher, and drives it with `oneshot`.

#![allow(dead_code)]

use axum::{
    body::{Body, Bytes},
    http::{header, HeaderMap, Method, Request, StatusCode},
    Router,
};
use credential_service::{
    build_router,
    config::{
        CredentialConfig, DatabaseConfig, Environment, JwtConfig, RateLimitConfig, RedisConfig,
        SecurityConfig, TokenPolicyConfig, UserDirectoryConfig,
    },
    models::DirectoryUser,
    services::{
        events::PublishedEvent, CredentialService, CredentialStores, EventNotifier,
        InMemoryCredentialStore, MockEventPublisher, MockUserDirectory, TokenCodec, TokenPolicy,
    },
    AppState,
};
use http_body_util::BodyExt;
use secrecy::SecretString;
use serde_json::Value;
use service_core::middleware::rate_limit::create_ip_rate_limiter;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

pub const TEST_USER_ID: i64 = 1;
pub const TEST_EMAIL: &str = "a@x.com";
pub const TEST_PASSWORD: &str = "pw123456";

pub fn test_config() -> CredentialConfig {
    CredentialConfig {
        common: service_core::config::Config::default(),
        environment: Environment::Dev,
        service_name: "credential-service".to_string(),
        service_version: "test".to_string(),
        log_level: "error".to_string(),
        otlp_endpoint: None,
        database: DatabaseConfig {
            url: "postgres://localhost/credentials_test".to_string(),
            max_connections: 2,
            min_connections: 1,
        },
        redis: RedisConfig {
            url: "redis://127.0.0.1:6379".to_string(),
        },
        jwt: JwtConfig {
            secret: SecretString::new("integration-test-secret".to_string()),
            access_token_expiry_minutes: 60,
            refresh_token_expiry_days: 7,
        },
        token_policy: TokenPolicyConfig {
            password_reset_expiry_minutes: 60,
            email_verification_expiry_hours: 24,
            password_hash_cost: 4,
        },
        user_directory: UserDirectoryConfig {
            base_url: "http://localhost:8081".to_string(),
            timeout_seconds: 1,
        },
        security: SecurityConfig {
            allowed_origins: vec!["http://localhost:3000".to_string()],
        },
        rate_limit: RateLimitConfig {
            login_attempts: 5,
            login_window_seconds: 900,
            password_reset_attempts: 3,
            password_reset_window_seconds: 3600,
        },
        sweep_interval_seconds: 0,
    }
}

pub fn directory_user(id: i64, email: &str, password: &str) -> DirectoryUser {
    DirectoryUser {
        id,
        name: format!("Test User {}", id),
        email: email.to_string(),
        password_hash: bcrypt::hash(password, 4).expect("Failed to hash test password"),
        is_admin: false,
        is_blocked: false,
        email_verified: false,
        last_login_at: None,
        deleted_at: None,
    }
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub bytes: Bytes,
}

impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.bytes).unwrap_or(Value::Null)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub store: Arc<InMemoryCredentialStore>,
    pub directory: Arc<MockUserDirectory>,
    pub publisher: Arc<MockEventPublisher>,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with(test_config()).await
    }

    /// Build the app from `config` with one seeded user,
    /// `a@x.com` / `pw123456`.
    pub async fn spawn_with(config: CredentialConfig) -> Self {
        let store = Arc::new(InMemoryCredentialStore::new());
        let directory = Arc::new(MockUserDirectory::new());
        let publisher = Arc::new(MockEventPublisher::new());

        directory
            .insert(directory_user(TEST_USER_ID, TEST_EMAIL, TEST_PASSWORD))
            .expect("Failed to seed test user");

        let codec = TokenCodec::new(&config.jwt).expect("Failed to create token codec");
        let credentials = CredentialService::new(
            CredentialStores::from_backend(store.clone()),
            codec,
            directory.clone(),
            EventNotifier::new(publisher.clone()),
            TokenPolicy::from_config(&config.token_policy),
        );

        let state = AppState {
            login_rate_limiter: create_ip_rate_limiter(
                config.rate_limit.login_attempts,
                config.rate_limit.login_window_seconds,
            ),
            password_reset_rate_limiter: create_ip_rate_limiter(
                config.rate_limit.password_reset_attempts,
                config.rate_limit.password_reset_window_seconds,
            ),
            config,
            credentials,
        };

        let router = build_router(state.clone())
            .await
            .expect("Failed to build router");

        TestApp {
            router,
            state,
            store,
            directory,
            publisher,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Router failed to respond");

        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to read response body")
            .to_bytes();

        TestResponse {
            status,
            headers,
            bytes,
        }
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        bearer: Option<&str>,
    ) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = bearer {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        self.send(builder.body(body).expect("Failed to build request"))
            .await
    }

    pub async fn post(&self, uri: &str, body: Value) -> TestResponse {
        self.request(Method::POST, uri, Some(body), None).await
    }

    pub async fn post_with_token(&self, uri: &str, token: &str, body: Value) -> TestResponse {
        self.request(Method::POST, uri, Some(body), Some(token))
            .await
    }

    pub async fn get(&self, uri: &str) -> TestResponse {
        self.request(Method::GET, uri, None, None).await
    }

    /// Log in as the seeded user and return the response JSON.
    pub async fn login(&self) -> Value {
        self.login_as(TEST_EMAIL, TEST_PASSWORD).await
    }

    pub async fn login_as(&self, email: &str, password: &str) -> Value {
        let response = self
            .post(
                "/auth/login",
                serde_json::json!({ "email": email, "password": password }),
            )
            .await;
        assert_eq!(response.status, StatusCode::OK, "login failed: {}", response.text());
        response.json()
    }

    /// Poll the recording publisher until `count` events arrived on `topic`.
    pub async fn wait_for_events(&self, topic: &str, count: usize) -> Vec<PublishedEvent> {
        for _ in 0..100 {
            let events = self.publisher.published_on(topic);
            if events.len() >= count {
                return events;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.publisher.published_on(topic)
    }
}
