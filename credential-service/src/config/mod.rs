use secrecy::{ExposeSecret, SecretString};
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct CredentialConfig {
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub jwt: JwtConfig,
    pub token_policy: TokenPolicyConfig,
    pub user_directory: UserDirectoryConfig,
    pub security: SecurityConfig,
    pub rate_limit: RateLimitConfig,
    /// Seconds between expired-token sweeps; 0 disables the sweeper.
    pub sweep_interval_seconds: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: SecretString,
    pub access_token_expiry_minutes: i64,
    pub refresh_token_expiry_days: i64,
}

#[derive(Debug, Clone)]
pub struct TokenPolicyConfig {
    pub password_reset_expiry_minutes: i64,
    pub email_verification_expiry_hours: i64,
    pub password_hash_cost: u32,
}

#[derive(Debug, Clone)]
pub struct UserDirectoryConfig {
    pub base_url: String,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub login_attempts: u32,
    pub login_window_seconds: u64,
    pub password_reset_attempts: u32,
    pub password_reset_window_seconds: u64,
}

const MIN_PROD_SECRET_LEN: usize = 32;

impl CredentialConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let environment: Environment = env::var("ENVIRONMENT")
            .unwrap_or_else(|_| "dev".to_string())
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let config = CredentialConfig {
            common: common_config,
            environment,
            service_name: get_env("SERVICE_NAME", Some("credential-service"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|v| !v.is_empty()),
            database: DatabaseConfig {
                url: get_env("DATABASE_URL", None, is_prod)?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", "10", is_prod)?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", "1", is_prod)?,
            },
            redis: RedisConfig {
                url: get_env("REDIS_URL", Some("redis://127.0.0.1:6379"), is_prod)?,
            },
            jwt: JwtConfig {
                secret: SecretString::new(get_env("JWT_SECRET", None, is_prod)?),
                access_token_expiry_minutes: parse_env(
                    "JWT_ACCESS_TOKEN_EXPIRY_MINUTES",
                    "60",
                    is_prod,
                )?,
                refresh_token_expiry_days: parse_env("JWT_REFRESH_TOKEN_EXPIRY_DAYS", "7", is_prod)?,
            },
            token_policy: TokenPolicyConfig {
                password_reset_expiry_minutes: parse_env(
                    "PASSWORD_RESET_TOKEN_EXPIRY_MINUTES",
                    "60",
                    is_prod,
                )?,
                email_verification_expiry_hours: parse_env(
                    "EMAIL_VERIFICATION_TOKEN_EXPIRY_HOURS",
                    "24",
                    is_prod,
                )?,
                password_hash_cost: parse_env(
                    "PASSWORD_HASH_COST",
                    &bcrypt::DEFAULT_COST.to_string(),
                    false,
                )?,
            },
            user_directory: UserDirectoryConfig {
                base_url: get_env("USER_DIRECTORY_URL", Some("http://localhost:8081"), is_prod)?,
                timeout_seconds: parse_env("USER_DIRECTORY_TIMEOUT_SECONDS", "5", is_prod)?,
            },
            security: SecurityConfig {
                allowed_origins: get_env(
                    "ALLOWED_ORIGINS",
                    Some("http://localhost:3000"),
                    is_prod,
                )?
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            },
            rate_limit: RateLimitConfig {
                login_attempts: parse_env("RATE_LIMIT_LOGIN_ATTEMPTS", "5", is_prod)?,
                login_window_seconds: parse_env("RATE_LIMIT_LOGIN_WINDOW_SECONDS", "900", is_prod)?,
                password_reset_attempts: parse_env(
                    "RATE_LIMIT_PASSWORD_RESET_ATTEMPTS",
                    "3",
                    is_prod,
                )?,
                password_reset_window_seconds: parse_env(
                    "RATE_LIMIT_PASSWORD_RESET_WINDOW_SECONDS",
                    "3600",
                    is_prod,
                )?,
            },
            sweep_interval_seconds: parse_env("TOKEN_SWEEP_INTERVAL_SECONDS", "3600", false)?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(config_error("PORT must be greater than 0"));
        }

        let access_minutes = self.jwt.access_token_expiry_minutes;
        let refresh_minutes = self.jwt.refresh_token_expiry_days.saturating_mul(24 * 60);
        let reset_minutes = self.token_policy.password_reset_expiry_minutes;
        let verification_minutes = self
            .token_policy
            .email_verification_expiry_hours
            .saturating_mul(60);

        if access_minutes <= 0 || refresh_minutes <= 0 {
            return Err(config_error("JWT token lifetimes must be positive"));
        }

        if reset_minutes <= 0 || verification_minutes <= 0 {
            return Err(config_error("One-time token lifetimes must be positive"));
        }

        if access_minutes >= refresh_minutes {
            return Err(config_error(
                "JWT_ACCESS_TOKEN_EXPIRY_MINUTES must be shorter than the refresh token lifetime",
            ));
        }

        if reset_minutes >= verification_minutes {
            return Err(config_error(
                "PASSWORD_RESET_TOKEN_EXPIRY_MINUTES must be shorter than the email verification lifetime",
            ));
        }

        if !(4..=31).contains(&self.token_policy.password_hash_cost) {
            return Err(config_error("PASSWORD_HASH_COST must be between 4 and 31"));
        }

        if self.jwt.secret.expose_secret().is_empty() {
            return Err(config_error("JWT_SECRET must not be empty"));
        }

        if self.environment == Environment::Prod {
            if self.jwt.secret.expose_secret().len() < MIN_PROD_SECRET_LEN {
                return Err(config_error(
                    "JWT_SECRET must be at least 32 bytes in production",
                ));
            }

            if self.security.allowed_origins.iter().any(|o| o == "*") {
                return Err(config_error(
                    "Wildcard CORS origin not allowed in production",
                ));
            }
        }

        Ok(())
    }
}

fn config_error(msg: &str) -> AppError {
    AppError::ConfigError(anyhow::anyhow!(msg.to_string()))
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: &str, is_prod: bool) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default), is_prod)?
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("Invalid {}: {}", key, e)))
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}
