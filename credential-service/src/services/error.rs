use service_core::error::AppError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("User account is blocked")]
    AccountBlocked,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token has been revoked")]
    TokenRevoked,

    #[error("Token has expired")]
    TokenExpired,

    #[error("Invalid or expired token")]
    InvalidOrExpiredToken,

    #[error("User not found")]
    UserNotFound,

    #[error("Dependency failure: {0}")]
    DependencyFailure(anyhow::Error),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ServiceError {
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        ServiceError::InvalidRequest(msg.into())
    }

    /// Stable label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::InvalidRequest(_) => "invalid_request",
            ServiceError::InvalidCredentials => "invalid_credentials",
            ServiceError::AccountBlocked => "account_blocked",
            ServiceError::InvalidToken => "invalid_token",
            ServiceError::TokenRevoked => "token_revoked",
            ServiceError::TokenExpired => "token_expired",
            ServiceError::InvalidOrExpiredToken => "invalid_or_expired_token",
            ServiceError::UserNotFound => "user_not_found",
            ServiceError::DependencyFailure(_) => "dependency_failure",
            ServiceError::Internal(_) => "internal",
        }
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        let message = err.to_string();
        match err {
            ServiceError::InvalidRequest(msg) => AppError::BadRequest(anyhow::anyhow!(msg)),
            ServiceError::InvalidCredentials
            | ServiceError::InvalidToken
            | ServiceError::TokenRevoked
            | ServiceError::TokenExpired => AppError::Unauthorized(anyhow::anyhow!(message)),
            ServiceError::AccountBlocked => AppError::Forbidden(anyhow::anyhow!(message)),
            ServiceError::InvalidOrExpiredToken => AppError::BadRequest(anyhow::anyhow!(message)),
            ServiceError::UserNotFound => AppError::NotFound(anyhow::anyhow!(message)),
            ServiceError::DependencyFailure(e) => AppError::ServiceUnavailable(e),
            ServiceError::Internal(e) => AppError::InternalError(e),
        }
    }
}
