use service_core::{
    axum::{extract::State, http::StatusCode, response::IntoResponse, Json},
    error::AppError,
};

use crate::{
    dtos::{
        auth::{
            LoginRequest, LoginResponse, LogoutRequest, RefreshRequest, TokenResponse,
            ValidateRequest, ValidateResponse,
        },
        MessageResponse,
    },
    middleware::AuthUser,
    services::{metrics::track, ServiceError},
    utils::ValidatedJson,
    AppState,
};

/// Login with email and password
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = LoginResponse),
        (status = 401, description = "Invalid credentials", body = ErrorResponse),
        (status = 403, description = "Account blocked", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse),
        (status = 429, description = "Too many attempts", body = ErrorResponse),
        (status = 503, description = "User directory unavailable", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn login(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let result = track(
        "login",
        state.credentials.login(&req.email, &req.password).await,
    )?;
    Ok((StatusCode::OK, Json(LoginResponse::from(result))))
}

/// Exchange a refresh token for a new token pair
#[utoipa::path(
    post,
    path = "/auth/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Tokens rotated", body = TokenResponse),
        (status = 400, description = "Missing refresh token", body = ErrorResponse),
        (status = 401, description = "Refresh token invalid, revoked or expired", body = ErrorResponse),
        (status = 404, description = "User no longer exists", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn refresh(
    State(state): State<AppState>,
    Json(req): Json<RefreshRequest>,
) -> Result<impl IntoResponse, AppError> {
    let pair = track(
        "refresh",
        state.credentials.refresh_token(&req.refresh_token).await,
    )?;
    Ok((StatusCode::OK, Json(TokenResponse::from(pair))))
}

/// Check an access token against the signing key and the user directory
///
/// Invalid tokens answer `200` with `valid: false`.
#[utoipa::path(
    post,
    path = "/auth/validate",
    request_body = ValidateRequest,
    responses(
        (status = 200, description = "Validation result", body = ValidateResponse),
        (status = 400, description = "Missing access token", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn validate(
    State(state): State<AppState>,
    Json(req): Json<ValidateRequest>,
) -> Result<impl IntoResponse, AppError> {
    let result = track(
        "validate",
        state.credentials.validate_token(&req.access_token).await,
    );

    let body = match result {
        Ok(user) => ValidateResponse::from(user),
        Err(e @ ServiceError::InvalidRequest(_)) => return Err(e.into()),
        Err(e) => {
            tracing::debug!(reason = e.kind(), "Access token rejected");
            ValidateResponse::invalid()
        }
    };
    Ok((StatusCode::OK, Json(body)))
}

/// Revoke a refresh token
#[utoipa::path(
    post,
    path = "/auth/logout",
    request_body = LogoutRequest,
    responses(
        (status = 200, description = "Logged out successfully", body = MessageResponse),
        (status = 400, description = "Missing refresh token", body = ErrorResponse),
        (status = 401, description = "Invalid access token", body = ErrorResponse)
    ),
    tag = "Authentication",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn logout(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<LogoutRequest>,
) -> Result<impl IntoResponse, AppError> {
    track(
        "logout",
        state
            .credentials
            .logout(&req.refresh_token, user.0.user_id)
            .await,
    )?;
    Ok((
        StatusCode::OK,
        Json(MessageResponse::new("Logged out successfully")),
    ))
}
