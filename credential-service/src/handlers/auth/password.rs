use service_core::{
    axum::{extract::State, http::StatusCode, response::IntoResponse, Json},
    error::AppError,
};

use crate::{
    dtos::{
        auth::{
            ChangePasswordRequest, ForgotPasswordRequest, ResetPasswordRequest,
            VerifyResetTokenQuery, VerifyResetTokenResponse,
        },
        MessageResponse,
    },
    middleware::AuthUser,
    services::metrics::track,
    utils::{ValidatedJson, ValidatedQuery},
    AppState,
};

const FORGOT_PASSWORD_MESSAGE: &str =
    "If an account exists for that email, a password reset link has been sent";

/// Change the caller's password and sign out every session
#[utoipa::path(
    post,
    path = "/auth/password/change",
    request_body = ChangePasswordRequest,
    responses(
        (status = 200, description = "Password changed", body = MessageResponse),
        (status = 401, description = "Old password incorrect or token invalid", body = ErrorResponse),
        (status = 404, description = "User not found", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse)
    ),
    tag = "Password",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn change_password(
    State(state): State<AppState>,
    user: AuthUser,
    ValidatedJson(req): ValidatedJson<ChangePasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    track(
        "change_password",
        state
            .credentials
            .change_password(user.0.user_id, &req.old_password, &req.new_password)
            .await,
    )?;
    Ok((
        StatusCode::OK,
        Json(MessageResponse::new("Password changed successfully")),
    ))
}

/// Request a password reset email
///
/// The response is the same whether or not the account exists.
#[utoipa::path(
    post,
    path = "/auth/password/forgot",
    request_body = ForgotPasswordRequest,
    responses(
        (status = 200, description = "Request accepted", body = MessageResponse),
        (status = 422, description = "Validation error", body = ErrorResponse),
        (status = 429, description = "Too many attempts", body = ErrorResponse)
    ),
    tag = "Password"
)]
pub async fn forgot_password(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<ForgotPasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    track(
        "forgot_password",
        state.credentials.forgot_password(&req.email).await,
    )?;
    Ok((
        StatusCode::OK,
        Json(MessageResponse::new(FORGOT_PASSWORD_MESSAGE)),
    ))
}

/// Set a new password with a reset token
#[utoipa::path(
    post,
    path = "/auth/password/reset",
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Password reset", body = MessageResponse),
        (status = 400, description = "Invalid or expired token", body = ErrorResponse),
        (status = 404, description = "User not found", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse)
    ),
    tag = "Password"
)]
pub async fn reset_password(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<ResetPasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    track(
        "reset_password",
        state
            .credentials
            .reset_password(&req.token, &req.new_password)
            .await,
    )?;
    Ok((
        StatusCode::OK,
        Json(MessageResponse::new("Password has been reset successfully")),
    ))
}

/// Check a reset token without consuming it
#[utoipa::path(
    get,
    path = "/auth/password/reset/verify",
    params(VerifyResetTokenQuery),
    responses(
        (status = 200, description = "Token is valid", body = VerifyResetTokenResponse),
        (status = 400, description = "Invalid or expired token", body = ErrorResponse)
    ),
    tag = "Password"
)]
pub async fn verify_reset_token(
    State(state): State<AppState>,
    ValidatedQuery(query): ValidatedQuery<VerifyResetTokenQuery>,
) -> Result<impl IntoResponse, AppError> {
    let email = track(
        "verify_reset_token",
        state.credentials.verify_reset_token(&query.token).await,
    )?;
    Ok((
        StatusCode::OK,
        Json(VerifyResetTokenResponse { valid: true, email }),
    ))
}
