use service_core::{
    axum::{extract::State, http::StatusCode, response::IntoResponse, Json},
    error::AppError,
};

use crate::{
    dtos::{
        auth::{VerifyEmailRequest, VerifyEmailResponse},
        MessageResponse,
    },
    middleware::AuthUser,
    services::metrics::track,
    utils::ValidatedJson,
    AppState,
};

/// Send a verification email to the caller's address
#[utoipa::path(
    post,
    path = "/auth/verification/send",
    responses(
        (status = 200, description = "Verification email queued", body = MessageResponse),
        (status = 401, description = "Invalid access token", body = ErrorResponse),
        (status = 404, description = "User not found", body = ErrorResponse)
    ),
    tag = "Verification",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn send_verification(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let claims = user.0;
    track(
        "send_verification_email",
        state
            .credentials
            .send_verification_email(claims.user_id, &claims.email)
            .await,
    )?;
    Ok((
        StatusCode::OK,
        Json(MessageResponse::new("Verification email sent")),
    ))
}

/// Confirm an email address with a verification token
#[utoipa::path(
    post,
    path = "/auth/verification/verify",
    request_body = VerifyEmailRequest,
    responses(
        (status = 200, description = "Email verified", body = VerifyEmailResponse),
        (status = 400, description = "Invalid or expired token", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse)
    ),
    tag = "Verification"
)]
pub async fn verify_email(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<VerifyEmailRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = track("verify_email", state.credentials.verify_email(&req.token).await)?;
    Ok((
        StatusCode::OK,
        Json(VerifyEmailResponse {
            user_id,
            message: "Email verified successfully".to_string(),
        }),
    ))
}
