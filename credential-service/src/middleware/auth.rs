use axum::{
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::Response,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use service_core::error::AppError;

use crate::{services::AccessTokenClaims, AppState};

/// Require a valid bearer access token and expose its claims to handlers.
///
/// Only the signature and time window are checked here; the directory is not
/// consulted.
pub async fn auth_middleware(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let TypedHeader(Authorization(bearer)) = bearer.ok_or_else(|| {
        AppError::Unauthorized(anyhow::anyhow!(
            "Missing or invalid Authorization header"
        ))
    })?;

    let claims = state
        .credentials
        .codec()
        .verify_access_token(bearer.token())
        .map_err(|_| AppError::Unauthorized(anyhow::anyhow!("Invalid or expired token")))?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

/// Claims of the authenticated caller, inserted by [`auth_middleware`].
pub struct AuthUser(pub AccessTokenClaims);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AccessTokenClaims>()
            .cloned()
            .map(AuthUser)
            .ok_or_else(|| {
                AppError::InternalError(anyhow::anyhow!(
                    "Auth claims missing from request extensions"
                ))
            })
    }
}
