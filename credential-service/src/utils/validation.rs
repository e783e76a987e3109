use axum::{
    extract::{FromRequest, FromRequestParts, Query, Request},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::de::DeserializeOwned;
use validator::{Validate, ValidationErrors};

use crate::dtos::ErrorResponse;

/// JSON body that must also pass its `validator` rules.
pub struct ValidatedJson<T>(pub T);

/// Query string that must also pass its `validator` rules.
pub struct ValidatedQuery<T>(pub T);

fn reject(status: StatusCode, error: String) -> Response {
    (status, Json(ErrorResponse { error })).into_response()
}

fn check<T: Validate>(value: &T) -> Result<(), Response> {
    value.validate().map_err(|e: ValidationErrors| {
        reject(
            StatusCode::UNPROCESSABLE_ENTITY,
            format!("Validation error: {}", e),
        )
    })
}

#[axum::async_trait]
impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate + 'static,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e| reject(e.status(), format!("Json parse error: {}", e.body_text())))?;

        check(&value)?;
        Ok(ValidatedJson(value))
    }
}

#[axum::async_trait]
impl<T, S> FromRequestParts<S> for ValidatedQuery<T>
where
    T: DeserializeOwned + Validate + 'static,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state)
            .await
            .map_err(|e| reject(e.status(), format!("Query parse error: {}", e.body_text())))?;

        check(&value)?;
        Ok(ValidatedQuery(value))
    }
}
