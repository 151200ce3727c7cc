//! Bearer-token extractors.

use super::api_server::AppState;
use crate::domain::entities::Claims;
use crate::domain::value_objects::Role;
use crate::error::AppError;
use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::HeaderMap;

/// Any authenticated caller.
#[derive(Debug, Clone)]
pub struct AuthUser(pub Claims);

/// An authenticated caller holding the `admin` role.
#[derive(Debug, Clone)]
pub struct AdminUser(pub Claims);

/// Pull the token out of `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    let value = headers
        .get(AUTHORIZATION)
        .ok_or_else(|| AppError::unauthorized("Missing Authorization header"))?;

    let value = value
        .to_str()
        .map_err(|_| AppError::unauthorized("Missing token"))?;

    let mut parts = value.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(scheme), Some(token)) if scheme.eq_ignore_ascii_case("bearer") => Ok(token),
        _ => Err(AppError::unauthorized("Missing token")),
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, AppError> {
        let token = bearer_token(&parts.headers)?;
        state.auth.verify(token).map(AuthUser)
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, AppError> {
        let AuthUser(claims) = AuthUser::from_request_parts(parts, state).await?;
        if let Err(e) = claims.require_role(Role::Admin) {
            tracing::warn!("user {} denied admin route", claims.username);
            return Err(e);
        }
        Ok(AdminUser(claims))
    }
}
