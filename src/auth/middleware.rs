use std::sync::Arc;

use axum::{
    Json,
    extract::FromRequestParts,
    http::{HeaderValue, StatusCode, header::AUTHORIZATION, request::Parts},
    response::{IntoResponse, Response},
};
use serde_json::json;

use super::helpers::{Authenticated, TokenValidationError, authenticate, extract_token_from_header};
use crate::authz::Principal;
use crate::server::AppState;
use crate::types::Token;

/// Resolves the caller when credentials are present. Anonymous requests pass
/// through as `None`; bad credentials are still rejected.
pub struct MaybePrincipal(pub Option<Principal>);

/// Extractor that requires a valid session.
pub struct RequirePrincipal {
    pub token: Token,
    pub principal: Principal,
}

#[derive(Debug)]
pub enum AuthError {
    MissingAuth,
    InvalidScheme,
    InvalidToken,
    TokenExpired,
    InternalError,
}

impl AuthError {
    const fn code(&self) -> &'static str {
        match self {
            AuthError::MissingAuth => "authentication_required",
            AuthError::InvalidScheme => "invalid_scheme",
            AuthError::InvalidToken => "invalid_token",
            AuthError::TokenExpired => "token_expired",
            AuthError::InternalError => "internal_error",
        }
    }
}

impl From<TokenValidationError> for AuthError {
    fn from(e: TokenValidationError) -> Self {
        match e {
            TokenValidationError::InvalidScheme => AuthError::InvalidScheme,
            TokenValidationError::InvalidToken => AuthError::InvalidToken,
            TokenValidationError::TokenExpired => AuthError::TokenExpired,
            TokenValidationError::InternalError => AuthError::InternalError,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthError::MissingAuth => (StatusCode::UNAUTHORIZED, "Authentication required"),
            AuthError::InvalidScheme => (StatusCode::UNAUTHORIZED, "Invalid authorization scheme"),
            AuthError::InvalidToken => (StatusCode::UNAUTHORIZED, "Invalid token"),
            AuthError::TokenExpired => (StatusCode::UNAUTHORIZED, "Token expired"),
            AuthError::InternalError => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        };

        let body = json!({
            "data": null,
            "error": { "codes": [self.code()], "message": message },
        });

        let mut response = (status, Json(body)).into_response();

        if status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                "WWW-Authenticate",
                HeaderValue::from_static("Bearer realm=\"concrete\""),
            );
        }

        response
    }
}

impl FromRequestParts<Arc<AppState>> for MaybePrincipal {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let authenticated = extract_and_authenticate(parts, state)?;
        Ok(MaybePrincipal(authenticated.map(|a| a.principal)))
    }
}

impl FromRequestParts<Arc<AppState>> for RequirePrincipal {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let Authenticated { token, principal } =
            extract_and_authenticate(parts, state)?.ok_or(AuthError::MissingAuth)?;
        Ok(RequirePrincipal { token, principal })
    }
}

fn extract_and_authenticate(
    parts: &Parts,
    state: &Arc<AppState>,
) -> Result<Option<Authenticated>, AuthError> {
    let auth_header = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    let Some(raw_token) = extract_token_from_header(auth_header)? else {
        return Ok(None);
    };

    let authenticated = authenticate(
        state.store.as_ref(),
        &raw_token,
        state.auth.grace_period(),
    )?;
    Ok(Some(authenticated))
}
