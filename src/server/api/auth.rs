use std::sync::Arc;

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};

use crate::auth::{self, RequirePrincipal};
use crate::server::AppState;
use crate::server::dto::{LoginRequest, LoginResponse};
use crate::server::response::{ApiError, ApiResponse};

pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> impl IntoResponse {
    let session = auth::login(state.store.as_ref(), &state.auth, &req.email, &req.password)
        .map_err(ApiError::from)?;

    Ok::<_, ApiError>((
        StatusCode::CREATED,
        Json(ApiResponse::success(LoginResponse {
            token: session.raw_token,
            expiration_date: session.token.expiration_date,
            user: session.user.into(),
        })),
    ))
}

pub async fn logout(
    session: RequirePrincipal,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    auth::logout(state.store.as_ref(), &session.token).map_err(ApiError::from)?;
    Ok::<_, ApiError>(StatusCode::NO_CONTENT)
}
