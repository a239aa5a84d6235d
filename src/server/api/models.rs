use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};

use crate::auth::RequirePrincipal;
use crate::server::AppState;
use crate::server::dto::ModelSummary;
use crate::server::response::{ApiError, ApiResponse};

pub async fn list_models(
    _session: RequirePrincipal,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let models: Vec<ModelSummary> = state.registry.entities().map(ModelSummary::from).collect();
    Json(ApiResponse::success(models))
}

/// Field list, minimum levels, divider linkage and resource-query defaults.
pub async fn get_model(
    _session: RequirePrincipal,
    State(state): State<Arc<AppState>>,
    Path(model): Path<String>,
) -> impl IntoResponse {
    let entity = state.registry.get(&model).ok_or_else(ApiError::not_found)?;
    Ok::<_, ApiError>(Json(ApiResponse::success(entity.clone())))
}
