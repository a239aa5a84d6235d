//! Group membership and ACL roles.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use super::users::require_admin;
use crate::auth::RequirePrincipal;
use crate::authz::Principal;
use crate::datamodel::EntityKind;
use crate::error::Error;
use crate::server::AppState;
use crate::server::dto::CreateRoleRequest;
use crate::server::response::{ApiError, ApiResponse, StoreOptionExt, StoreResultExt};
use crate::server::validation::validate_role_name;
use crate::types::{Level, ModelPermission, Operation, Role};

pub async fn add_group_member(
    RequirePrincipal { principal, .. }: RequirePrincipal,
    State(state): State<Arc<AppState>>,
    Path((uid, user_id)): Path<(String, String)>,
) -> impl IntoResponse {
    require_admin(&principal)?;
    check_group_exists(&state, &uid)?;

    state
        .store
        .add_group_member(&uid, &user_id)
        .map_err(ApiError::from)?;
    info!(group = %uid, user = %user_id, "Group member added");

    Ok::<_, ApiError>(StatusCode::NO_CONTENT)
}

pub async fn remove_group_member(
    RequirePrincipal { principal, .. }: RequirePrincipal,
    State(state): State<Arc<AppState>>,
    Path((uid, user_id)): Path<(String, String)>,
) -> impl IntoResponse {
    require_admin(&principal)?;

    let removed = state
        .store
        .remove_group_member(&uid, &user_id)
        .api_err("Failed to remove group member")?;
    if !removed {
        return Err(ApiError::not_found());
    }

    Ok::<_, ApiError>(StatusCode::NO_CONTENT)
}

pub async fn create_role(
    RequirePrincipal { principal, .. }: RequirePrincipal,
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateRoleRequest>,
) -> impl IntoResponse {
    require_superuser(&principal)?;
    validate_role_name(&req.name)?;

    let role = Role {
        id: Uuid::new_v4().to_string(),
        name: req.name,
        created_at: Utc::now(),
    };

    state.store.create_role(&role).map_err(|e| match e {
        Error::AlreadyExists => ApiError::conflict("Role already exists"),
        other => ApiError::from(other),
    })?;
    info!(role = %role.name, "Role created");

    Ok::<_, ApiError>((StatusCode::CREATED, Json(ApiResponse::success(role))))
}

pub async fn add_role_member(
    RequirePrincipal { principal, .. }: RequirePrincipal,
    State(state): State<Arc<AppState>>,
    Path((name, user_id)): Path<(String, String)>,
) -> impl IntoResponse {
    require_superuser(&principal)?;

    let role = state
        .store
        .get_role_by_name(&name)
        .api_err("Failed to get role")?
        .or_not_found()?;

    state
        .store
        .add_role_member(&role.id, &user_id)
        .map_err(ApiError::from)?;
    info!(role = %role.name, user = %user_id, "Role member added");

    Ok::<_, ApiError>(StatusCode::NO_CONTENT)
}

/// Binds a role to one operation on one model.
pub async fn bind_permission(
    RequirePrincipal { principal, .. }: RequirePrincipal,
    State(state): State<Arc<AppState>>,
    Path((name, model, operation)): Path<(String, String, String)>,
) -> impl IntoResponse {
    require_superuser(&principal)?;

    let operation = Operation::parse(&operation)
        .ok_or_else(|| ApiError::bad_request(format!("Unknown operation '{operation}'")))?;
    let entity = state.registry.get(&model).ok_or_else(ApiError::not_found)?;
    let role = state
        .store
        .get_role_by_name(&name)
        .api_err("Failed to get role")?
        .or_not_found()?;

    state
        .store
        .bind_model_permission(&ModelPermission {
            model: entity.name.clone(),
            operation,
            role_id: role.id.clone(),
        })
        .map_err(ApiError::from)?;
    info!(role = %role.name, model = %entity.name, operation = %operation, "Permission bound");

    Ok::<_, ApiError>(StatusCode::NO_CONTENT)
}

fn require_superuser(principal: &Principal) -> Result<(), ApiError> {
    if principal.level() < Level::Superuser {
        return Err(ApiError::forbidden("Superuser access required"));
    }
    Ok(())
}

fn check_group_exists(state: &AppState, uid: &str) -> Result<(), ApiError> {
    let group = state
        .registry
        .entities()
        .find(|e| e.kind == EntityKind::Group)
        .ok_or_else(|| ApiError::internal("Group entity missing from registry"))?;
    state
        .store
        .get_record(&group.name, uid)
        .api_err("Failed to get group")?
        .or_not_found()?;
    Ok(())
}
