mod access;
mod auth;
mod models;
mod records;
mod users;

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::{
    Router,
    routing::{delete, get, patch, post, put},
};

use crate::datamodel::{CompiledEntity, EntityKind};
use crate::server::AppState;
use crate::server::response::{ApiError, StoreResultExt};
use crate::types::Operation;

pub fn api_router() -> Router<Arc<AppState>> {
    Router::new()
        // Sessions
        .route("/auth/login", post(auth::login))
        .route("/auth/logout", post(auth::logout))
        // Consumer contract
        .route("/models", get(models::list_models))
        .route("/models/{model}", get(models::get_model))
        // Generic records
        .route("/records/{model}", get(records::list_records))
        .route("/records/{model}", post(records::create_record))
        .route("/records/{model}/{uid}", get(records::get_record))
        .route("/records/{model}/{uid}", patch(records::update_record))
        .route("/records/{model}/{uid}", delete(records::delete_record))
        .route(
            "/records/{model}/{uid}/grants/{kind}/{access}/{grantee}",
            put(records::add_grant),
        )
        .route(
            "/records/{model}/{uid}/grants/{kind}/{access}/{grantee}",
            delete(records::remove_grant),
        )
        // Users
        .route("/users", get(users::list_users))
        .route("/users", post(users::create_user))
        .route("/users/{id}", get(users::get_user))
        .route("/users/{id}", patch(users::update_user))
        .route("/users/{id}/level", patch(users::set_level))
        .route(
            "/users/{id}/dividers/{divider_uid}",
            put(users::add_divider),
        )
        .route(
            "/users/{id}/dividers/{divider_uid}",
            delete(users::revoke_divider),
        )
        // Groups and ACL roles
        .route(
            "/groups/{uid}/members/{user_id}",
            put(access::add_group_member),
        )
        .route(
            "/groups/{uid}/members/{user_id}",
            delete(access::remove_group_member),
        )
        .route("/roles", post(access::create_role))
        .route(
            "/roles/{name}/members/{user_id}",
            put(access::add_role_member),
        )
        .route(
            "/roles/{name}/permissions/{model}/{operation}",
            put(access::bind_permission),
        )
}

/// Looks up a compiled entity served through the generic record endpoints.
/// `User` instances live in the users table and are served under `/users`.
fn record_entity<'a>(state: &'a AppState, model: &str) -> Result<&'a CompiledEntity, ApiError> {
    match state.registry.get(model) {
        Some(entity) if entity.kind != EntityKind::User => Ok(entity),
        _ => Err(ApiError::not_found()),
    }
}

fn user_entity(state: &AppState) -> Result<&CompiledEntity, ApiError> {
    state
        .registry
        .entities()
        .find(|e| e.kind == EntityKind::User)
        .ok_or_else(|| ApiError::internal("User entity missing from registry"))
}

/// Roles bound to `operation` on `entity`. Only consulted when ACL roles are
/// enabled.
fn bound_roles(
    state: &AppState,
    entity: &CompiledEntity,
    operation: Operation,
) -> Result<BTreeSet<String>, ApiError> {
    if !state.auth.acl_roles_enabled {
        return Ok(BTreeSet::new());
    }
    let roles = state
        .store
        .list_bound_roles(&entity.name, operation)
        .api_err("Failed to load bound roles")?;
    Ok(roles.into_iter().collect())
}
