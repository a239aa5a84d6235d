use std::collections::BTreeSet;
use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use super::{bound_roles, user_entity};
use crate::auth::{MaybePrincipal, RequirePrincipal, TokenGenerator};
use crate::authz::Principal;
use crate::error::Error;
use crate::server::AppState;
use crate::server::dto::{
    CreateUserRequest, PaginationParams, SetLevelRequest, UpdateUserRequest, UserResponse,
};
use crate::server::response::{
    ApiError, ApiResponse, DEFAULT_PAGE_SIZE, PaginatedResponse, StoreOptionExt, StoreResultExt,
    paginate,
};
use crate::server::validation::{validate_email, validate_password};
use crate::types::{self, Level, Operation, User, normalize_email};

pub async fn list_users(
    MaybePrincipal(principal): MaybePrincipal,
    State(state): State<Arc<AppState>>,
    Query(params): Query<PaginationParams>,
) -> impl IntoResponse {
    check_user_operation(&state, principal.as_ref(), Operation::Retrieve)?;

    let cursor = params.cursor.as_deref().unwrap_or("");
    let users = state
        .store
        .list_users(cursor, DEFAULT_PAGE_SIZE + 1)
        .api_err("Failed to list users")?;

    let (users, next_cursor, has_more) =
        paginate(users, DEFAULT_PAGE_SIZE as usize, |u| u.id.clone());
    let responses: Vec<UserResponse> = users.into_iter().map(UserResponse::from).collect();

    Ok::<_, ApiError>(Json(PaginatedResponse::new(
        responses,
        next_cursor,
        has_more,
    )))
}

pub async fn get_user(
    MaybePrincipal(principal): MaybePrincipal,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    check_user_operation(&state, principal.as_ref(), Operation::Retrieve)?;

    let user = state
        .store
        .get_user(&id)
        .api_err("Failed to get user")?
        .or_not_found()?;

    Ok::<_, ApiError>(Json(ApiResponse::success(UserResponse::from(user))))
}

pub async fn create_user(
    RequirePrincipal { principal, .. }: RequirePrincipal,
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateUserRequest>,
) -> impl IntoResponse {
    check_user_operation(&state, Some(&principal), Operation::Create)?;
    validate_email(&req.email)?;
    validate_password(&req.password)?;

    let entity = user_entity(&state)?;
    let now = Utc::now();
    let data = entity.materialize(&req.data, now)?;

    let password_hash = TokenGenerator::for_passwords()
        .hash(&req.password)
        .api_err("Failed to hash password")?;

    let mut user = User {
        id: Uuid::new_v4().to_string(),
        email: normalize_email(&req.email),
        password_hash,
        first_name: req.first_name,
        last_name: req.last_name,
        flags: Level::SimpleUser.flags(),
        password_modification_date: now,
        unsubscribe_all: false,
        data,
        created_at: now,
        updated_at: now,
    };

    if let Some(level) = req.level.as_deref().and_then(Level::parse) {
        state.authorizer.check_elevation(&principal, &user, level)?;
        user.flags = level.flags();
    }

    state.store.create_user(&user).map_err(|e| match e {
        Error::AlreadyExists => ApiError::conflict("A user with this email already exists"),
        other => ApiError::from(other),
    })?;
    info!(user = %user.id, level = %user.level(), "User created");

    Ok::<_, ApiError>((
        StatusCode::CREATED,
        Json(ApiResponse::success(UserResponse::from(user))),
    ))
}

/// Users may edit their own profile. Editing someone else needs the `User`
/// update level and may not reach a user above the caller.
pub async fn update_user(
    RequirePrincipal { principal, .. }: RequirePrincipal,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<UpdateUserRequest>,
) -> impl IntoResponse {
    let mut user = state
        .store
        .get_user(&id)
        .api_err("Failed to get user")?
        .or_not_found()?;

    if user.id != principal.id() {
        check_user_operation(&state, Some(&principal), Operation::Update)?;
        state
            .authorizer
            .check_elevation(&principal, &user, user.level())?;
    }

    let entity = user_entity(&state)?;
    entity.check_patch(&req.data)?;

    let now = Utc::now();
    if let Some(password) = req.password.as_deref() {
        validate_password(password)?;
        user.password_hash = TokenGenerator::for_passwords()
            .hash(password)
            .api_err("Failed to hash password")?;
        user.password_modification_date = now;
    }
    if let Some(first_name) = req.first_name {
        user.first_name = first_name;
    }
    if let Some(last_name) = req.last_name {
        user.last_name = last_name;
    }
    if let Some(unsubscribe_all) = req.unsubscribe_all {
        user.unsubscribe_all = unsubscribe_all;
    }
    user.data.extend(req.data);
    user.updated_at = now;

    state.store.update_user(&user).map_err(ApiError::from)?;
    info!(user = %user.id, by = %principal.id(), "User updated");

    Ok::<_, ApiError>(Json(ApiResponse::success(UserResponse::from(user))))
}

/// Changes a user's level under the elevation ceiling. Unknown level names
/// leave the flags unchanged.
pub async fn set_level(
    RequirePrincipal { principal, .. }: RequirePrincipal,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<SetLevelRequest>,
) -> impl IntoResponse {
    check_user_operation(&state, Some(&principal), Operation::Update)?;

    let authorizer = &state.authorizer;
    let user = state
        .store
        .update_user_flags(&id, &|target: &User| {
            let flags = types::set_level(target.flags, &req.level);
            authorizer.check_elevation(&principal, target, flags.level())?;
            Ok(flags)
        })
        .map_err(ApiError::from)?;

    info!(
        user = %user.id,
        level = %user.level(),
        by = %principal.id(),
        "Level changed"
    );

    Ok::<_, ApiError>(Json(ApiResponse::success(UserResponse::from(user))))
}

pub async fn add_divider(
    RequirePrincipal { principal, .. }: RequirePrincipal,
    State(state): State<Arc<AppState>>,
    Path((id, divider_uid)): Path<(String, String)>,
) -> impl IntoResponse {
    require_admin(&principal)?;

    state
        .store
        .get_user(&id)
        .api_err("Failed to get user")?
        .or_not_found()?;
    state
        .store
        .get_record(state.registry.divider_name(), &divider_uid)
        .api_err("Failed to get divider")?
        .or_not_found()?;

    state
        .store
        .add_user_divider(&id, &divider_uid)
        .map_err(ApiError::from)?;
    info!(user = %id, divider = %divider_uid, "Divider membership added");

    Ok::<_, ApiError>(StatusCode::NO_CONTENT)
}

/// Removes the membership and the user's grants on instances of that
/// divider in one transaction.
pub async fn revoke_divider(
    RequirePrincipal { principal, .. }: RequirePrincipal,
    State(state): State<Arc<AppState>>,
    Path((id, divider_uid)): Path<(String, String)>,
) -> impl IntoResponse {
    require_admin(&principal)?;

    let removed = state
        .store
        .revoke_user_divider(&id, &divider_uid)
        .api_err("Failed to revoke divider membership")?;
    if !removed {
        return Err(ApiError::not_found());
    }
    info!(user = %id, divider = %divider_uid, "Divider membership revoked");

    Ok::<_, ApiError>(StatusCode::NO_CONTENT)
}

fn check_user_operation(
    state: &AppState,
    principal: Option<&Principal>,
    operation: Operation,
) -> Result<(), ApiError> {
    let entity = user_entity(state)?;
    let roles: BTreeSet<String> = bound_roles(state, entity, operation)?;
    state
        .authorizer
        .check_operation(principal, entity, operation, &roles)?;
    Ok(())
}

pub(super) fn require_admin(principal: &Principal) -> Result<(), ApiError> {
    if principal.level() < Level::Admin {
        return Err(ApiError::forbidden("Admin access required"));
    }
    Ok(())
}
