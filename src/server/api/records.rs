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

use super::{bound_roles, record_entity};
use crate::auth::MaybePrincipal;
use crate::authz::{InstanceView, Principal};
use crate::datamodel::{CompiledEntity, EntityKind};
use crate::server::AppState;
use crate::server::dto::{CreateRecordRequest, PaginationParams, UpdateRecordRequest};
use crate::server::response::{
    ApiError, ApiResponse, DEFAULT_PAGE_SIZE, PaginatedResponse, StoreOptionExt, StoreResultExt,
    paginate,
};
use crate::types::{GrantAccess, GranteeKind, Operation, Record, RecordGrants};

pub async fn list_records(
    MaybePrincipal(principal): MaybePrincipal,
    State(state): State<Arc<AppState>>,
    Path(model): Path<String>,
    Query(params): Query<PaginationParams>,
) -> impl IntoResponse {
    let entity = record_entity(&state, &model)?;
    let roles = bound_roles(&state, entity, Operation::Retrieve)?;
    state
        .authorizer
        .check_operation(principal.as_ref(), entity, Operation::Retrieve, &roles)?;

    let scope = state.authorizer.retrieval_scope(principal.as_ref(), entity);
    let page = DEFAULT_PAGE_SIZE as usize;

    // Out-of-scope rows are skipped, so keep reading until a full page
    // (plus one to detect more) is visible or the table is exhausted.
    let mut cursor = params.cursor.unwrap_or_default();
    let mut visible = Vec::new();
    loop {
        let batch = state
            .store
            .list_records(&entity.name, &cursor, DEFAULT_PAGE_SIZE + 1)
            .api_err("Failed to list records")?;
        let exhausted = batch.len() <= page;
        if let Some(last) = batch.last() {
            cursor = last.uid.clone();
        }
        visible.extend(
            batch
                .into_iter()
                .filter(|r| scope.admits(InstanceView::from(r))),
        );
        if exhausted || visible.len() > page {
            break;
        }
    }

    let (records, next_cursor, has_more) = paginate(visible, page, |r| r.uid.clone());

    Ok::<_, ApiError>(Json(PaginatedResponse::new(records, next_cursor, has_more)))
}

pub async fn get_record(
    MaybePrincipal(principal): MaybePrincipal,
    State(state): State<Arc<AppState>>,
    Path((model, uid)): Path<(String, String)>,
) -> impl IntoResponse {
    let entity = record_entity(&state, &model)?;
    let record = load_authorized(&state, principal.as_ref(), entity, Operation::Retrieve, &uid)?;
    Ok::<_, ApiError>(Json(ApiResponse::success(record)))
}

pub async fn create_record(
    MaybePrincipal(principal): MaybePrincipal,
    State(state): State<Arc<AppState>>,
    Path(model): Path<String>,
    Json(req): Json<CreateRecordRequest>,
) -> impl IntoResponse {
    let entity = record_entity(&state, &model)?;
    let roles = bound_roles(&state, entity, Operation::Create)?;
    state
        .authorizer
        .check_operation(principal.as_ref(), entity, Operation::Create, &roles)?;

    let divider = if entity.is_scoped() {
        let divider = req.divider.or_else(|| {
            principal
                .as_ref()
                .filter(|p| p.dividers.len() == 1)
                .and_then(|p| p.dividers.first().cloned())
        });
        state
            .authorizer
            .check_create_scope(principal.as_ref(), entity, divider.as_deref())?;
        if let Some(uid) = &divider {
            check_divider_exists(&state, uid)?;
        }
        divider
    } else if req.divider.is_some() {
        return Err(ApiError::bad_request(format!(
            "{} instances are not divided",
            entity.name
        )));
    } else {
        None
    };

    check_grantees(&state, &req.grants)?;
    let now = Utc::now();
    let data = entity.materialize(&req.data, now)?;

    let record = Record {
        uid: Uuid::new_v4().to_string(),
        entity: entity.name.clone(),
        divider,
        public: req.public.unwrap_or(entity.default_public),
        additional_filtering: req.additional_filtering,
        data,
        grants: req.grants,
        creation_date: now,
        modification_date: now,
    };

    state.store.create_record(&record).map_err(ApiError::from)?;
    info!(entity = %entity.name, uid = %record.uid, "Record created");

    Ok::<_, ApiError>((StatusCode::CREATED, Json(ApiResponse::success(record))))
}

pub async fn update_record(
    MaybePrincipal(principal): MaybePrincipal,
    State(state): State<Arc<AppState>>,
    Path((model, uid)): Path<(String, String)>,
    Json(req): Json<UpdateRecordRequest>,
) -> impl IntoResponse {
    let entity = record_entity(&state, &model)?;
    let mut record = load_authorized(&state, principal.as_ref(), entity, Operation::Update, &uid)?;

    entity.check_patch(&req.data)?;

    if let Some(divider) = req.divider {
        if !entity.is_scoped() {
            return Err(ApiError::bad_request(format!(
                "{} instances are not divided",
                entity.name
            )));
        }
        state
            .authorizer
            .check_create_scope(principal.as_ref(), entity, Some(&divider))?;
        check_divider_exists(&state, &divider)?;
        record.divider = Some(divider);
    }
    if let Some(public) = req.public {
        record.public = public;
    }
    if let Some(additional_filtering) = req.additional_filtering {
        record.additional_filtering = additional_filtering;
    }
    if let Some(grants) = req.grants {
        check_grantees(&state, &grants)?;
        record.grants = grants;
    }
    record.data.extend(req.data);
    record.modification_date = Utc::now();

    state.store.update_record(&record).map_err(ApiError::from)?;

    Ok::<_, ApiError>(Json(ApiResponse::success(record)))
}

pub async fn delete_record(
    MaybePrincipal(principal): MaybePrincipal,
    State(state): State<Arc<AppState>>,
    Path((model, uid)): Path<(String, String)>,
) -> impl IntoResponse {
    let entity = record_entity(&state, &model)?;
    let record = load_authorized(&state, principal.as_ref(), entity, Operation::Delete, &uid)?;

    state
        .store
        .delete_record(&entity.name, &record.uid)
        .api_err("Failed to delete record")?;
    info!(entity = %entity.name, uid = %record.uid, "Record deleted");

    Ok::<_, ApiError>(StatusCode::NO_CONTENT)
}

/// Grants are managed by anyone allowed to update the instance.
pub async fn add_grant(
    MaybePrincipal(principal): MaybePrincipal,
    State(state): State<Arc<AppState>>,
    Path((model, uid, kind, access, grantee)): Path<(String, String, String, String, String)>,
) -> impl IntoResponse {
    let entity = record_entity(&state, &model)?;
    let (kind, access) = parse_grant(entity, &kind, &access)?;
    let record = load_authorized(&state, principal.as_ref(), entity, Operation::Update, &uid)?;
    check_grantee_exists(&state, kind, &grantee)?;

    state
        .store
        .set_record_grant(&record.uid, kind, access, &grantee)
        .map_err(ApiError::from)?;
    info!(
        entity = %entity.name,
        uid = %record.uid,
        kind = kind.as_str(),
        access = access.as_str(),
        grantee = %grantee,
        "Grant added"
    );

    Ok::<_, ApiError>(StatusCode::NO_CONTENT)
}

pub async fn remove_grant(
    MaybePrincipal(principal): MaybePrincipal,
    State(state): State<Arc<AppState>>,
    Path((model, uid, kind, access, grantee)): Path<(String, String, String, String, String)>,
) -> impl IntoResponse {
    let entity = record_entity(&state, &model)?;
    let (kind, access) = parse_grant(entity, &kind, &access)?;
    let record = load_authorized(&state, principal.as_ref(), entity, Operation::Update, &uid)?;

    let removed = state
        .store
        .remove_record_grant(&record.uid, kind, access, &grantee)
        .api_err("Failed to remove grant")?;
    if !removed {
        return Err(ApiError::not_found());
    }

    Ok::<_, ApiError>(StatusCode::NO_CONTENT)
}

fn parse_grant(
    entity: &CompiledEntity,
    kind: &str,
    access: &str,
) -> Result<(GranteeKind, GrantAccess), ApiError> {
    if !entity.is_scoped() {
        return Err(ApiError::bad_request(format!(
            "{} instances carry no grant lists",
            entity.name
        )));
    }
    let kind = GranteeKind::parse(kind)
        .ok_or_else(|| ApiError::bad_request(format!("Unknown grantee kind '{kind}'")))?;
    let access = GrantAccess::parse(access)
        .ok_or_else(|| ApiError::bad_request(format!("Unknown grant access '{access}'")))?;
    Ok((kind, access))
}

fn check_grantee_exists(state: &AppState, kind: GranteeKind, id: &str) -> Result<(), ApiError> {
    let found = match kind {
        GranteeKind::User => state
            .store
            .get_user(id)
            .api_err("Failed to get user")?
            .is_some(),
        GranteeKind::Group => match state.registry.entities().find(|e| e.kind == EntityKind::Group) {
            Some(group) => state
                .store
                .get_record(&group.name, id)
                .api_err("Failed to get group")?
                .is_some(),
            None => false,
        },
    };
    if found {
        Ok(())
    } else {
        Err(ApiError::bad_request(format!(
            "Unknown {} '{id}'",
            kind.as_str()
        )))
    }
}

fn check_grantees(state: &AppState, grants: &RecordGrants) -> Result<(), ApiError> {
    for (kind, id) in grants.grantees() {
        check_grantee_exists(state, kind, id)?;
    }
    Ok(())
}

/// Level gate, then fetch, then instance scope. A missing instance and an
/// out-of-scope one produce the same response.
fn load_authorized(
    state: &AppState,
    principal: Option<&Principal>,
    entity: &CompiledEntity,
    operation: Operation,
    uid: &str,
) -> Result<Record, ApiError> {
    let roles = bound_roles(state, entity, operation)?;
    state
        .authorizer
        .check_operation(principal, entity, operation, &roles)?;

    let record = state
        .store
        .get_record(&entity.name, uid)
        .api_err("Failed to get record")?
        .or_not_found()?;

    state
        .authorizer
        .check_instance(principal, entity, operation, InstanceView::from(&record))?;
    Ok(record)
}

fn check_divider_exists(state: &AppState, uid: &str) -> Result<(), ApiError> {
    state
        .store
        .get_record(state.registry.divider_name(), uid)
        .api_err("Failed to get divider")?
        .map(|_| ())
        .ok_or_else(|| ApiError::bad_request(format!("Unknown divider instance '{uid}'")))
}
