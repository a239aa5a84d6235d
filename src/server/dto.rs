use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::datamodel::{CompiledEntity, DividerLink, EntityKind};
use crate::types::{Level, RecordGrants, User};

#[derive(Debug, Default, Deserialize)]
pub struct PaginationParams {
    #[serde(default)]
    pub cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub expiration_date: DateTime<Utc>,
    pub user: UserResponse,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub level: Level,
    pub unsubscribe_all: bool,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub data: Map<String, Value>,
    pub password_modification_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            level: user.level(),
            id: user.id,
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
            unsubscribe_all: user.unsubscribe_all,
            data: user.data,
            password_modification_date: user.password_modification_date,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub level: Option<String>,
    /// Values of fields the datamodel declares on `User`.
    #[serde(default)]
    pub data: Map<String, Value>,
}

/// Profile changes. Level changes go through [`SetLevelRequest`].
#[derive(Debug, Default, Deserialize)]
pub struct UpdateUserRequest {
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub unsubscribe_all: Option<bool>,
    /// A new password also resets the password expiry clock.
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub data: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct SetLevelRequest {
    pub level: String,
}

/// One line of the model index.
#[derive(Debug, Serialize)]
pub struct ModelSummary {
    pub name: String,
    pub uid: String,
    pub kind: EntityKind,
    pub scoped: bool,
}

impl From<&CompiledEntity> for ModelSummary {
    fn from(entity: &CompiledEntity) -> Self {
        Self {
            name: entity.name.clone(),
            uid: entity.uid.clone(),
            kind: entity.kind,
            scoped: matches!(entity.divider, DividerLink::ForeignKey { .. }),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateRecordRequest {
    /// Divider instance; defaults to the caller's only divider.
    #[serde(default)]
    pub divider: Option<String>,
    #[serde(default)]
    pub public: Option<bool>,
    #[serde(default)]
    pub additional_filtering: bool,
    #[serde(default)]
    pub grants: RecordGrants,
    #[serde(default)]
    pub data: Map<String, Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateRecordRequest {
    #[serde(default)]
    pub divider: Option<String>,
    #[serde(default)]
    pub public: Option<bool>,
    #[serde(default)]
    pub additional_filtering: Option<bool>,
    #[serde(default)]
    pub grants: Option<RecordGrants>,
    #[serde(default)]
    pub data: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct CreateRoleRequest {
    pub name: String,
}
