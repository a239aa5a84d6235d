use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{FlagBundle, Level, Operation};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(skip)]
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(flatten)]
    pub flags: FlagBundle,
    pub password_modification_date: DateTime<Utc>,
    pub unsubscribe_all: bool,
    /// Values of fields the datamodel declares on `User`.
    #[serde(default)]
    pub data: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    #[must_use]
    pub const fn level(&self) -> Level {
        self.flags.level()
    }

    #[must_use]
    pub fn password_expired(&self, expiry: Option<Duration>, now: DateTime<Utc>) -> bool {
        expiry.is_some_and(|expiry| now > self.password_modification_date + expiry)
    }
}

/// Emails are unique case-insensitively; they are always stored lowercased.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub id: String,
    #[serde(skip)]
    pub token_hash: String,
    #[serde(skip)]
    pub token_lookup: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub expiration_date: DateTime<Utc>,
    pub last_action_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenStatus {
    Valid,
    Expired,
}

impl Token {
    /// A token expires once both its expiration date and the grace window
    /// after its last action have passed.
    #[must_use]
    pub fn status(&self, now: DateTime<Utc>, grace: Duration) -> TokenStatus {
        if now > self.expiration_date && now > self.last_action_date + grace {
            TokenStatus::Expired
        } else {
            TokenStatus::Valid
        }
    }

    /// Use inside the grace window does not count as an action.
    #[must_use]
    pub fn should_touch(&self, now: DateTime<Utc>) -> bool {
        now <= self.expiration_date
    }
}

/// One instance of a compiled entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub uid: String,
    pub entity: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub divider: Option<String>,
    pub public: bool,
    pub additional_filtering: bool,
    pub data: Map<String, Value>,
    #[serde(flatten)]
    pub grants: RecordGrants,
    pub creation_date: DateTime<Utc>,
    pub modification_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GranteeKind {
    User,
    Group,
}

impl GranteeKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            GranteeKind::User => "user",
            GranteeKind::Group => "group",
        }
    }

    pub fn parse(s: &str) -> Option<GranteeKind> {
        match s {
            "user" => Some(GranteeKind::User),
            "group" => Some(GranteeKind::Group),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GrantAccess {
    View,
    Admin,
}

impl GrantAccess {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            GrantAccess::View => "view",
            GrantAccess::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<GrantAccess> {
        match s {
            "view" => Some(GrantAccess::View),
            "admin" => Some(GrantAccess::Admin),
            _ => None,
        }
    }
}

/// Per-instance grant lists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordGrants {
    #[serde(default)]
    pub can_view_users: BTreeSet<String>,
    #[serde(default)]
    pub can_admin_users: BTreeSet<String>,
    #[serde(default)]
    pub can_view_groups: BTreeSet<String>,
    #[serde(default)]
    pub can_admin_groups: BTreeSet<String>,
}

impl RecordGrants {
    pub fn list_mut(&mut self, kind: GranteeKind, access: GrantAccess) -> &mut BTreeSet<String> {
        match (kind, access) {
            (GranteeKind::User, GrantAccess::View) => &mut self.can_view_users,
            (GranteeKind::User, GrantAccess::Admin) => &mut self.can_admin_users,
            (GranteeKind::Group, GrantAccess::View) => &mut self.can_view_groups,
            (GranteeKind::Group, GrantAccess::Admin) => &mut self.can_admin_groups,
        }
    }

    #[must_use]
    pub const fn list(&self, kind: GranteeKind, access: GrantAccess) -> &BTreeSet<String> {
        match (kind, access) {
            (GranteeKind::User, GrantAccess::View) => &self.can_view_users,
            (GranteeKind::User, GrantAccess::Admin) => &self.can_admin_users,
            (GranteeKind::Group, GrantAccess::View) => &self.can_view_groups,
            (GranteeKind::Group, GrantAccess::Admin) => &self.can_admin_groups,
        }
    }

    /// Every grantee across the four lists, tagged with its kind.
    pub fn grantees(&self) -> impl Iterator<Item = (GranteeKind, &str)> {
        let users = self.can_view_users.iter().chain(&self.can_admin_users);
        let groups = self.can_view_groups.iter().chain(&self.can_admin_groups);
        users
            .map(|id| (GranteeKind::User, id.as_str()))
            .chain(groups.map(|id| (GranteeKind::Group, id.as_str())))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.can_view_users.is_empty()
            && self.can_admin_users.is_empty()
            && self.can_view_groups.is_empty()
            && self.can_admin_groups.is_empty()
    }
}

/// A named, assignable grouping of users for per-model ACL overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Binds a role to one operation on one model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelPermission {
    pub model: String,
    pub operation: Operation,
    pub role_id: String,
}
