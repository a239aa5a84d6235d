mod schema;
mod sqlite;

pub use sqlite::SqliteStore;

use chrono::{DateTime, Duration, Utc};

use crate::config::SessionMode;
use crate::error::Result;
use crate::types::*;

/// Store defines the database interface.
pub trait Store: Send + Sync {
    fn initialize(&self) -> Result<()>;

    // User operations
    fn create_user(&self, user: &User) -> Result<()>;
    fn get_user(&self, id: &str) -> Result<Option<User>>;
    fn get_user_by_email(&self, email: &str) -> Result<Option<User>>;
    fn list_users(&self, cursor: &str, limit: i32) -> Result<Vec<User>>;
    fn update_user(&self, user: &User) -> Result<()>;
    fn delete_user(&self, id: &str) -> Result<bool>;
    fn has_superuser(&self) -> Result<bool>;

    /// Reads the user, lets `decide` compute the new flags from it, and
    /// writes them, all in one transaction. Errors from `decide` abort
    /// without writing.
    fn update_user_flags(
        &self,
        id: &str,
        decide: &dyn Fn(&User) -> Result<FlagBundle>,
    ) -> Result<User>;

    // Divider membership
    fn add_user_divider(&self, user_id: &str, divider_uid: &str) -> Result<()>;
    /// Removes the membership and the user from every grant list of
    /// instances in that divider, atomically.
    fn revoke_user_divider(&self, user_id: &str, divider_uid: &str) -> Result<bool>;
    fn list_user_dividers(&self, user_id: &str) -> Result<Vec<String>>;

    // Group membership
    fn add_group_member(&self, group_uid: &str, user_id: &str) -> Result<()>;
    fn remove_group_member(&self, group_uid: &str, user_id: &str) -> Result<bool>;
    fn list_user_groups(&self, user_id: &str) -> Result<Vec<String>>;

    // ACL roles
    fn create_role(&self, role: &Role) -> Result<()>;
    fn get_role_by_name(&self, name: &str) -> Result<Option<Role>>;
    fn add_role_member(&self, role_id: &str, user_id: &str) -> Result<()>;
    fn list_user_roles(&self, user_id: &str) -> Result<Vec<String>>;
    fn bind_model_permission(&self, permission: &ModelPermission) -> Result<()>;
    fn list_bound_roles(&self, model: &str, operation: Operation) -> Result<Vec<String>>;

    // Token operations
    fn get_token_by_lookup(&self, lookup: &str) -> Result<Option<Token>>;
    fn list_user_tokens(&self, user_id: &str) -> Result<Vec<Token>>;
    fn delete_token(&self, id: &str) -> Result<bool>;

    /// Reads `(expiration_date, last_action_date)` and decides expiry in one
    /// transaction; a valid token used before its expiration date gets its
    /// last action moved to `now`. `None` when the token is gone.
    fn check_token(
        &self,
        id: &str,
        now: DateTime<Utc>,
        grace: Duration,
    ) -> Result<Option<TokenStatus>>;

    /// Stores a freshly minted token for its user. In single-session mode the
    /// user's existing token row is rotated to the new secret; in
    /// multi-session mode the token is added and the oldest ones beyond
    /// `max_sessions` are dropped. Returns the stored token.
    fn issue_session(
        &self,
        token: &Token,
        mode: SessionMode,
        max_sessions: Option<usize>,
    ) -> Result<Token>;

    // Record operations
    fn create_record(&self, record: &Record) -> Result<()>;
    fn get_record(&self, entity: &str, uid: &str) -> Result<Option<Record>>;
    fn list_records(&self, entity: &str, cursor: &str, limit: i32) -> Result<Vec<Record>>;
    fn update_record(&self, record: &Record) -> Result<()>;
    fn delete_record(&self, entity: &str, uid: &str) -> Result<bool>;
    fn set_record_grant(
        &self,
        uid: &str,
        kind: GranteeKind,
        access: GrantAccess,
        grantee_id: &str,
    ) -> Result<()>;
    fn remove_record_grant(
        &self,
        uid: &str,
        kind: GranteeKind,
        access: GrantAccess,
        grantee_id: &str,
    ) -> Result<bool>;
}
