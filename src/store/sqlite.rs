use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde_json::{Map, Value};

use super::Store;
use super::schema::SCHEMA;
use crate::config::SessionMode;
use crate::error::{Error, Result};
use crate::types::*;

const USER_COLUMNS: &str = "id, email, password_hash, first_name, last_name, is_active, is_staff, admin, \
     is_superuser, password_modification_date, unsubscribe_all, data, created_at, updated_at";

const TOKEN_COLUMNS: &str =
    "id, token_hash, token_lookup, user_id, created_at, expiration_date, last_action_date";

const RECORD_COLUMNS: &str =
    "uid, entity, divider, public, additional_filtering, data, creation_date, modification_date";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "journal_mode", "WAL")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // Handle SQLite's default datetime format: "YYYY-MM-DD HH:MM:SS"
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            tracing::error!("Invalid datetime in database: '{}' - {}", s, e);
            Utc::now()
        })
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn parse_data(s: &str) -> Map<String, Value> {
    serde_json::from_str(s).unwrap_or_else(|e| {
        tracing::error!("Invalid JSON data in database: '{}' - {}", s, e);
        Map::new()
    })
}

fn constraint_kind(err: &rusqlite::Error) -> Option<i32> {
    match err {
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Some(err.extended_code)
        }
        _ => None,
    }
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        password_hash: row.get(2)?,
        first_name: row.get(3)?,
        last_name: row.get(4)?,
        flags: FlagBundle {
            is_active: row.get(5)?,
            is_staff: row.get(6)?,
            admin: row.get(7)?,
            is_superuser: row.get(8)?,
        },
        password_modification_date: parse_datetime(&row.get::<_, String>(9)?),
        unsubscribe_all: row.get(10)?,
        data: parse_data(&row.get::<_, String>(11)?),
        created_at: parse_datetime(&row.get::<_, String>(12)?),
        updated_at: parse_datetime(&row.get::<_, String>(13)?),
    })
}

fn token_from_row(row: &Row<'_>) -> rusqlite::Result<Token> {
    Ok(Token {
        id: row.get(0)?,
        token_hash: row.get(1)?,
        token_lookup: row.get(2)?,
        user_id: row.get(3)?,
        created_at: parse_datetime(&row.get::<_, String>(4)?),
        expiration_date: parse_datetime(&row.get::<_, String>(5)?),
        last_action_date: parse_datetime(&row.get::<_, String>(6)?),
    })
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<Record> {
    Ok(Record {
        uid: row.get(0)?,
        entity: row.get(1)?,
        divider: row.get(2)?,
        public: row.get(3)?,
        additional_filtering: row.get(4)?,
        data: parse_data(&row.get::<_, String>(5)?),
        grants: RecordGrants::default(),
        creation_date: parse_datetime(&row.get::<_, String>(6)?),
        modification_date: parse_datetime(&row.get::<_, String>(7)?),
    })
}

fn query_user(conn: &Connection, id: &str) -> Result<Option<User>> {
    conn.query_row(
        &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
        params![id],
        user_from_row,
    )
    .optional()
    .map_err(Error::from)
}

fn load_grants(conn: &Connection, uid: &str) -> Result<RecordGrants> {
    let mut stmt = conn.prepare(
        "SELECT grantee_kind, access, grantee_id FROM record_grants WHERE record_uid = ?1",
    )?;
    let rows = stmt.query_map(params![uid], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;

    let mut grants = RecordGrants::default();
    for row in rows {
        let (kind, access, grantee) = row?;
        match (GranteeKind::parse(&kind), GrantAccess::parse(&access)) {
            (Some(kind), Some(access)) => {
                grants.list_mut(kind, access).insert(grantee);
            }
            _ => tracing::error!("Invalid grant row for record '{}': {} {}", uid, kind, access),
        }
    }
    Ok(grants)
}

fn insert_grants(conn: &Connection, uid: &str, grants: &RecordGrants) -> Result<()> {
    for kind in [GranteeKind::User, GranteeKind::Group] {
        for access in [GrantAccess::View, GrantAccess::Admin] {
            for grantee in grants.list(kind, access) {
                conn.execute(
                    "INSERT OR IGNORE INTO record_grants (record_uid, grantee_kind, access, grantee_id)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![uid, kind.as_str(), access.as_str(), grantee],
                )?;
            }
        }
    }
    Ok(())
}

fn insert_token(conn: &Connection, token: &Token) -> Result<()> {
    let result = conn.execute(
        &format!("INSERT INTO tokens ({TOKEN_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"),
        params![
            token.id,
            token.token_hash,
            token.token_lookup,
            token.user_id,
            format_datetime(&token.created_at),
            format_datetime(&token.expiration_date),
            format_datetime(&token.last_action_date),
        ],
    );

    match result {
        Ok(_) => Ok(()),
        Err(e) if constraint_kind(&e) == Some(rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY) => {
            Err(Error::NotFound)
        }
        Err(e) if constraint_kind(&e).is_some() => Err(Error::TokenLookupCollision),
        Err(e) => Err(Error::from(e)),
    }
}

fn collect_strings(conn: &Connection, sql: &str, key: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params![key], |row| row.get(0))?;
    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(Error::from)
}

impl Store for SqliteStore {
    fn initialize(&self) -> Result<()> {
        self.conn().execute_batch(SCHEMA)?;
        Ok(())
    }

    // User operations

    fn create_user(&self, user: &User) -> Result<()> {
        let result = self.conn().execute(
            &format!(
                "INSERT INTO users ({USER_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"
            ),
            params![
                user.id,
                normalize_email(&user.email),
                user.password_hash,
                user.first_name,
                user.last_name,
                user.flags.is_active,
                user.flags.is_staff,
                user.flags.admin,
                user.flags.is_superuser,
                format_datetime(&user.password_modification_date),
                user.unsubscribe_all,
                serde_json::to_string(&user.data)?,
                format_datetime(&user.created_at),
                format_datetime(&user.updated_at),
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(e) if constraint_kind(&e).is_some() => Err(Error::AlreadyExists),
            Err(e) => Err(Error::from(e)),
        }
    }

    fn get_user(&self, id: &str) -> Result<Option<User>> {
        query_user(&self.conn(), id)
    }

    fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1"),
            params![normalize_email(email)],
            user_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_users(&self, cursor: &str, limit: i32) -> Result<Vec<User>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id > ?1 ORDER BY id LIMIT ?2"
        ))?;

        let rows = stmt.query_map(params![cursor, limit], user_from_row)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn update_user(&self, user: &User) -> Result<()> {
        let result = self.conn().execute(
            "UPDATE users SET email = ?2, password_hash = ?3, first_name = ?4, last_name = ?5,
             is_active = ?6, is_staff = ?7, admin = ?8, is_superuser = ?9,
             password_modification_date = ?10, unsubscribe_all = ?11, data = ?12, updated_at = ?13
             WHERE id = ?1",
            params![
                user.id,
                normalize_email(&user.email),
                user.password_hash,
                user.first_name,
                user.last_name,
                user.flags.is_active,
                user.flags.is_staff,
                user.flags.admin,
                user.flags.is_superuser,
                format_datetime(&user.password_modification_date),
                user.unsubscribe_all,
                serde_json::to_string(&user.data)?,
                format_datetime(&user.updated_at),
            ],
        );

        match result {
            Ok(0) => Err(Error::NotFound),
            Ok(_) => Ok(()),
            Err(e) if constraint_kind(&e).is_some() => Err(Error::AlreadyExists),
            Err(e) => Err(Error::from(e)),
        }
    }

    fn delete_user(&self, id: &str) -> Result<bool> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        tx.execute(
            "DELETE FROM record_grants WHERE grantee_kind = 'user' AND grantee_id = ?1",
            params![id],
        )?;
        let rows = tx.execute("DELETE FROM users WHERE id = ?1", params![id])?;

        tx.commit()?;
        Ok(true)
    }

    fn has_superuser(&self) -> Result<bool> {
        let conn = self.conn();
        let count: i32 = conn.query_row(
            "SELECT COUNT(*) FROM users WHERE is_superuser = 1 AND is_active = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn update_user_flags(
        &self,
        id: &str,
        decide: &dyn Fn(&User) -> Result<FlagBundle>,
    ) -> Result<User> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let mut user = query_user(&tx, id)?.ok_or(Error::NotFound)?;
        let flags = decide(&user)?;
        let now = Utc::now();

        tx.execute(
            "UPDATE users SET is_active = ?2, is_staff = ?3, admin = ?4, is_superuser = ?5,
             updated_at = ?6 WHERE id = ?1",
            params![
                id,
                flags.is_active,
                flags.is_staff,
                flags.admin,
                flags.is_superuser,
                format_datetime(&now),
            ],
        )?;
        tx.commit()?;

        user.flags = flags;
        user.updated_at = now;
        Ok(user)
    }

    // Divider membership

    fn add_user_divider(&self, user_id: &str, divider_uid: &str) -> Result<()> {
        let result = self.conn().execute(
            "INSERT OR IGNORE INTO user_dividers (user_id, divider_uid) VALUES (?1, ?2)",
            params![user_id, divider_uid],
        );

        match result {
            Ok(_) => Ok(()),
            Err(e) if constraint_kind(&e).is_some() => Err(Error::NotFound),
            Err(e) => Err(Error::from(e)),
        }
    }

    fn revoke_user_divider(&self, user_id: &str, divider_uid: &str) -> Result<bool> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let rows = tx.execute(
            "DELETE FROM user_dividers WHERE user_id = ?1 AND divider_uid = ?2",
            params![user_id, divider_uid],
        )?;
        if rows == 0 {
            return Ok(false);
        }
        tx.execute(
            "DELETE FROM record_grants
             WHERE grantee_kind = 'user' AND grantee_id = ?1
             AND record_uid IN (SELECT uid FROM records WHERE divider = ?2)",
            params![user_id, divider_uid],
        )?;

        tx.commit()?;
        Ok(true)
    }

    fn list_user_dividers(&self, user_id: &str) -> Result<Vec<String>> {
        collect_strings(
            &self.conn(),
            "SELECT divider_uid FROM user_dividers WHERE user_id = ?1 ORDER BY divider_uid",
            user_id,
        )
    }

    // Group membership

    fn add_group_member(&self, group_uid: &str, user_id: &str) -> Result<()> {
        let result = self.conn().execute(
            "INSERT OR IGNORE INTO group_members (group_uid, user_id) VALUES (?1, ?2)",
            params![group_uid, user_id],
        );

        match result {
            Ok(_) => Ok(()),
            Err(e) if constraint_kind(&e).is_some() => Err(Error::NotFound),
            Err(e) => Err(Error::from(e)),
        }
    }

    fn remove_group_member(&self, group_uid: &str, user_id: &str) -> Result<bool> {
        let rows = self.conn().execute(
            "DELETE FROM group_members WHERE group_uid = ?1 AND user_id = ?2",
            params![group_uid, user_id],
        )?;
        Ok(rows > 0)
    }

    fn list_user_groups(&self, user_id: &str) -> Result<Vec<String>> {
        collect_strings(
            &self.conn(),
            "SELECT group_uid FROM group_members WHERE user_id = ?1 ORDER BY group_uid",
            user_id,
        )
    }

    // ACL roles

    fn create_role(&self, role: &Role) -> Result<()> {
        let result = self.conn().execute(
            "INSERT INTO roles (id, name, created_at) VALUES (?1, ?2, ?3)",
            params![role.id, role.name, format_datetime(&role.created_at)],
        );

        match result {
            Ok(_) => Ok(()),
            Err(e) if constraint_kind(&e).is_some() => Err(Error::AlreadyExists),
            Err(e) => Err(Error::from(e)),
        }
    }

    fn get_role_by_name(&self, name: &str) -> Result<Option<Role>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, name, created_at FROM roles WHERE name = ?1",
            params![name],
            |row| {
                Ok(Role {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    created_at: parse_datetime(&row.get::<_, String>(2)?),
                })
            },
        )
        .optional()
        .map_err(Error::from)
    }

    fn add_role_member(&self, role_id: &str, user_id: &str) -> Result<()> {
        let result = self.conn().execute(
            "INSERT OR IGNORE INTO role_members (role_id, user_id) VALUES (?1, ?2)",
            params![role_id, user_id],
        );

        match result {
            Ok(_) => Ok(()),
            Err(e) if constraint_kind(&e).is_some() => Err(Error::NotFound),
            Err(e) => Err(Error::from(e)),
        }
    }

    fn list_user_roles(&self, user_id: &str) -> Result<Vec<String>> {
        collect_strings(
            &self.conn(),
            "SELECT role_id FROM role_members WHERE user_id = ?1 ORDER BY role_id",
            user_id,
        )
    }

    fn bind_model_permission(&self, permission: &ModelPermission) -> Result<()> {
        let result = self.conn().execute(
            "INSERT OR IGNORE INTO model_permissions (model, operation, role_id) VALUES (?1, ?2, ?3)",
            params![
                permission.model,
                permission.operation.as_str(),
                permission.role_id
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(e) if constraint_kind(&e).is_some() => Err(Error::NotFound),
            Err(e) => Err(Error::from(e)),
        }
    }

    fn list_bound_roles(&self, model: &str, operation: Operation) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT role_id FROM model_permissions WHERE model = ?1 AND operation = ?2 ORDER BY role_id",
        )?;
        let rows = stmt.query_map(params![model, operation.as_str()], |row| row.get(0))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    // Token operations

    fn get_token_by_lookup(&self, lookup: &str) -> Result<Option<Token>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {TOKEN_COLUMNS} FROM tokens WHERE token_lookup = ?1"),
            params![lookup],
            token_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_user_tokens(&self, user_id: &str) -> Result<Vec<Token>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {TOKEN_COLUMNS} FROM tokens WHERE user_id = ?1 ORDER BY created_at, rowid"
        ))?;

        let rows = stmt.query_map(params![user_id], token_from_row)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn delete_token(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn()
            .execute("DELETE FROM tokens WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    fn check_token(
        &self,
        id: &str,
        now: DateTime<Utc>,
        grace: Duration,
    ) -> Result<Option<TokenStatus>> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let token = tx
            .query_row(
                &format!("SELECT {TOKEN_COLUMNS} FROM tokens WHERE id = ?1"),
                params![id],
                token_from_row,
            )
            .optional()?;
        let Some(token) = token else {
            return Ok(None);
        };

        let status = token.status(now, grace);
        if status == TokenStatus::Valid && token.should_touch(now) {
            tx.execute(
                "UPDATE tokens SET last_action_date = ?2 WHERE id = ?1",
                params![id, format_datetime(&now)],
            )?;
        }

        tx.commit()?;
        Ok(Some(status))
    }

    fn issue_session(
        &self,
        token: &Token,
        mode: SessionMode,
        max_sessions: Option<usize>,
    ) -> Result<Token> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let mut stored = token.clone();

        match mode {
            SessionMode::Single => {
                let existing: Option<String> = tx
                    .query_row(
                        "SELECT id FROM tokens WHERE user_id = ?1
                         ORDER BY created_at DESC, rowid DESC LIMIT 1",
                        params![token.user_id],
                        |row| row.get(0),
                    )
                    .optional()?;

                match existing {
                    Some(id) => {
                        let result = tx.execute(
                            "UPDATE tokens SET token_hash = ?2, token_lookup = ?3, created_at = ?4,
                             expiration_date = ?5, last_action_date = ?6 WHERE id = ?1",
                            params![
                                id,
                                token.token_hash,
                                token.token_lookup,
                                format_datetime(&token.created_at),
                                format_datetime(&token.expiration_date),
                                format_datetime(&token.last_action_date),
                            ],
                        );
                        match result {
                            Ok(_) => {}
                            Err(e) if constraint_kind(&e).is_some() => {
                                return Err(Error::TokenLookupCollision);
                            }
                            Err(e) => return Err(Error::from(e)),
                        }
                        tx.execute(
                            "DELETE FROM tokens WHERE user_id = ?1 AND id != ?2",
                            params![token.user_id, id],
                        )?;
                        stored.id = id;
                    }
                    None => insert_token(&tx, token)?,
                }
            }
            SessionMode::Multi => {
                insert_token(&tx, token)?;
                if let Some(max) = max_sessions {
                    let keep = i64::try_from(max).unwrap_or(i64::MAX);
                    tx.execute(
                        "DELETE FROM tokens WHERE user_id = ?1 AND id NOT IN (
                             SELECT id FROM tokens WHERE user_id = ?1
                             ORDER BY created_at DESC, rowid DESC LIMIT ?2
                         )",
                        params![token.user_id, keep],
                    )?;
                }
            }
        }

        tx.commit()?;
        Ok(stored)
    }

    // Record operations

    fn create_record(&self, record: &Record) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let result = tx.execute(
            &format!("INSERT INTO records ({RECORD_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"),
            params![
                record.uid,
                record.entity,
                record.divider,
                record.public,
                record.additional_filtering,
                serde_json::to_string(&record.data)?,
                format_datetime(&record.creation_date),
                format_datetime(&record.modification_date),
            ],
        );

        match result {
            Ok(_) => {}
            Err(e) if constraint_kind(&e) == Some(rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY) => {
                return Err(Error::BadRequest(format!(
                    "unknown divider instance '{}'",
                    record.divider.as_deref().unwrap_or_default()
                )));
            }
            Err(e) if constraint_kind(&e).is_some() => return Err(Error::AlreadyExists),
            Err(e) => return Err(Error::from(e)),
        }

        insert_grants(&tx, &record.uid, &record.grants)?;
        tx.commit()?;
        Ok(())
    }

    fn get_record(&self, entity: &str, uid: &str) -> Result<Option<Record>> {
        let conn = self.conn();
        let record = conn
            .query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM records WHERE entity = ?1 AND uid = ?2"),
                params![entity, uid],
                record_from_row,
            )
            .optional()?;

        match record {
            Some(mut record) => {
                record.grants = load_grants(&conn, &record.uid)?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    fn list_records(&self, entity: &str, cursor: &str, limit: i32) -> Result<Vec<Record>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM records WHERE entity = ?1 AND uid > ?2 ORDER BY uid LIMIT ?3"
        ))?;

        let rows = stmt.query_map(params![entity, cursor, limit], record_from_row)?;
        let mut records = rows.collect::<std::result::Result<Vec<_>, _>>()?;

        for record in &mut records {
            record.grants = load_grants(&conn, &record.uid)?;
        }
        Ok(records)
    }

    fn update_record(&self, record: &Record) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let result = tx.execute(
            "UPDATE records SET divider = ?3, public = ?4, additional_filtering = ?5, data = ?6,
             modification_date = ?7 WHERE entity = ?1 AND uid = ?2",
            params![
                record.entity,
                record.uid,
                record.divider,
                record.public,
                record.additional_filtering,
                serde_json::to_string(&record.data)?,
                format_datetime(&record.modification_date),
            ],
        );

        match result {
            Ok(0) => return Err(Error::NotFound),
            Ok(_) => {}
            Err(e) if constraint_kind(&e).is_some() => {
                return Err(Error::BadRequest(format!(
                    "unknown divider instance '{}'",
                    record.divider.as_deref().unwrap_or_default()
                )));
            }
            Err(e) => return Err(Error::from(e)),
        }

        tx.execute(
            "DELETE FROM record_grants WHERE record_uid = ?1",
            params![record.uid],
        )?;
        insert_grants(&tx, &record.uid, &record.grants)?;

        tx.commit()?;
        Ok(())
    }

    fn delete_record(&self, entity: &str, uid: &str) -> Result<bool> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let rows = tx.execute(
            "DELETE FROM records WHERE entity = ?1 AND uid = ?2",
            params![entity, uid],
        )?;
        if rows > 0 {
            // A deleted group leaves the grant lists it appeared in
            tx.execute(
                "DELETE FROM record_grants WHERE grantee_kind = 'group' AND grantee_id = ?1",
                params![uid],
            )?;
        }

        tx.commit()?;
        Ok(true)
    }

    fn set_record_grant(
        &self,
        uid: &str,
        kind: GranteeKind,
        access: GrantAccess,
        grantee_id: &str,
    ) -> Result<()> {
        let result = self.conn().execute(
            "INSERT OR IGNORE INTO record_grants (record_uid, grantee_kind, access, grantee_id)
             VALUES (?1, ?2, ?3, ?4)",
            params![uid, kind.as_str(), access.as_str(), grantee_id],
        );

        match result {
            Ok(_) => Ok(()),
            Err(e) if constraint_kind(&e).is_some() => Err(Error::NotFound),
            Err(e) => Err(Error::from(e)),
        }
    }

    fn remove_record_grant(
        &self,
        uid: &str,
        kind: GranteeKind,
        access: GrantAccess,
        grantee_id: &str,
    ) -> Result<bool> {
        let rows = self.conn().execute(
            "DELETE FROM record_grants
             WHERE record_uid = ?1 AND grantee_kind = ?2 AND access = ?3 AND grantee_id = ?4",
            params![uid, kind.as_str(), access.as_str(), grantee_id],
        )?;
        Ok(rows > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open() -> (TempDir, SqliteStore) {
        let temp = TempDir::new().unwrap();
        let store = SqliteStore::new(temp.path().join("test.db")).unwrap();
        store.initialize().unwrap();
        (temp, store)
    }

    fn user(id: &str, email: &str, level: Level) -> User {
        let now = Utc::now();
        User {
            id: id.to_string(),
            email: email.to_string(),
            password_hash: "hash".to_string(),
            first_name: String::new(),
            last_name: String::new(),
            flags: level.flags(),
            password_modification_date: now,
            unsubscribe_all: false,
            data: Map::new(),
            created_at: now,
            updated_at: now,
        }
    }

    fn record(uid: &str, entity: &str, divider: Option<&str>) -> Record {
        let now = Utc::now();
        Record {
            uid: uid.to_string(),
            entity: entity.to_string(),
            divider: divider.map(str::to_string),
            public: false,
            additional_filtering: false,
            data: Map::new(),
            grants: RecordGrants::default(),
            creation_date: now,
            modification_date: now,
        }
    }

    fn token(id: &str, lookup: &str, user_id: &str, created_at: DateTime<Utc>) -> Token {
        Token {
            id: id.to_string(),
            token_hash: format!("hash-{id}"),
            token_lookup: lookup.to_string(),
            user_id: user_id.to_string(),
            created_at,
            expiration_date: created_at + Duration::hours(1),
            last_action_date: created_at,
        }
    }

    #[test]
    fn test_initialize_creates_tables() {
        let (_temp, store) = open();

        let conn = store.conn();
        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();

        for table in [
            "users",
            "records",
            "record_grants",
            "user_dividers",
            "group_members",
            "roles",
            "role_members",
            "model_permissions",
            "tokens",
        ] {
            assert!(tables.contains(&table.to_string()), "missing {table}");
        }
    }

    #[test]
    fn test_user_crud() {
        let (_temp, store) = open();

        let mut ada = user("u1", "Ada@Example.com", Level::SimpleUser);
        ada.data.insert("nickname".into(), Value::from("ada"));
        store.create_user(&ada).unwrap();

        let fetched = store.get_user_by_email("ADA@example.com").unwrap().unwrap();
        assert_eq!(fetched.id, "u1");
        assert_eq!(fetched.email, "ada@example.com");
        assert_eq!(fetched.level(), Level::SimpleUser);
        assert_eq!(fetched.data["nickname"], "ada");

        let dup = user("u2", "ada@example.com", Level::SimpleUser);
        assert!(matches!(store.create_user(&dup), Err(Error::AlreadyExists)));

        assert!(!store.has_superuser().unwrap());
        store
            .create_user(&user("u3", "root@example.com", Level::Superuser))
            .unwrap();
        assert!(store.has_superuser().unwrap());

        assert_eq!(store.list_users("", 10).unwrap().len(), 2);
        assert!(store.delete_user("u1").unwrap());
        assert!(store.get_user("u1").unwrap().is_none());
    }

    #[test]
    fn test_update_user_flags_aborts_on_error() {
        let (_temp, store) = open();
        store
            .create_user(&user("u1", "a@example.com", Level::SimpleUser))
            .unwrap();

        let result = store.update_user_flags("u1", &|_| Err(Error::Forbidden));
        assert!(matches!(result, Err(Error::Forbidden)));
        assert_eq!(
            store.get_user("u1").unwrap().unwrap().level(),
            Level::SimpleUser
        );

        let updated = store
            .update_user_flags("u1", &|_| Ok(Level::Manager.flags()))
            .unwrap();
        assert_eq!(updated.level(), Level::Manager);
        assert_eq!(
            store.get_user("u1").unwrap().unwrap().level(),
            Level::Manager
        );

        assert!(matches!(
            store.update_user_flags("missing", &|u| Ok(u.flags)),
            Err(Error::NotFound)
        ));
    }

    #[test]
    fn test_revoke_divider_clears_grants_in_that_divider() {
        let (_temp, store) = open();
        store
            .create_user(&user("u1", "a@example.com", Level::SimpleUser))
            .unwrap();
        store.create_record(&record("d1", "Division", None)).unwrap();
        store.create_record(&record("d2", "Division", None)).unwrap();

        let mut inside = record("r1", "Note", Some("d1"));
        inside.grants.can_view_users.insert("u1".into());
        store.create_record(&inside).unwrap();

        let mut outside = record("r2", "Note", Some("d2"));
        outside.grants.can_admin_users.insert("u1".into());
        store.create_record(&outside).unwrap();

        store.add_user_divider("u1", "d1").unwrap();
        assert_eq!(store.list_user_dividers("u1").unwrap(), vec!["d1"]);

        assert!(store.revoke_user_divider("u1", "d1").unwrap());
        assert!(store.list_user_dividers("u1").unwrap().is_empty());

        let inside = store.get_record("Note", "r1").unwrap().unwrap();
        assert!(inside.grants.is_empty());
        let outside = store.get_record("Note", "r2").unwrap().unwrap();
        assert!(outside.grants.can_admin_users.contains("u1"));

        assert!(!store.revoke_user_divider("u1", "d1").unwrap());
    }

    #[test]
    fn test_revoke_without_membership_keeps_grants() {
        let (_temp, store) = open();
        store
            .create_user(&user("u1", "a@example.com", Level::SimpleUser))
            .unwrap();
        store.create_record(&record("d1", "Division", None)).unwrap();

        let mut granted = record("r1", "Note", Some("d1"));
        granted.grants.can_view_users.insert("u1".into());
        store.create_record(&granted).unwrap();

        assert!(!store.revoke_user_divider("u1", "d1").unwrap());

        let granted = store.get_record("Note", "r1").unwrap().unwrap();
        assert!(granted.grants.can_view_users.contains("u1"));
    }

    #[test]
    fn test_record_crud_and_grants() {
        let (_temp, store) = open();
        store.create_record(&record("d1", "Division", None)).unwrap();

        let mut note = record("r1", "Note", Some("d1"));
        note.data.insert("title".into(), Value::from("hello"));
        store.create_record(&note).unwrap();
        assert!(matches!(
            store.create_record(&note),
            Err(Error::AlreadyExists)
        ));
        assert!(matches!(
            store.create_record(&record("r2", "Note", Some("missing"))),
            Err(Error::BadRequest(_))
        ));

        store
            .set_record_grant("r1", GranteeKind::Group, GrantAccess::View, "g1")
            .unwrap();
        let fetched = store.get_record("Note", "r1").unwrap().unwrap();
        assert_eq!(fetched.data["title"], "hello");
        assert!(fetched.grants.can_view_groups.contains("g1"));

        // Entity is part of the identity
        assert!(store.get_record("Other", "r1").unwrap().is_none());

        let mut changed = fetched.clone();
        changed.public = true;
        changed.grants = RecordGrants::default();
        store.update_record(&changed).unwrap();
        let fetched = store.get_record("Note", "r1").unwrap().unwrap();
        assert!(fetched.public);
        assert!(fetched.grants.is_empty());

        assert_eq!(store.list_records("Note", "", 10).unwrap().len(), 1);
        assert!(store.delete_record("Note", "r1").unwrap());
        assert!(!store.delete_record("Note", "r1").unwrap());
    }

    #[test]
    fn test_deleting_divider_unsets_instances() {
        let (_temp, store) = open();
        store.create_record(&record("d1", "Division", None)).unwrap();
        store.create_record(&record("r1", "Note", Some("d1"))).unwrap();

        assert!(store.delete_record("Division", "d1").unwrap());
        let orphan = store.get_record("Note", "r1").unwrap().unwrap();
        assert_eq!(orphan.divider, None);
    }

    #[test]
    fn test_roles_and_bindings() {
        let (_temp, store) = open();
        store
            .create_user(&user("u1", "a@example.com", Level::SimpleUser))
            .unwrap();

        let role = Role {
            id: "role-1".to_string(),
            name: "editors".to_string(),
            created_at: Utc::now(),
        };
        store.create_role(&role).unwrap();
        assert!(matches!(store.create_role(&role), Err(Error::AlreadyExists)));

        let fetched = store.get_role_by_name("editors").unwrap().unwrap();
        store.add_role_member(&fetched.id, "u1").unwrap();
        store
            .bind_model_permission(&ModelPermission {
                model: "Note".to_string(),
                operation: Operation::Update,
                role_id: fetched.id.clone(),
            })
            .unwrap();

        assert_eq!(store.list_user_roles("u1").unwrap(), vec!["role-1"]);
        assert_eq!(
            store.list_bound_roles("Note", Operation::Update).unwrap(),
            vec!["role-1"]
        );
        assert!(
            store
                .list_bound_roles("Note", Operation::Delete)
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn test_token_lookup_collision() {
        let (_temp, store) = open();
        store
            .create_user(&user("u1", "a@example.com", Level::SimpleUser))
            .unwrap();

        let now = Utc::now();
        store
            .issue_session(&token("t1", "lookup12", "u1", now), SessionMode::Multi, None)
            .unwrap();

        let result = store.issue_session(
            &token("t2", "lookup12", "u1", now), // Same lookup
            SessionMode::Multi,
            None,
        );
        assert!(matches!(result, Err(Error::TokenLookupCollision)));
    }

    #[test]
    fn test_single_session_rotates_token() {
        let (_temp, store) = open();
        store
            .create_user(&user("u1", "a@example.com", Level::SimpleUser))
            .unwrap();

        let now = Utc::now();
        let first = store
            .issue_session(&token("t1", "aaaa1111", "u1", now), SessionMode::Single, None)
            .unwrap();
        let second = store
            .issue_session(
                &token("t2", "bbbb2222", "u1", now + Duration::seconds(1)),
                SessionMode::Single,
                None,
            )
            .unwrap();

        assert_eq!(first.id, second.id);
        let tokens = store.list_user_tokens("u1").unwrap();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].token_lookup, "bbbb2222");
        assert!(store.get_token_by_lookup("aaaa1111").unwrap().is_none());
    }

    #[test]
    fn test_multi_session_cap_drops_oldest() {
        let (_temp, store) = open();
        store
            .create_user(&user("u1", "a@example.com", Level::SimpleUser))
            .unwrap();

        let now = Utc::now();
        for (i, lookup) in ["aaaa0000", "bbbb1111", "cccc2222"].iter().enumerate() {
            let created = now + Duration::seconds(i as i64);
            store
                .issue_session(
                    &token(&format!("t{i}"), lookup, "u1", created),
                    SessionMode::Multi,
                    Some(2),
                )
                .unwrap();
        }

        let ids: Vec<String> = store
            .list_user_tokens("u1")
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, vec!["t1", "t2"]);
    }

    #[test]
    fn test_check_token_touches_only_before_expiration() {
        let (_temp, store) = open();
        store
            .create_user(&user("u1", "a@example.com", Level::SimpleUser))
            .unwrap();

        let start = Utc::now();
        let grace = Duration::minutes(10);
        store
            .issue_session(&token("t1", "aaaa1111", "u1", start), SessionMode::Multi, None)
            .unwrap();

        let used = start + Duration::minutes(58);
        assert_eq!(
            store.check_token("t1", used, grace).unwrap(),
            Some(TokenStatus::Valid)
        );
        let stored = store.get_token_by_lookup("aaaa1111").unwrap().unwrap();
        assert_eq!(stored.last_action_date, used);

        // Past expiration but within grace of the last action: valid, untouched
        let late = start + Duration::minutes(65);
        assert_eq!(
            store.check_token("t1", late, grace).unwrap(),
            Some(TokenStatus::Valid)
        );
        let stored = store.get_token_by_lookup("aaaa1111").unwrap().unwrap();
        assert_eq!(stored.last_action_date, used);

        let too_late = start + Duration::minutes(70);
        assert_eq!(
            store.check_token("t1", too_late, grace).unwrap(),
            Some(TokenStatus::Expired)
        );

        assert_eq!(store.check_token("gone", too_late, grace).unwrap(), None);
    }
}
