pub const SCHEMA: &str = r#"
-- Accounts; the level is derived from the four flags
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    email TEXT NOT NULL UNIQUE,          -- always lowercased
    password_hash TEXT NOT NULL,
    first_name TEXT NOT NULL DEFAULT '',
    last_name TEXT NOT NULL DEFAULT '',
    is_active INTEGER NOT NULL DEFAULT 1,
    is_staff INTEGER NOT NULL DEFAULT 0,
    admin INTEGER NOT NULL DEFAULT 0,
    is_superuser INTEGER NOT NULL DEFAULT 0,
    password_modification_date TEXT NOT NULL,
    unsubscribe_all INTEGER NOT NULL DEFAULT 0,
    data TEXT NOT NULL DEFAULT '{}',     -- datamodel-declared fields, JSON
    created_at TEXT DEFAULT (datetime('now')),
    updated_at TEXT DEFAULT (datetime('now'))
);

-- Instances of every compiled entity except User
CREATE TABLE IF NOT EXISTS records (
    uid TEXT PRIMARY KEY,
    entity TEXT NOT NULL,
    divider TEXT REFERENCES records(uid) ON DELETE SET NULL,
    public INTEGER NOT NULL DEFAULT 0,
    additional_filtering INTEGER NOT NULL DEFAULT 0,
    data TEXT NOT NULL DEFAULT '{}',
    creation_date TEXT NOT NULL,
    modification_date TEXT NOT NULL
);

-- Grant lists: can_{view,admin}_{users,groups}
CREATE TABLE IF NOT EXISTS record_grants (
    record_uid TEXT NOT NULL REFERENCES records(uid) ON DELETE CASCADE,
    grantee_kind TEXT NOT NULL CHECK (grantee_kind IN ('user', 'group')),
    access TEXT NOT NULL CHECK (access IN ('view', 'admin')),
    grantee_id TEXT NOT NULL,
    PRIMARY KEY (record_uid, grantee_kind, access, grantee_id)
);

-- Scope: which divider instances a user belongs to
CREATE TABLE IF NOT EXISTS user_dividers (
    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    divider_uid TEXT NOT NULL REFERENCES records(uid) ON DELETE CASCADE,
    PRIMARY KEY (user_id, divider_uid)
);

-- Groups are records of the Group entity
CREATE TABLE IF NOT EXISTS group_members (
    group_uid TEXT NOT NULL REFERENCES records(uid) ON DELETE CASCADE,
    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    PRIMARY KEY (group_uid, user_id)
);

-- ACL roles and their per-model, per-operation bindings
CREATE TABLE IF NOT EXISTS roles (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    created_at TEXT DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS role_members (
    role_id TEXT NOT NULL REFERENCES roles(id) ON DELETE CASCADE,
    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    PRIMARY KEY (role_id, user_id)
);

CREATE TABLE IF NOT EXISTS model_permissions (
    model TEXT NOT NULL,
    operation TEXT NOT NULL CHECK (operation IN ('create', 'retrieve', 'update', 'delete')),
    role_id TEXT NOT NULL REFERENCES roles(id) ON DELETE CASCADE,
    PRIMARY KEY (model, operation, role_id)
);

-- Session tokens
CREATE TABLE IF NOT EXISTS tokens (
    id TEXT PRIMARY KEY,
    token_hash TEXT NOT NULL,          -- argon2id hash with embedded salt
    token_lookup TEXT NOT NULL,        -- first 8 chars of a UUID for fast lookup
    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    created_at TEXT DEFAULT (datetime('now')),
    expiration_date TEXT NOT NULL,
    last_action_date TEXT NOT NULL
);

-- Create indexes
CREATE INDEX IF NOT EXISTS idx_records_entity ON records(entity);
CREATE INDEX IF NOT EXISTS idx_records_divider ON records(divider);
CREATE INDEX IF NOT EXISTS idx_record_grants_grantee ON record_grants(grantee_kind, grantee_id);
CREATE INDEX IF NOT EXISTS idx_user_dividers_divider ON user_dividers(divider_uid);
CREATE INDEX IF NOT EXISTS idx_group_members_user ON group_members(user_id);
CREATE INDEX IF NOT EXISTS idx_role_members_user ON role_members(user_id);
CREATE UNIQUE INDEX IF NOT EXISTS idx_tokens_lookup ON tokens(token_lookup);
CREATE INDEX IF NOT EXISTS idx_tokens_user ON tokens(user_id);
"#;
