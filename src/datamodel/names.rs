//! Naming rules shared by the validator and the compiler.

/// Built-in entities a datamodel may extend by declaring a model of the same name.
pub const EXTENSIBLE_MODELS: &[&str] = &["User", "Group"];

/// Built-in entity names a datamodel may never declare.
pub const PROTECTED_MODEL_NAMES: &[&str] = &[
    "AuthToken",
    "TemporaryToken",
    "Email",
    "PasswordChangeToken",
    "ResetPasswordToken",
    "ConcreteRole",
    "ConcretePermission",
    "DefaultDivider",
    "DeletedModel",
    "UserConfirmation",
    "SecureConnectToken",
    "SystemVersion",
];

/// Fields compiled onto every entity.
pub const SYSTEM_FIELDS: &[&str] = &[
    "uid",
    "creation_date",
    "modification_date",
    "public",
];

/// Fields compiled onto divider-scoped entities.
pub const SCOPE_FIELDS: &[&str] = &[
    "additional_filtering",
    "can_view_users",
    "can_admin_users",
    "can_view_groups",
    "can_admin_groups",
];

pub const USER_FIELDS: &[&str] = &[
    "email",
    "password",
    "is_active",
    "is_staff",
    "admin",
    "is_superuser",
    "level",
    "password_modification_date",
    "unsubscribe_all",
    "unsubscribe_to",
    "first_name",
    "last_name",
];

pub const GROUP_FIELDS: &[&str] = &["name"];

/// Host-language keywords; compared case-insensitively.
const RESERVED_WORDS: &[&str] = &[
    "and", "as", "assert", "async", "await", "break", "class", "continue", "def", "del", "elif",
    "else", "except", "false", "finally", "for", "from", "global", "if", "import", "in", "is",
    "lambda", "none", "nonlocal", "not", "or", "pass", "raise", "return", "true", "try", "while",
    "with", "yield",
];

#[must_use]
pub fn is_reserved(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    RESERVED_WORDS.contains(&lower.as_str())
}

/// ASCII letter or underscore first, then letters, digits or underscores.
#[must_use]
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Identifier that is not a reserved word.
#[must_use]
pub fn model_name_allowed(name: &str) -> bool {
    is_identifier(name) && !is_reserved(name)
}

#[must_use]
pub fn field_name_allowed(name: &str) -> bool {
    is_identifier(name) && !is_reserved(name)
}

#[must_use]
pub fn is_protected_model(name: &str) -> bool {
    PROTECTED_MODEL_NAMES.contains(&name)
}

/// Whether `field` collides with a name the compiler adds to `model`.
#[must_use]
pub fn is_protected_field(model: &str, field: &str) -> bool {
    if SYSTEM_FIELDS.contains(&field) || SCOPE_FIELDS.contains(&field) {
        return true;
    }
    match model {
        "User" => USER_FIELDS.contains(&field),
        "Group" => GROUP_FIELDS.contains(&field),
        _ => false,
    }
}

/// `ProjectPhase` -> `project_phase`.
#[must_use]
pub fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower = false;
    for c in name.chars() {
        if c.is_ascii_uppercase() {
            if prev_lower {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
            prev_lower = false;
        } else {
            out.push(c);
            prev_lower = c.is_ascii_lowercase() || c.is_ascii_digit();
        }
    }
    out
}

/// Naive English plural used for membership field names.
#[must_use]
pub fn plural(word: &str) -> String {
    if let Some(stem) = word.strip_suffix('y') {
        if !stem.ends_with(['a', 'e', 'i', 'o', 'u']) {
            return format!("{stem}ies");
        }
    }
    if word.ends_with('s') || word.ends_with('x') || word.ends_with("ch") || word.ends_with("sh") {
        return format!("{word}es");
    }
    format!("{word}s")
}
