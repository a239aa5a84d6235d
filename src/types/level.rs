use std::fmt;

use serde::{Deserialize, Serialize};

/// A principal's level, derived from its four account flags.
///
/// Ordered: `Blocked < SimpleUser < Manager < Admin < Superuser`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Blocked,
    #[serde(rename = "simpleuser")]
    SimpleUser,
    Manager,
    Admin,
    Superuser,
}

/// The four account flags whose combination defines a [`Level`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FlagBundle {
    pub is_active: bool,
    pub is_staff: bool,
    pub admin: bool,
    pub is_superuser: bool,
}

impl Level {
    pub const ALL: [Level; 5] = [
        Level::Blocked,
        Level::SimpleUser,
        Level::Manager,
        Level::Admin,
        Level::Superuser,
    ];

    pub fn parse(s: &str) -> Option<Level> {
        match s {
            "blocked" => Some(Level::Blocked),
            "simpleuser" => Some(Level::SimpleUser),
            "manager" => Some(Level::Manager),
            "admin" => Some(Level::Admin),
            "superuser" => Some(Level::Superuser),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Level::Blocked => "blocked",
            Level::SimpleUser => "simpleuser",
            Level::Manager => "manager",
            Level::Admin => "admin",
            Level::Superuser => "superuser",
        }
    }

    /// Row of the level table: the exact flags a principal at this level carries.
    #[must_use]
    pub const fn flags(self) -> FlagBundle {
        let (is_active, is_staff, admin, is_superuser) = match self {
            Level::Blocked => (false, false, false, false),
            Level::SimpleUser => (true, false, false, false),
            Level::Manager => (true, true, false, false),
            Level::Admin => (true, true, true, false),
            Level::Superuser => (true, true, true, true),
        };
        FlagBundle {
            is_active,
            is_staff,
            admin,
            is_superuser,
        }
    }

    /// Admin and superuser principals see every divider.
    #[must_use]
    pub const fn bypasses_scope(self) -> bool {
        matches!(self, Level::Admin | Level::Superuser)
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derives the level from a flag combination.
///
/// Combinations outside the level table resolve to the highest level whose
/// distinguishing flag is set, and an inactive account is always blocked.
#[must_use]
pub const fn derive_level(flags: FlagBundle) -> Level {
    if !flags.is_active {
        Level::Blocked
    } else if flags.is_superuser {
        Level::Superuser
    } else if flags.admin {
        Level::Admin
    } else if flags.is_staff {
        Level::Manager
    } else {
        Level::SimpleUser
    }
}

/// Returns the flags for `level`, or `current` unchanged when `level` is not a
/// known level name.
#[must_use]
pub fn set_level(current: FlagBundle, level: &str) -> FlagBundle {
    match Level::parse(level) {
        Some(level) => level.flags(),
        None => current,
    }
}

impl FlagBundle {
    #[must_use]
    pub const fn level(self) -> Level {
        derive_level(self)
    }
}

/// Lowest principal level admitted to an operation on a model.
///
/// `Anonymous` and `Authenticated` are threshold-only pseudo-levels; no
/// principal ever carries them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MinimumLevel {
    Anonymous,
    Authenticated,
    Manager,
    Admin,
    Superuser,
}

impl MinimumLevel {
    pub fn parse(s: &str) -> Option<MinimumLevel> {
        match s {
            "anonymous" => Some(MinimumLevel::Anonymous),
            "authenticated" => Some(MinimumLevel::Authenticated),
            "manager" => Some(MinimumLevel::Manager),
            "admin" => Some(MinimumLevel::Admin),
            "superuser" => Some(MinimumLevel::Superuser),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            MinimumLevel::Anonymous => "anonymous",
            MinimumLevel::Authenticated => "authenticated",
            MinimumLevel::Manager => "manager",
            MinimumLevel::Admin => "admin",
            MinimumLevel::Superuser => "superuser",
        }
    }

    /// Whether an authenticated principal at `level` meets this threshold.
    #[must_use]
    pub fn admits(self, level: Level) -> bool {
        match self {
            MinimumLevel::Anonymous => true,
            MinimumLevel::Authenticated => level >= Level::SimpleUser,
            MinimumLevel::Manager => level >= Level::Manager,
            MinimumLevel::Admin => level >= Level::Admin,
            MinimumLevel::Superuser => level >= Level::Superuser,
        }
    }

    /// Whether a caller without any credential meets this threshold.
    #[must_use]
    pub const fn admits_anonymous(self) -> bool {
        matches!(self, MinimumLevel::Anonymous)
    }
}

impl fmt::Display for MinimumLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The four gated operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Retrieve,
    Update,
    Delete,
}

impl Operation {
    pub const ALL: [Operation; 4] = [
        Operation::Create,
        Operation::Retrieve,
        Operation::Update,
        Operation::Delete,
    ];

    pub fn parse(s: &str) -> Option<Operation> {
        match s {
            "create" => Some(Operation::Create),
            "retrieve" => Some(Operation::Retrieve),
            "update" => Some(Operation::Update),
            "delete" => Some(Operation::Delete),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Retrieve => "retrieve",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
