//! Process configuration.
//!
//! Settings come from an optional TOML file; a few paths can be overridden
//! from the environment.

mod server;

use std::path::{Path, PathBuf};

use chrono::Duration;
use serde::Deserialize;

pub use server::ServerConfig;

use crate::error::{Error, Result};

/// Overrides `[server] data_dir`.
pub const DATA_DIR_ENV: &str = "CONCRETE_DATA_DIR";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub server: ServerConfig,
    pub datamodel: DatamodelConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatamodelConfig {
    /// Overridden by `CONCRETE_DATAMODEL`.
    pub path: PathBuf,
}

impl Default for DatamodelConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./datamodel.json"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    /// One token per user, rotated on every login.
    Single,
    /// A new token per login.
    Multi,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthConfig {
    pub token_lifetime_secs: i64,
    /// How long past expiration a token stays usable after its last action.
    pub grace_period_secs: i64,
    pub session_mode: SessionMode,
    /// Multi-session cap; the oldest tokens beyond it are dropped at login.
    pub max_sessions: Option<usize>,
    pub password_expiry_days: Option<i64>,
    pub acl_roles_enabled: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_lifetime_secs: 60 * 60 * 24,
            grace_period_secs: 60 * 60,
            session_mode: SessionMode::Multi,
            max_sessions: None,
            password_expiry_days: None,
            acl_roles_enabled: false,
        }
    }
}

impl AuthConfig {
    #[must_use]
    pub fn token_lifetime(&self) -> Duration {
        Duration::seconds(self.token_lifetime_secs)
    }

    #[must_use]
    pub fn grace_period(&self) -> Duration {
        Duration::seconds(self.grace_period_secs)
    }

    #[must_use]
    pub fn password_expiry(&self) -> Option<Duration> {
        self.password_expiry_days.map(Duration::days)
    }

    fn check(&self) -> Result<()> {
        if self.token_lifetime_secs <= 0 {
            return Err(Error::Config("auth.token_lifetime_secs must be positive".into()));
        }
        if self.grace_period_secs < 0 {
            return Err(Error::Config("auth.grace_period_secs cannot be negative".into()));
        }
        if self.max_sessions == Some(0) {
            return Err(Error::Config("auth.max_sessions must be at least 1".into()));
        }
        Ok(())
    }
}

impl Settings {
    /// Reads `path` when given, otherwise starts from defaults, then applies
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(path) => Self::from_toml(&std::fs::read_to_string(path)?)?,
            None => Self::default(),
        };
        settings.apply_env();
        settings.auth.check()?;
        Ok(settings)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    fn apply_env(&mut self) {
        if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
            if !dir.trim().is_empty() {
                self.server.data_dir = PathBuf::from(dir);
            }
        }
        self.datamodel.path = crate::datamodel::loader::resolve_path(&self.datamodel.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::from_toml("").unwrap();
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.auth.session_mode, SessionMode::Multi);
        assert!(!settings.auth.acl_roles_enabled);
        assert_eq!(settings.auth.grace_period(), Duration::hours(1));
    }

    #[test]
    fn test_sections() {
        let settings = Settings::from_toml(
            r#"
            [server]
            port = 9000

            [datamodel]
            path = "/etc/concrete/model.yaml"

            [auth]
            session_mode = "single"
            max_sessions = 3
            password_expiry_days = 90
            "#,
        )
        .unwrap();

        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(
            settings.datamodel.path,
            PathBuf::from("/etc/concrete/model.yaml")
        );
        assert_eq!(settings.auth.session_mode, SessionMode::Single);
        assert_eq!(settings.auth.max_sessions, Some(3));
        assert_eq!(settings.auth.password_expiry(), Some(Duration::days(90)));
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(matches!(
            Settings::from_toml("[auth]\nlifetime = 3"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_zero_session_cap_rejected() {
        let mut settings = Settings::default();
        settings.auth.max_sessions = Some(0);
        assert!(settings.auth.check().is_err());
    }
}
