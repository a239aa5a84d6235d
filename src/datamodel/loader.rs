//! Reads the datamodel document from disk.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use super::error::DatamodelError;

/// Environment variable overriding the configured datamodel path.
pub const DATAMODEL_ENV: &str = "CONCRETE_DATAMODEL";

/// The environment override when set and non-empty, otherwise `configured`.
#[must_use]
pub fn resolve_path(configured: &Path) -> PathBuf {
    match std::env::var(DATAMODEL_ENV) {
        Ok(path) if !path.trim().is_empty() => PathBuf::from(path),
        _ => configured.to_path_buf(),
    }
}

/// Reads and parses a JSON or YAML document into a generic value tree.
///
/// `.yaml`/`.yml` files are parsed as YAML, everything else as JSON.
pub fn load(path: &Path) -> Result<Value, DatamodelError> {
    let text = std::fs::read_to_string(path).map_err(|e| DatamodelError::Unreadable {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    debug!(path = %path.display(), bytes = text.len(), "Read datamodel document");
    parse_str(&text, is_yaml(path)).map_err(|reason| DatamodelError::Unparsable {
        path: path.display().to_string(),
        reason,
    })
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml" | "yml")
    )
}

/// Parses document text; errors are returned as plain messages.
pub fn parse_str(text: &str, yaml: bool) -> Result<Value, String> {
    if yaml {
        serde_yaml::from_str::<Value>(text).map_err(|e| e.to_string())
    } else {
        serde_json::from_str::<Value>(text).map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_load_json_and_yaml() {
        let dir = TempDir::new().unwrap();
        let json_path = dir.path().join("model.json");
        fs::write(&json_path, r#"{"manifest": {"version": "1.0.0"}}"#).unwrap();
        let yaml_path = dir.path().join("model.yaml");
        fs::write(&yaml_path, "manifest:\n  version: \"1.0.0\"\n").unwrap();

        assert_eq!(load(&json_path).unwrap(), load(&yaml_path).unwrap());
    }

    #[test]
    fn test_missing_file_is_unreadable() {
        let dir = TempDir::new().unwrap();
        let err = load(&dir.path().join("absent.json")).unwrap_err();
        assert_eq!(err.code(), "DATAMODEL_UNREADABLE");
    }

    #[test]
    fn test_garbage_is_unparsable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.json");
        fs::write(&path, "{ not json").unwrap();
        let err = load(&path).unwrap_err();
        assert_eq!(err.code(), "DATAMODEL_UNPARSABLE");
    }
}
