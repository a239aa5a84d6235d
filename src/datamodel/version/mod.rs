//! Version dispatch for datamodel documents.
//!
//! Each supported document version lives in its own module behind
//! [`VersionFormat`]; [`DatamodelVersion`] is the tag that selects one.

mod legacy;
mod v1;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::descriptor::{Document, FieldAttributes, FieldDescriptor, ModelDescriptor, StorageType};
use super::error::{DatamodelError, SpecType};

/// Decoding behaviour of one document version.
pub trait VersionFormat: Sync {
    /// Decodes a raw document of this version into normalized descriptors.
    fn parse(&self, raw: &Value) -> Result<Document, DatamodelError>;

    /// Keys every raw definition of `spec_type` must carry.
    fn required_keys(&self, spec_type: SpecType) -> &'static [&'static str];

    /// Datatype tag to storage type.
    fn equivalence_table(&self) -> &'static [(&'static str, StorageType)];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DatamodelVersion {
    /// Bare list of `std.`-prefixed model mappings.
    #[serde(rename = "legacy")]
    Legacy,
    #[serde(rename = "1.0.0")]
    V1,
}

impl DatamodelVersion {
    /// Picks the version from the document's shape and version tag.
    pub fn detect(raw: &Value) -> Result<Self, DatamodelError> {
        match raw {
            Value::Array(_) => Ok(DatamodelVersion::Legacy),
            Value::Object(map) => {
                let manifest = map.get("manifest").ok_or_else(|| {
                    DatamodelError::Malformed("expected a top-level 'manifest' object".to_string())
                })?;
                let version = manifest
                    .get("version")
                    .ok_or_else(|| {
                        DatamodelError::Malformed("manifest has no 'version'".to_string())
                    })?;
                match version.as_str() {
                    Some("1.0.0") => Ok(DatamodelVersion::V1),
                    Some(other) => Err(DatamodelError::UnknownDatamodelVersion(other.to_string())),
                    None => Err(DatamodelError::UnknownDatamodelVersion(version.to_string())),
                }
            }
            _ => Err(DatamodelError::Malformed(
                "expected a manifest object or a list of models".to_string(),
            )),
        }
    }

    #[must_use]
    pub fn format(self) -> &'static dyn VersionFormat {
        match self {
            DatamodelVersion::Legacy => &legacy::Legacy,
            DatamodelVersion::V1 => &v1::V1,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            DatamodelVersion::Legacy => "legacy",
            DatamodelVersion::V1 => "1.0.0",
        }
    }

    #[must_use]
    pub fn resolve_datatype(self, tag: &str) -> Option<StorageType> {
        self.format()
            .equivalence_table()
            .iter()
            .find(|(name, _)| *name == tag)
            .map(|(_, storage_type)| *storage_type)
    }

    #[must_use]
    pub fn allowed_datatypes(self) -> Vec<String> {
        self.format()
            .equivalence_table()
            .iter()
            .map(|(name, _)| (*name).to_string())
            .collect()
    }
}

/// Detects the version and decodes the document with it.
pub fn decode(raw: &Value) -> Result<Document, DatamodelError> {
    DatamodelVersion::detect(raw)?.format().parse(raw)
}

/// Canonical field shape shared by all versions once keys are renamed.
#[derive(Deserialize)]
struct CanonicalField {
    name: String,
    datatype: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    attributes: FieldAttributes,
}

/// Canonical model shape shared by all versions once keys are renamed.
#[derive(Deserialize)]
struct CanonicalModel {
    uid: String,
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    representation: Option<String>,
    #[serde(default)]
    unique_together: Vec<Vec<String>>,
    #[serde(default)]
    default_public: bool,
    #[serde(default)]
    undivided: bool,
    fields: Vec<CanonicalField>,
}

impl From<CanonicalModel> for ModelDescriptor {
    fn from(model: CanonicalModel) -> Self {
        ModelDescriptor {
            uid: model.uid,
            name: model.name,
            description: model.description,
            representation: model.representation,
            unique_together: model.unique_together,
            default_public: model.default_public,
            undivided: model.undivided,
            fields: model
                .fields
                .into_iter()
                .map(|f| FieldDescriptor {
                    name: f.name,
                    datatype: f.datatype,
                    description: f.description,
                    attributes: f.attributes,
                })
                .collect(),
        }
    }
}

fn as_object<'a>(value: &'a Value, what: &str) -> Result<&'a Map<String, Value>, DatamodelError> {
    value
        .as_object()
        .ok_or_else(|| DatamodelError::Malformed(format!("{what} must be an object")))
}

fn as_array<'a>(value: &'a Value, what: &str) -> Result<&'a Vec<Value>, DatamodelError> {
    value
        .as_array()
        .ok_or_else(|| DatamodelError::Malformed(format!("{what} must be a list")))
}

/// Reads an optional list member of `map`, treating absence as empty.
fn list_at<'a>(map: &'a Map<String, Value>, key: &str) -> Result<&'a [Value], DatamodelError> {
    match map.get(key) {
        Some(value) => as_array(value, key).map(Vec::as_slice),
        None => Ok(&[]),
    }
}

fn from_value<T: DeserializeOwned>(value: Value, what: &str) -> Result<T, DatamodelError> {
    serde_json::from_value(value).map_err(|e| DatamodelError::Malformed(format!("{what}: {e}")))
}

/// Best-effort display name of a raw definition, used in error messages.
fn definition_name(map: &Map<String, Value>, name_key: &str) -> String {
    map.get(name_key)
        .and_then(Value::as_str)
        .unwrap_or("<unnamed>")
        .to_string()
}

fn check_required_keys(
    format: &dyn VersionFormat,
    spec_type: SpecType,
    map: &Map<String, Value>,
    name: &str,
) -> Result<(), DatamodelError> {
    let required = format.required_keys(spec_type);
    if let Some(missing) = required.iter().find(|key| !map.contains_key(**key)) {
        return Err(DatamodelError::MissingKeyForDefinition {
            spec_type,
            name: name.to_string(),
            key: (*missing).to_string(),
            required: required.iter().map(|k| (*k).to_string()).collect(),
        });
    }
    Ok(())
}
