//! Compiled, immutable entity definitions.
//!
//! A [`CompiledEntity`] is everything the storage and REST layers know about a
//! model: its storage fields, the four minimum levels, how it links to the
//! divider and its resource-query defaults. Instances are handled generically
//! against it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use super::descriptor::{IpProtocol, OnDelete, StorageType};
use crate::types::{MinimumLevel, Operation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Declared,
    /// The declared model every other instance is partitioned by.
    Divider,
    /// Built-in divider used when no permission block names one.
    SynthesizedDivider,
    User,
    Group,
}

/// Value a field takes when an instance is created without it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FieldDefault {
    None,
    Value(Value),
    Now,
    Today,
    EmptyMapping,
    NewUuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldValidator {
    /// Checked by the external file storage on upload.
    FileTypeAndSize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorageField {
    pub name: String,
    pub storage_type: StorageType,
    /// `None` for many-to-many fields, which carry no nullability.
    pub nullable: Option<bool>,
    pub default: FieldDefault,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_digits: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decimal_places: Option<u32>,
    pub unique: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_delete: Option<OnDelete>,
    /// Name of the target entity for relational fields.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reverse: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<IpProtocol>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validator: Option<FieldValidator>,
    /// Managed by the system rather than supplied in instance data.
    pub system: bool,
}

impl StorageField {
    /// A bare field of `storage_type` with no constraints.
    #[must_use]
    pub fn new(name: &str, storage_type: StorageType) -> Self {
        Self {
            name: name.to_string(),
            storage_type,
            nullable: if storage_type == StorageType::ManyToMany {
                None
            } else {
                Some(false)
            },
            default: FieldDefault::None,
            max_length: None,
            max_digits: None,
            decimal_places: None,
            unique: false,
            on_delete: None,
            target: None,
            reverse: None,
            protocol: None,
            validator: None,
            system: false,
        }
    }

    #[must_use]
    pub fn system(mut self) -> Self {
        self.system = true;
        self
    }

    #[must_use]
    pub fn with_default(mut self, default: FieldDefault) -> Self {
        self.default = default;
        self
    }

    #[must_use]
    pub fn nullable(mut self) -> Self {
        if self.nullable.is_some() {
            self.nullable = Some(true);
        }
        self
    }

    #[must_use]
    pub fn targeting(mut self, target: &str) -> Self {
        self.target = Some(target.to_string());
        self
    }

    fn accepts_null(&self) -> bool {
        self.nullable != Some(false)
    }

    /// Checks the JSON shape of a supplied value against the storage type.
    fn check_value(&self, value: &Value) -> Result<(), MaterializeError> {
        if value.is_null() {
            return if self.accepts_null() {
                Ok(())
            } else {
                Err(MaterializeError::NullNotAllowed(self.name.clone()))
            };
        }

        let ok = match self.storage_type {
            StorageType::Boolean => value.is_boolean(),
            StorageType::Char => value
                .as_str()
                .is_some_and(|s| self.max_length.is_none_or(|max| s.chars().count() <= max as usize)),
            StorageType::Text
            | StorageType::Url
            | StorageType::Email
            | StorageType::Uuid
            | StorageType::Date
            | StorageType::DateTime
            | StorageType::File
            | StorageType::Image
            | StorageType::ForeignKey => value.is_string(),
            StorageType::Integer | StorageType::BigInteger => value.is_i64() || value.is_u64(),
            StorageType::Float => value.is_number(),
            StorageType::Decimal => {
                value.is_number() || value.as_str().is_some_and(|s| s.parse::<f64>().is_ok())
            }
            StorageType::Json => true,
            StorageType::ManyToMany => value
                .as_array()
                .is_some_and(|items| items.iter().all(Value::is_string)),
            StorageType::GenericIpAddress => value.as_str().is_some_and(|s| {
                self.protocol.unwrap_or(IpProtocol::Ipv4Or6).accepts(s)
            }),
            StorageType::Point => value
                .as_array()
                .is_some_and(|xy| xy.len() == 2 && xy.iter().all(Value::is_number)),
        };

        if ok {
            Ok(())
        } else {
            Err(MaterializeError::InvalidValue {
                field: self.name.clone(),
                expected: self.storage_type,
            })
        }
    }

    fn default_value(&self, now: DateTime<Utc>) -> Result<Value, MaterializeError> {
        Ok(match &self.default {
            FieldDefault::Value(value) => value.clone(),
            FieldDefault::Now => Value::String(now.to_rfc3339()),
            FieldDefault::Today => Value::String(now.date_naive().to_string()),
            FieldDefault::EmptyMapping => Value::Object(Map::new()),
            FieldDefault::NewUuid => Value::String(uuid::Uuid::new_v4().to_string()),
            FieldDefault::None => match self.nullable {
                None => Value::Array(Vec::new()),
                Some(true) => Value::Null,
                Some(false) => return Err(MaterializeError::MissingValue(self.name.clone())),
            },
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MaterializeError {
    #[error("unknown field '{0}'")]
    UnknownField(String),

    #[error("field '{0}' is managed by the system")]
    SystemField(String),

    #[error("field '{0}' is required")]
    MissingValue(String),

    #[error("field '{0}' cannot be null")]
    NullNotAllowed(String),

    #[error("field '{field}' expects a {expected} value")]
    InvalidValue { field: String, expected: StorageType },
}

/// Minimum level per operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MinimumLevels {
    pub create: MinimumLevel,
    pub retrieve: MinimumLevel,
    pub update: MinimumLevel,
    pub delete: MinimumLevel,
}

impl MinimumLevels {
    /// Applied to declared models for operations their permission block omits.
    pub const DECLARED: MinimumLevels = MinimumLevels {
        create: MinimumLevel::Authenticated,
        retrieve: MinimumLevel::Authenticated,
        update: MinimumLevel::Authenticated,
        delete: MinimumLevel::Superuser,
    };

    /// Applied to built-in entities that the datamodel does not declare.
    pub const BUILT_IN: MinimumLevels = MinimumLevels {
        create: MinimumLevel::Admin,
        retrieve: MinimumLevel::Authenticated,
        update: MinimumLevel::Admin,
        delete: MinimumLevel::Superuser,
    };

    #[must_use]
    pub const fn get(&self, operation: Operation) -> MinimumLevel {
        match operation {
            Operation::Create => self.create,
            Operation::Retrieve => self.retrieve,
            Operation::Update => self.update,
            Operation::Delete => self.delete,
        }
    }
}

/// How instances of an entity relate to the divider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DividerLink {
    /// The divider itself, and undivided models.
    Unscoped,
    /// Nullable foreign key to the divider plus `additional_filtering`.
    ForeignKey { model: String, field: String },
    /// Many-to-many membership, used by `User`.
    Membership { model: String, field: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceQuery {
    pub search_fields: Vec<String>,
    pub filter_fields: Vec<String>,
    pub ordering_fields: Vec<String>,
    pub export_fields: Vec<String>,
    pub display_fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledEntity {
    pub name: String,
    pub uid: String,
    pub description: String,
    pub kind: EntityKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub representation: Option<String>,
    pub default_public: bool,
    pub unique_together: Vec<Vec<String>>,
    pub fields: Vec<StorageField>,
    pub minimum_levels: MinimumLevels,
    pub divider: DividerLink,
    pub resource_query: ResourceQuery,
}

impl CompiledEntity {
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&StorageField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Whether instances are partitioned by the divider.
    #[must_use]
    pub const fn is_scoped(&self) -> bool {
        matches!(self.divider, DividerLink::ForeignKey { .. })
    }

    #[must_use]
    pub fn minimum_level(&self, operation: Operation) -> MinimumLevel {
        self.minimum_levels.get(operation)
    }

    /// `(field, target entity)` for every relational field.
    pub fn relations(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields
            .iter()
            .filter_map(|f| f.target.as_deref().map(|t| (f.name.as_str(), t)))
    }

    /// Builds the data of a new instance: supplied values are checked and
    /// every omitted field takes its default.
    pub fn materialize(
        &self,
        input: &Map<String, Value>,
        now: DateTime<Utc>,
    ) -> Result<Map<String, Value>, MaterializeError> {
        self.check_keys(input)?;

        let mut data = Map::new();
        for field in self.fields.iter().filter(|f| !f.system) {
            let value = match input.get(&field.name) {
                Some(value) => {
                    field.check_value(value)?;
                    value.clone()
                }
                None => field.default_value(now)?,
            };
            data.insert(field.name.clone(), value);
        }
        Ok(data)
    }

    /// Checks a partial update without filling defaults.
    pub fn check_patch(&self, input: &Map<String, Value>) -> Result<(), MaterializeError> {
        self.check_keys(input)?;
        for (key, value) in input {
            if let Some(field) = self.field(key) {
                field.check_value(value)?;
            }
        }
        Ok(())
    }

    fn check_keys(&self, input: &Map<String, Value>) -> Result<(), MaterializeError> {
        for key in input.keys() {
            match self.field(key) {
                None => return Err(MaterializeError::UnknownField(key.clone())),
                Some(field) if field.system => {
                    return Err(MaterializeError::SystemField(key.clone()));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}
