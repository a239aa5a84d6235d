//! Boot-time datamodel errors.
//!
//! Every variant aborts startup. Each one carries the offending model, field
//! or key and maps to a stable machine-readable code via
//! [`DatamodelError::code`].

use std::fmt;

use thiserror::Error;

/// The two kinds of raw definition a datamodel document contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecType {
    Model,
    Field,
}

impl fmt::Display for SpecType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpecType::Model => f.write_str("Model"),
            SpecType::Field => f.write_str("Field"),
        }
    }
}

/// Per-model blocks that must appear exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelBlock {
    Permissions,
    ResourceQueries,
}

impl fmt::Display for ModelBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelBlock::Permissions => f.write_str("permissions"),
            ModelBlock::ResourceQueries => f.write_str("resource_queries"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DatamodelError {
    #[error("cannot read datamodel '{path}': {reason}")]
    Unreadable { path: String, reason: String },

    #[error("cannot parse datamodel '{path}': {reason}")]
    Unparsable { path: String, reason: String },

    #[error("malformed datamodel: {0}")]
    Malformed(String),

    #[error("unknown datamodel version '{0}'")]
    UnknownDatamodelVersion(String),

    #[error("missing key '{key}' for {spec_type} definition '{name}' (required keys: {})", .required.join(", "))]
    MissingKeyForDefinition {
        spec_type: SpecType,
        name: String,
        key: String,
        required: Vec<String>,
    },

    #[error("name '{name}' is not allowed in model '{model}'")]
    NameNotAllowed { model: String, name: String },

    #[error("model name '{model}' is protected")]
    ProtectedModelName { model: String },

    #[error("field name '{field}' is protected in model '{model}'")]
    ProtectedFieldName { model: String, field: String },

    #[error("model name '{model}' is declared more than once")]
    DuplicatedModelName { model: String },

    #[error("model uid '{uid}' is declared more than once")]
    DuplicatedModelUid { uid: String },

    #[error("field '{field}' is declared more than once in model '{model}'")]
    DuplicatedFields { model: String, field: String },

    #[error("relational field '{field}' of model '{model}' has no target")]
    MissingRelationTarget { model: String, field: String },

    #[error("field '{field}' of model '{model}' targets unknown model '{target}'")]
    UnknownRelationTarget {
        model: String,
        field: String,
        target: String,
    },

    #[error("no relation declared for field '{field}' of model '{model}' towards '{target}'")]
    MissingRelationForModel {
        model: String,
        field: String,
        target: String,
    },

    #[error(
        "relation for field '{field}' of model '{model}' towards '{target}' is declared {count} times"
    )]
    DuplicatedRelationForModel {
        model: String,
        field: String,
        target: String,
        count: usize,
    },

    #[error("reverse name '{reverse}' of field '{field}' in model '{model}' is already used towards '{target}'")]
    DuplicatedReverseForModel {
        model: String,
        field: String,
        target: String,
        reverse: String,
    },

    #[error("no {block} block declared for model '{model}'")]
    MissingPermissionsOrQueriesForModel { model: String, block: ModelBlock },

    #[error("{block} block is declared {count} times for model '{model}'")]
    DuplicatedPermissionsOrQueriesForModel {
        model: String,
        block: ModelBlock,
        count: usize,
    },

    #[error("unknown IP protocol '{protocol}' for field '{field}' of model '{model}' (allowed: {})", .allowed.join(", "))]
    UnknownIpProtocol {
        model: String,
        field: String,
        protocol: String,
        allowed: Vec<String>,
    },

    #[error("default '{value}' of field '{field}' in model '{model}' is not a valid {protocol} address")]
    InvalidDefaultIp {
        model: String,
        field: String,
        value: String,
        protocol: String,
    },

    #[error("unknown datatype '{datatype}' for field '{field}' of model '{model}' (allowed: {})", .allowed.join(", "))]
    UnknownDatatypeForField {
        model: String,
        field: String,
        datatype: String,
        allowed: Vec<String>,
    },

    #[error("decimal field '{field}' of model '{model}' has {decimal_places} decimal places but only {max_digits} digits")]
    InvalidDecimalPrecision {
        model: String,
        field: String,
        max_digits: u32,
        decimal_places: u32,
    },

    #[error("invalid on_delete rule '{rule}' for field '{field}' of model '{model}' (allowed: CASCADE, SET_NULL, PROTECT)")]
    InvalidOnDelete {
        model: String,
        field: String,
        rule: String,
    },

    #[error("unknown minimum level '{level}' for {operation} on model '{model}'")]
    UnknownMinimumLevel {
        model: String,
        operation: String,
        level: String,
    },

    #[error("divider lookup '{lookup}' of model '{model}' does not name a declared model")]
    UnknownDividerModel { model: String, lookup: String },

    #[error("multiple divider models declared ({}); only one is supported", .candidates.join(", "))]
    MultipleDividers { candidates: Vec<String> },
}

impl DatamodelError {
    /// Stable machine-readable code for API payloads and CLI output.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            DatamodelError::Unreadable { .. } => "DATAMODEL_UNREADABLE",
            DatamodelError::Unparsable { .. } => "DATAMODEL_UNPARSABLE",
            DatamodelError::Malformed(_) => "DATAMODEL_MALFORMED",
            DatamodelError::UnknownDatamodelVersion(_) => "UNKNOWN_DATAMODEL_VERSION",
            DatamodelError::MissingKeyForDefinition { .. } => "MISSING_KEY_FOR_DEFINITION",
            DatamodelError::NameNotAllowed { .. } => "NAME_NOT_ALLOWED",
            DatamodelError::ProtectedModelName { .. } => "PROTECTED_MODEL_NAME",
            DatamodelError::ProtectedFieldName { .. } => "PROTECTED_FIELD_NAME",
            DatamodelError::DuplicatedModelName { .. } => "DUPLICATED_MODEL_NAME",
            DatamodelError::DuplicatedModelUid { .. } => "DUPLICATED_MODEL_UID",
            DatamodelError::DuplicatedFields { .. } => "DUPLICATED_FIELDS",
            DatamodelError::MissingRelationTarget { .. } => "MISSING_RELATION_TARGET",
            DatamodelError::UnknownRelationTarget { .. } => "UNKNOWN_RELATION_TARGET",
            DatamodelError::MissingRelationForModel { .. } => "MISSING_RELATION_FOR_MODEL",
            DatamodelError::DuplicatedRelationForModel { .. } => "DUPLICATED_RELATION_FOR_MODEL",
            DatamodelError::DuplicatedReverseForModel { .. } => "DUPLICATED_REVERSE_FOR_MODEL",
            DatamodelError::MissingPermissionsOrQueriesForModel { .. } => {
                "MISSING_PERMISSIONS_OR_QUERIES_FOR_MODEL"
            }
            DatamodelError::DuplicatedPermissionsOrQueriesForModel { .. } => {
                "DUPLICATED_PERMISSIONS_OR_QUERIES_FOR_MODEL"
            }
            DatamodelError::UnknownIpProtocol { .. } => "UNKNOWN_IP_PROTOCOL",
            DatamodelError::InvalidDefaultIp { .. } => "INVALID_DEFAULT_IP",
            DatamodelError::UnknownDatatypeForField { .. } => "UNKNOWN_DATATYPE_FOR_FIELD",
            DatamodelError::InvalidDecimalPrecision { .. } => "INVALID_DECIMAL_PRECISION",
            DatamodelError::InvalidOnDelete { .. } => "INVALID_ON_DELETE",
            DatamodelError::UnknownMinimumLevel { .. } => "UNKNOWN_MINIMUM_LEVEL",
            DatamodelError::UnknownDividerModel { .. } => "UNKNOWN_DIVIDER_MODEL",
            DatamodelError::MultipleDividers { .. } => "MULTIPLE_DIVIDERS",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_key_lists_required_set() {
        let err = DatamodelError::MissingKeyForDefinition {
            spec_type: SpecType::Field,
            name: "title".to_string(),
            key: "datatype".to_string(),
            required: vec!["name".to_string(), "datatype".to_string()],
        };
        let message = err.to_string();
        assert!(message.contains("Field definition 'title'"));
        assert!(message.contains("required keys: name, datatype"));
        assert_eq!(err.code(), "MISSING_KEY_FOR_DEFINITION");
    }

    #[test]
    fn test_block_display() {
        let err = DatamodelError::DuplicatedPermissionsOrQueriesForModel {
            model: "Project".to_string(),
            block: ModelBlock::Permissions,
            count: 2,
        };
        assert_eq!(
            err.to_string(),
            "permissions block is declared 2 times for model 'Project'"
        );
    }
}
