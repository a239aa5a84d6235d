//! Document-wide cross-reference validation.
//!
//! Checks run in a fixed order and the first failure is returned; nothing is
//! compiled from a document that fails here.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use super::descriptor::{Document, IpProtocol, ModelDescriptor, OnDelete, StorageType};
use super::error::{DatamodelError, ModelBlock};
use super::compile::{DEFAULT_DECIMAL_PLACES, DEFAULT_MAX_DIGITS};
use super::names;
use crate::types::{MinimumLevel, Operation};

pub fn validate(doc: &Document) -> Result<(), DatamodelError> {
    validate_model_identity(doc)?;

    // Reverse names already claimed, keyed by resolved target model name.
    let mut reverses: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

    for model in &doc.models {
        validate_names(model)?;
        validate_unique_fields(model)?;
        validate_relations(doc, model)?;
        validate_reverses(doc, model, &mut reverses)?;
        validate_blocks(doc, model)?;
        validate_ip_fields(doc, model)?;
        validate_datatypes(doc, model)?;
        debug!(model = %model.name, fields = model.fields.len(), "Validated model");
    }

    Ok(())
}

fn validate_model_identity(doc: &Document) -> Result<(), DatamodelError> {
    let mut seen_names = BTreeSet::new();
    let mut seen_uids = BTreeSet::new();
    for model in &doc.models {
        if !seen_names.insert(model.name.as_str()) {
            return Err(DatamodelError::DuplicatedModelName {
                model: model.name.clone(),
            });
        }
        if !seen_uids.insert(model.uid.as_str()) {
            return Err(DatamodelError::DuplicatedModelUid {
                uid: model.uid.clone(),
            });
        }
    }
    Ok(())
}

fn validate_names(model: &ModelDescriptor) -> Result<(), DatamodelError> {
    if names::is_protected_model(&model.name) {
        return Err(DatamodelError::ProtectedModelName {
            model: model.name.clone(),
        });
    }
    if !names::model_name_allowed(&model.name) {
        return Err(DatamodelError::NameNotAllowed {
            model: model.name.clone(),
            name: model.name.clone(),
        });
    }

    for field in &model.fields {
        if !names::field_name_allowed(&field.name) {
            return Err(DatamodelError::NameNotAllowed {
                model: model.name.clone(),
                name: field.name.clone(),
            });
        }
        if names::is_protected_field(&model.name, &field.name) {
            return Err(DatamodelError::ProtectedFieldName {
                model: model.name.clone(),
                field: field.name.clone(),
            });
        }
    }
    Ok(())
}

fn validate_unique_fields(model: &ModelDescriptor) -> Result<(), DatamodelError> {
    let mut seen = BTreeSet::new();
    for field in &model.fields {
        if !seen.insert(field.name.as_str()) {
            return Err(DatamodelError::DuplicatedFields {
                model: model.name.clone(),
                field: field.name.clone(),
            });
        }
    }
    Ok(())
}

fn validate_relations(doc: &Document, model: &ModelDescriptor) -> Result<(), DatamodelError> {
    for field in &model.fields {
        let Some(storage_type) = doc.storage_type(field) else {
            continue;
        };
        if !storage_type.is_relational() {
            continue;
        }

        let Some(target) = field.attributes.target.as_deref() else {
            return Err(DatamodelError::MissingRelationTarget {
                model: model.name.clone(),
                field: field.name.clone(),
            });
        };
        if doc.resolve_model_name(target).is_none() {
            return Err(DatamodelError::UnknownRelationTarget {
                model: model.name.clone(),
                field: field.name.clone(),
                target: target.to_string(),
            });
        }
        if storage_type == StorageType::ForeignKey {
            if let Some(rule) = field.attributes.on_delete.as_deref() {
                if OnDelete::parse(rule).is_none() {
                    return Err(DatamodelError::InvalidOnDelete {
                        model: model.name.clone(),
                        field: field.name.clone(),
                        rule: rule.to_string(),
                    });
                }
            }
        }

        let count = doc
            .relation_table(storage_type)
            .iter()
            .filter(|r| r.matches(&model.uid, &field.name, target))
            .count();
        match count {
            0 => {
                return Err(DatamodelError::MissingRelationForModel {
                    model: model.name.clone(),
                    field: field.name.clone(),
                    target: target.to_string(),
                });
            }
            1 => {}
            count => {
                return Err(DatamodelError::DuplicatedRelationForModel {
                    model: model.name.clone(),
                    field: field.name.clone(),
                    target: target.to_string(),
                    count,
                });
            }
        }
    }
    Ok(())
}

fn validate_reverses(
    doc: &Document,
    model: &ModelDescriptor,
    reverses: &mut BTreeMap<String, BTreeSet<String>>,
) -> Result<(), DatamodelError> {
    for field in &model.fields {
        let is_relational = doc
            .storage_type(field)
            .is_some_and(StorageType::is_relational);
        let (Some(target), Some(reverse)) = (
            field.attributes.target.as_deref(),
            field.attributes.reverse.as_deref(),
        ) else {
            continue;
        };
        if !is_relational {
            continue;
        }
        let target_name = doc.resolve_model_name(target).unwrap_or(target);
        if !reverses
            .entry(target_name.to_string())
            .or_default()
            .insert(reverse.to_string())
        {
            return Err(DatamodelError::DuplicatedReverseForModel {
                model: model.name.clone(),
                field: field.name.clone(),
                target: target_name.to_string(),
                reverse: reverse.to_string(),
            });
        }
    }
    Ok(())
}

fn validate_blocks(doc: &Document, model: &ModelDescriptor) -> Result<(), DatamodelError> {
    let permissions: Vec<_> = doc
        .permissions
        .iter()
        .filter(|p| p.model_uid == model.uid)
        .collect();
    check_block_count(model, ModelBlock::Permissions, permissions.len())?;

    let queries = doc
        .resource_queries
        .iter()
        .filter(|q| q.model_uid == model.uid)
        .count();
    check_block_count(model, ModelBlock::ResourceQueries, queries)?;

    let permission = permissions[0];
    for operation in Operation::ALL {
        let declared = match operation {
            Operation::Create => permission.create.as_deref(),
            Operation::Retrieve => permission.retrieve.as_deref(),
            Operation::Update => permission.update.as_deref(),
            Operation::Delete => permission.delete.as_deref(),
        };
        if let Some(level) = declared {
            if MinimumLevel::parse(level).is_none() {
                return Err(DatamodelError::UnknownMinimumLevel {
                    model: model.name.clone(),
                    operation: operation.as_str().to_string(),
                    level: level.to_string(),
                });
            }
        }
    }
    Ok(())
}

fn check_block_count(
    model: &ModelDescriptor,
    block: ModelBlock,
    count: usize,
) -> Result<(), DatamodelError> {
    match count {
        0 => Err(DatamodelError::MissingPermissionsOrQueriesForModel {
            model: model.name.clone(),
            block,
        }),
        1 => Ok(()),
        count => Err(DatamodelError::DuplicatedPermissionsOrQueriesForModel {
            model: model.name.clone(),
            block,
            count,
        }),
    }
}

fn validate_ip_fields(doc: &Document, model: &ModelDescriptor) -> Result<(), DatamodelError> {
    for field in &model.fields {
        if doc.storage_type(field) != Some(StorageType::GenericIpAddress) {
            continue;
        }
        let protocol = match field.attributes.protocol.as_deref() {
            None => IpProtocol::Ipv4Or6,
            Some(raw) => IpProtocol::parse(raw).ok_or_else(|| DatamodelError::UnknownIpProtocol {
                model: model.name.clone(),
                field: field.name.clone(),
                protocol: raw.to_string(),
                allowed: IpProtocol::AUTHORIZED.iter().map(|p| (*p).to_string()).collect(),
            })?,
        };
        let Some(default) = &field.attributes.default else {
            continue;
        };
        if default.is_null() {
            continue;
        }
        let accepted = default.as_str().is_some_and(|v| protocol.accepts(v));
        if !accepted {
            return Err(DatamodelError::InvalidDefaultIp {
                model: model.name.clone(),
                field: field.name.clone(),
                value: default.as_str().map_or_else(|| default.to_string(), str::to_string),
                protocol: protocol.as_str().to_string(),
            });
        }
    }
    Ok(())
}

fn validate_datatypes(doc: &Document, model: &ModelDescriptor) -> Result<(), DatamodelError> {
    for field in &model.fields {
        if doc.storage_type(field).is_none() {
            return Err(DatamodelError::UnknownDatatypeForField {
                model: model.name.clone(),
                field: field.name.clone(),
                datatype: field.datatype.clone(),
                allowed: doc.version.allowed_datatypes(),
            });
        }
        if doc.storage_type(field) == Some(StorageType::Decimal) {
            let attrs = &field.attributes;
            let max_digits = attrs.max_digits.unwrap_or(DEFAULT_MAX_DIGITS);
            let decimal_places = attrs.decimal_places.unwrap_or(DEFAULT_DECIMAL_PLACES);
            if decimal_places > max_digits {
                return Err(DatamodelError::InvalidDecimalPrecision {
                    model: model.name.clone(),
                    field: field.name.clone(),
                    max_digits,
                    decimal_places,
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::datamodel::version::decode;

    fn document(models: serde_json::Value, extra: serde_json::Value) -> Document {
        let mut data = json!({
            "models": models,
            "permissions": [],
            "resource_queries": [],
            "one_to_many_relations": [],
            "many_to_many_relations": [],
        });
        for (key, value) in extra.as_object().unwrap() {
            data[key] = value.clone();
        }
        decode(&json!({"manifest": {"version": "1.0.0", "data_modeling": data}})).unwrap()
    }

    fn blocks(uid: &str) -> serde_json::Value {
        json!({
            "permissions": [{"model_uid": uid}],
            "resource_queries": [{"model_uid": uid}],
        })
    }

    #[test]
    fn test_valid_document_passes() {
        let doc = document(
            json!([{"uid": "m1", "name": "Project", "fields": [
                {"name": "title", "datatype": "char"},
                {"name": "address", "datatype": "ip", "attributes": {"protocol": "ipv4", "default": "10.0.0.1"}}
            ]}]),
            blocks("m1"),
        );
        assert_eq!(validate(&doc), Ok(()));
    }

    #[test]
    fn test_decimal_places_exceeding_max_digits() {
        let doc = document(
            json!([{"uid": "m1", "name": "Project", "fields": [
                {"name": "ratio", "datatype": "decimal", "attributes": {"max_digits": 5, "decimal_places": 6}}
            ]}]),
            blocks("m1"),
        );
        assert_eq!(
            validate(&doc),
            Err(DatamodelError::InvalidDecimalPrecision {
                model: "Project".to_string(),
                field: "ratio".to_string(),
                max_digits: 5,
                decimal_places: 6,
            })
        );

        let doc = document(
            json!([{"uid": "m1", "name": "Project", "fields": [
                {"name": "ratio", "datatype": "decimal", "attributes": {"max_digits": 6, "decimal_places": 6}}
            ]}]),
            blocks("m1"),
        );
        assert_eq!(validate(&doc), Ok(()));
    }

    #[test]
    fn test_protected_model_name() {
        let doc = document(
            json!([{"uid": "m1", "name": "AuthToken", "fields": []}]),
            blocks("m1"),
        );
        assert!(matches!(
            validate(&doc),
            Err(DatamodelError::ProtectedModelName { .. })
        ));
    }

    #[test]
    fn test_protected_field_name() {
        let doc = document(
            json!([{"uid": "m1", "name": "Project", "fields": [{"name": "creation_date", "datatype": "datetime"}]}]),
            blocks("m1"),
        );
        assert_eq!(
            validate(&doc),
            Err(DatamodelError::ProtectedFieldName {
                model: "Project".to_string(),
                field: "creation_date".to_string(),
            })
        );
    }

    #[test]
    fn test_invalid_on_delete() {
        let doc = document(
            json!([{"uid": "m1", "name": "Project", "fields": [
                {"name": "owner", "datatype": "fk", "attributes": {"target": "User", "on_delete": "RESTRICT"}}
            ]}]),
            json!({
                "permissions": [{"model_uid": "m1"}],
                "resource_queries": [{"model_uid": "m1"}],
                "one_to_many_relations": [{"source_model_uid": "m1", "source_field": "owner", "target_model_uid": "User"}],
            }),
        );
        assert!(matches!(
            validate(&doc),
            Err(DatamodelError::InvalidOnDelete { rule, .. }) if rule == "RESTRICT"
        ));
    }

    #[test]
    fn test_unknown_minimum_level() {
        let doc = document(
            json!([{"uid": "m1", "name": "Project", "fields": []}]),
            json!({
                "permissions": [{"model_uid": "m1", "update": "root"}],
                "resource_queries": [{"model_uid": "m1"}],
            }),
        );
        assert_eq!(
            validate(&doc),
            Err(DatamodelError::UnknownMinimumLevel {
                model: "Project".to_string(),
                operation: "update".to_string(),
                level: "root".to_string(),
            })
        );
    }

    #[test]
    fn test_duplicate_model_uid() {
        let doc = document(
            json!([
                {"uid": "m1", "name": "Project", "fields": []},
                {"uid": "m1", "name": "Task", "fields": []}
            ]),
            blocks("m1"),
        );
        assert_eq!(
            validate(&doc),
            Err(DatamodelError::DuplicatedModelUid {
                uid: "m1".to_string()
            })
        );
    }

    #[test]
    fn test_relation_to_unknown_model() {
        let doc = document(
            json!([{"uid": "m1", "name": "Project", "fields": [
                {"name": "parent", "datatype": "fk", "attributes": {"target": "m-missing"}}
            ]}]),
            blocks("m1"),
        );
        assert!(matches!(
            validate(&doc),
            Err(DatamodelError::UnknownRelationTarget { .. })
        ));
    }
}
