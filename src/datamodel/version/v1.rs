//! Current document format: `manifest.data_modeling` with separate tables keyed
//! by model uid.

use serde_json::Value;

use super::{
    CanonicalModel, VersionFormat, as_array, as_object, check_required_keys, definition_name,
    from_value, list_at,
};
use crate::datamodel::descriptor::{Document, StorageType};
use crate::datamodel::error::{DatamodelError, SpecType};
use crate::datamodel::version::DatamodelVersion;

const MODEL_KEYS: &[&str] = &["uid", "name", "fields"];
const FIELD_KEYS: &[&str] = &["name", "datatype"];

const EQUIVALENCE: &[(&str, StorageType)] = &[
    ("bool", StorageType::Boolean),
    ("txt", StorageType::Text),
    ("char", StorageType::Char),
    ("url", StorageType::Url),
    ("int", StorageType::Integer),
    ("bigint", StorageType::BigInteger),
    ("uid", StorageType::Uuid),
    ("float", StorageType::Float),
    ("decimal", StorageType::Decimal),
    ("json", StorageType::Json),
    ("file", StorageType::File),
    ("image", StorageType::Image),
    ("datetime", StorageType::DateTime),
    ("date", StorageType::Date),
    ("email", StorageType::Email),
    ("fk", StorageType::ForeignKey),
    ("m2m", StorageType::ManyToMany),
    ("ip", StorageType::GenericIpAddress),
    ("point", StorageType::Point),
];

pub struct V1;

impl VersionFormat for V1 {
    fn parse(&self, raw: &Value) -> Result<Document, DatamodelError> {
        let manifest = as_object(&raw["manifest"], "manifest")?;
        let data = manifest.get("data_modeling").ok_or_else(|| {
            DatamodelError::Malformed("manifest has no 'data_modeling'".to_string())
        })?;
        let data = as_object(data, "data_modeling")?;

        let mut models = Vec::new();
        for raw_model in list_at(data, "models")? {
            let map = as_object(raw_model, "model definition")?;
            let name = definition_name(map, "name");
            check_required_keys(self, SpecType::Model, map, &name)?;

            for raw_field in as_array(&map["fields"], "fields")? {
                let field = as_object(raw_field, "field definition")?;
                let field_name = definition_name(field, "name");
                check_required_keys(self, SpecType::Field, field, &field_name)?;
            }

            let model: CanonicalModel = from_value(raw_model.clone(), &name)?;
            models.push(model.into());
        }

        Ok(Document {
            version: DatamodelVersion::V1,
            models,
            permissions: from_value(Value::Array(list_at(data, "permissions")?.to_vec()), "permissions")?,
            resource_queries: from_value(
                Value::Array(list_at(data, "resource_queries")?.to_vec()),
                "resource_queries",
            )?,
            one_to_many_relations: from_value(
                Value::Array(list_at(data, "one_to_many_relations")?.to_vec()),
                "one_to_many_relations",
            )?,
            many_to_many_relations: from_value(
                Value::Array(list_at(data, "many_to_many_relations")?.to_vec()),
                "many_to_many_relations",
            )?,
        })
    }

    fn required_keys(&self, spec_type: SpecType) -> &'static [&'static str] {
        match spec_type {
            SpecType::Model => MODEL_KEYS,
            SpecType::Field => FIELD_KEYS,
        }
    }

    fn equivalence_table(&self) -> &'static [(&'static str, StorageType)] {
        EQUIVALENCE
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_parse_tables() {
        let raw = json!({"manifest": {"version": "1.0.0", "data_modeling": {
            "models": [{
                "uid": "m-project",
                "name": "Project",
                "fields": [
                    {"name": "title", "datatype": "char", "attributes": {"max_length": 80}},
                    {"name": "owner", "datatype": "fk", "attributes": {"target": "User", "on_delete": "CASCADE"}}
                ]
            }],
            "permissions": [{"model_uid": "m-project", "delete": "admin"}],
            "resource_queries": [{"model_uid": "m-project", "search_fields": ["title"]}],
            "one_to_many_relations": [{"source_model_uid": "m-project", "source_field": "owner", "target_model_uid": "User"}]
        }}});

        let doc = V1.parse(&raw).unwrap();
        assert_eq!(doc.models.len(), 1);
        let model = &doc.models[0];
        assert_eq!(model.name, "Project");
        assert_eq!(model.fields[0].attributes.max_length, Some(80));
        assert_eq!(model.fields[1].attributes.on_delete.as_deref(), Some("CASCADE"));
        assert_eq!(doc.permissions[0].delete.as_deref(), Some("admin"));
        assert_eq!(doc.permissions[0].create, None);
        assert_eq!(doc.one_to_many_relations.len(), 1);
        assert!(doc.many_to_many_relations.is_empty());
    }

    #[test]
    fn test_missing_field_key() {
        let raw = json!({"manifest": {"version": "1.0.0", "data_modeling": {
            "models": [{"uid": "m1", "name": "Project", "fields": [{"name": "title"}]}]
        }}});

        let err = V1.parse(&raw).unwrap_err();
        assert_eq!(
            err,
            DatamodelError::MissingKeyForDefinition {
                spec_type: SpecType::Field,
                name: "title".to_string(),
                key: "datatype".to_string(),
                required: vec!["name".to_string(), "datatype".to_string()],
            }
        );
    }

    #[test]
    fn test_missing_model_key() {
        let raw = json!({"manifest": {"version": "1.0.0", "data_modeling": {
            "models": [{"name": "Project", "fields": []}]
        }}});

        let err = V1.parse(&raw).unwrap_err();
        assert!(matches!(
            err,
            DatamodelError::MissingKeyForDefinition { spec_type: SpecType::Model, ref key, .. } if key == "uid"
        ));
    }
}
