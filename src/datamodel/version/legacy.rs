//! Legacy document format: a flat list of model mappings with `std.`/`ext.`
//! prefixed keys. Relations, permissions and resource queries are declared
//! inline on each model and lifted into the shared tables here.

use std::collections::HashMap;

use serde_json::{Map, Value};

use super::{
    CanonicalModel, VersionFormat, as_array, as_object, check_required_keys, definition_name,
    from_value,
};
use crate::datamodel::descriptor::{
    Document, ModelDescriptor, PermissionSpec, RelationDecl, ResourceQuerySpec, StorageType,
};
use crate::datamodel::error::{DatamodelError, SpecType};
use crate::datamodel::version::DatamodelVersion;

const MODEL_KEYS: &[&str] = &[
    "std.specifier",
    "std.uid",
    "std.name",
    "std.description",
    "ext.model_fields",
];
const FIELD_KEYS: &[&str] = &[
    "std.specifier",
    "std.name",
    "std.description",
    "std.datatype",
];

const MODEL_RENAMES: &[(&str, &str)] = &[
    ("std.uid", "uid"),
    ("std.name", "name"),
    ("std.description", "description"),
    ("ext.representation", "representation"),
    ("ext.unique_together", "unique_together"),
    ("ext.default_public", "default_public"),
    ("ext.undivided", "undivided"),
];

const FIELD_RENAMES: &[(&str, &str)] = &[
    ("std.name", "name"),
    ("std.datatype", "datatype"),
    ("std.description", "description"),
];

const ATTRIBUTE_RENAMES: &[(&str, &str)] = &[
    ("ext.max_length", "max_length"),
    ("ext.max_digits", "max_digits"),
    ("ext.decimal_places", "decimal_places"),
    ("ext.default", "default"),
    ("ext.null", "null"),
    ("ext.unique", "unique"),
    ("ext.on_delete", "on_delete"),
    ("ext.protocol", "protocol"),
    ("ext.to", "target"),
    ("ext.reverse", "reverse"),
];

const PERMISSION_RENAMES: &[(&str, &str)] = &[
    ("ext.minimum_create_level", "create"),
    ("ext.minimum_retrieve_level", "retrieve"),
    ("ext.minimum_update_level", "update"),
    ("ext.minimum_delete_level", "delete"),
    ("ext.lookups", "lookups"),
];

const QUERY_RENAMES: &[(&str, &str)] = &[
    ("ext.search_fields", "search_fields"),
    ("ext.filter_fields", "filter_fields"),
    ("ext.ordering_fields", "ordering_fields"),
    ("ext.export_fields", "export_fields"),
    ("ext.display_fields", "display_fields"),
];

const EQUIVALENCE: &[(&str, StorageType)] = &[
    ("bool", StorageType::Boolean),
    ("text", StorageType::Text),
    ("char", StorageType::Char),
    ("url", StorageType::Url),
    ("int", StorageType::Integer),
    ("float", StorageType::Float),
    ("decimal", StorageType::Decimal),
    ("json", StorageType::Json),
    ("file", StorageType::File),
    ("image", StorageType::Image),
    ("date", StorageType::Date),
    ("datetime", StorageType::DateTime),
    ("email", StorageType::Email),
    ("fk", StorageType::ForeignKey),
    ("m2m", StorageType::ManyToMany),
    ("ip", StorageType::GenericIpAddress),
];

pub struct Legacy;

/// Copies the keys listed in `renames` into a new map under their canonical names.
fn rename(map: &Map<String, Value>, renames: &[(&str, &str)]) -> Map<String, Value> {
    renames
        .iter()
        .filter_map(|(from, to)| map.get(*from).map(|v| ((*to).to_string(), v.clone())))
        .collect()
}

fn check_specifier(
    map: &Map<String, Value>,
    expected: SpecType,
    name: &str,
) -> Result<(), DatamodelError> {
    let expected_tag = expected.to_string();
    let specifier = map.get("std.specifier").and_then(Value::as_str);
    if specifier != Some(expected_tag.as_str()) {
        return Err(DatamodelError::Malformed(format!(
            "definition '{name}' has specifier {specifier:?}, expected '{expected}'"
        )));
    }
    Ok(())
}

/// `ext.to` names its target by model name; rewrite those to the declared uid.
fn resolve_targets(models: &mut [ModelDescriptor]) {
    let uids: HashMap<String, String> = models
        .iter()
        .map(|m| (m.name.clone(), m.uid.clone()))
        .collect();
    for field in models.iter_mut().flat_map(|m| m.fields.iter_mut()) {
        if let Some(uid) = field.attributes.target.as_ref().and_then(|t| uids.get(t)) {
            field.attributes.target = Some(uid.clone());
        }
    }
}

impl Legacy {
    fn canonical_field(&self, raw: &Value) -> Result<Value, DatamodelError> {
        let map = as_object(raw, "field definition")?;
        let name = definition_name(map, "std.name");
        check_required_keys(self, SpecType::Field, map, &name)?;
        check_specifier(map, SpecType::Field, &name)?;

        let mut field = rename(map, FIELD_RENAMES);
        field.insert(
            "attributes".to_string(),
            Value::Object(rename(map, ATTRIBUTE_RENAMES)),
        );
        Ok(Value::Object(field))
    }
}

impl VersionFormat for Legacy {
    fn parse(&self, raw: &Value) -> Result<Document, DatamodelError> {
        let mut doc = Document {
            version: DatamodelVersion::Legacy,
            models: Vec::new(),
            permissions: Vec::new(),
            resource_queries: Vec::new(),
            one_to_many_relations: Vec::new(),
            many_to_many_relations: Vec::new(),
        };

        for raw_model in as_array(raw, "legacy datamodel")? {
            let map = as_object(raw_model, "model definition")?;
            let name = definition_name(map, "std.name");
            check_required_keys(self, SpecType::Model, map, &name)?;
            check_specifier(map, SpecType::Model, &name)?;

            let fields = as_array(&map["ext.model_fields"], "ext.model_fields")?
                .iter()
                .map(|f| self.canonical_field(f))
                .collect::<Result<Vec<_>, _>>()?;

            let mut canonical = rename(map, MODEL_RENAMES);
            canonical.insert("fields".to_string(), Value::Array(fields));
            let model: CanonicalModel = from_value(Value::Object(canonical), &name)?;

            let mut permission = rename(map, PERMISSION_RENAMES);
            permission.insert("model_uid".to_string(), Value::String(model.uid.clone()));
            let permission: PermissionSpec = from_value(Value::Object(permission), &name)?;

            let mut query = rename(map, QUERY_RENAMES);
            query.insert("model_uid".to_string(), Value::String(model.uid.clone()));
            let query: ResourceQuerySpec = from_value(Value::Object(query), &name)?;

            doc.permissions.push(permission);
            doc.resource_queries.push(query);
            doc.models.push(model.into());
        }

        resolve_targets(&mut doc.models);
        for model in &doc.models {
            for field in &model.fields {
                let Some(target) = &field.attributes.target else {
                    continue;
                };
                let relation = RelationDecl {
                    source_model_uid: model.uid.clone(),
                    source_field: field.name.clone(),
                    target_model_uid: target.clone(),
                };
                match DatamodelVersion::Legacy.resolve_datatype(&field.datatype) {
                    Some(StorageType::ForeignKey) => doc.one_to_many_relations.push(relation),
                    Some(StorageType::ManyToMany) => doc.many_to_many_relations.push(relation),
                    _ => {}
                }
            }
        }

        Ok(doc)
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

    fn legacy_project() -> Value {
        json!([{
            "std.specifier": "Model",
            "std.uid": "m-project",
            "std.name": "Project",
            "std.description": "A project",
            "ext.minimum_delete_level": "admin",
            "ext.search_fields": ["name"],
            "ext.model_fields": [
                {"std.specifier": "Field", "std.name": "name", "std.description": "", "std.datatype": "char", "ext.max_length": 40},
                {"std.specifier": "Field", "std.name": "members", "std.description": "", "std.datatype": "m2m", "ext.to": "User"}
            ]
        }])
    }

    #[test]
    fn test_legacy_lifts_inline_blocks() {
        let doc = Legacy.parse(&legacy_project()).unwrap();

        assert_eq!(doc.models[0].name, "Project");
        assert_eq!(doc.models[0].fields[0].attributes.max_length, Some(40));
        assert_eq!(doc.permissions.len(), 1);
        assert_eq!(doc.permissions[0].delete.as_deref(), Some("admin"));
        assert_eq!(
            doc.resource_queries[0].search_fields,
            Some(vec!["name".to_string()])
        );
        assert_eq!(
            doc.many_to_many_relations,
            vec![RelationDecl {
                source_model_uid: "m-project".to_string(),
                source_field: "members".to_string(),
                target_model_uid: "User".to_string(),
            }]
        );
    }

    #[test]
    fn test_legacy_targets_resolve_to_declared_uids() {
        let raw = json!([
            {
                "std.specifier": "Model",
                "std.uid": "c1",
                "std.name": "Company",
                "std.description": "",
                "ext.model_fields": []
            },
            {
                "std.specifier": "Model",
                "std.uid": "p1",
                "std.name": "Project",
                "std.description": "",
                "ext.model_fields": [
                    {"std.specifier": "Field", "std.name": "company_ref", "std.description": "", "std.datatype": "fk", "ext.to": "Company"},
                    {"std.specifier": "Field", "std.name": "members", "std.description": "", "std.datatype": "m2m", "ext.to": "User"}
                ]
            }
        ]);

        let doc = Legacy.parse(&raw).unwrap();

        assert_eq!(
            doc.models[1].fields[0].attributes.target.as_deref(),
            Some("c1")
        );
        assert_eq!(doc.one_to_many_relations[0].target_model_uid, "c1");
        assert_eq!(doc.many_to_many_relations[0].target_model_uid, "User");
    }

    #[test]
    fn test_legacy_missing_key() {
        let raw = json!([{
            "std.specifier": "Model",
            "std.uid": "m1",
            "std.name": "Project",
            "ext.model_fields": []
        }]);

        let err = Legacy.parse(&raw).unwrap_err();
        match err {
            DatamodelError::MissingKeyForDefinition {
                spec_type,
                key,
                required,
                ..
            } => {
                assert_eq!(spec_type, SpecType::Model);
                assert_eq!(key, "std.description");
                assert_eq!(required.len(), MODEL_KEYS.len());
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
