//! Datamodel compiler tests driven through the public API.

mod common;

use std::fs;

use serde_json::{Value, json};
use tempfile::TempDir;

use common::{company_workspace, manifest};
use concrete::datamodel::{
    self, DEFAULT_DIVIDER, DatamodelError, DatamodelVersion, DividerLink, EntityKind,
};
use concrete::types::MinimumLevel;

fn compile_err(doc: &Value) -> DatamodelError {
    datamodel::compile_value(doc).expect_err("datamodel should be rejected")
}

/// A single model with its blocks plus whatever relations `extra` adds.
fn single_model(model: Value, extra: Value) -> Value {
    let uid = model["uid"].clone();
    let mut data = json!({
        "models": [model],
        "permissions": [{"model_uid": uid}],
        "resource_queries": [{"model_uid": uid}],
        "one_to_many_relations": [],
        "many_to_many_relations": []
    });
    if let Some(extra) = extra.as_object() {
        for (key, value) in extra {
            data[key] = value.clone();
        }
    }
    manifest(data)
}

#[test]
fn test_group_members_without_relation() {
    let doc = single_model(
        json!({"uid": "m-group", "name": "Group", "fields": [
            {"name": "members", "datatype": "m2m", "attributes": {"target": "User"}}
        ]}),
        json!({}),
    );

    let err = compile_err(&doc);
    assert_eq!(err.code(), "MISSING_RELATION_FOR_MODEL");
    assert_eq!(
        err,
        DatamodelError::MissingRelationForModel {
            model: "Group".to_string(),
            field: "members".to_string(),
            target: "User".to_string(),
        }
    );
}

#[test]
fn test_duplicated_relation() {
    let relation = json!({"source_model_uid": "m-group", "source_field": "members", "target_model_uid": "User"});
    let doc = single_model(
        json!({"uid": "m-group", "name": "Group", "fields": [
            {"name": "members", "datatype": "m2m", "attributes": {"target": "User"}}
        ]}),
        json!({"many_to_many_relations": [relation.clone(), relation]}),
    );

    let err = compile_err(&doc);
    assert_eq!(err.code(), "DUPLICATED_RELATION_FOR_MODEL");
    assert!(matches!(
        err,
        DatamodelError::DuplicatedRelationForModel { count: 2, .. }
    ));
}

#[test]
fn test_reserved_field_name_on_user() {
    let doc = single_model(
        json!({"uid": "m-user", "name": "User", "fields": [
            {"name": "break", "datatype": "char"}
        ]}),
        json!({}),
    );

    assert_eq!(
        compile_err(&doc),
        DatamodelError::NameNotAllowed {
            model: "User".to_string(),
            name: "break".to_string(),
        }
    );
}

#[test]
fn test_duplicated_permission_blocks() {
    let doc = manifest(json!({
        "models": [{"uid": "m-project", "name": "Project", "fields": []}],
        "permissions": [{"model_uid": "m-project"}, {"model_uid": "m-project", "delete": "admin"}],
        "resource_queries": [{"model_uid": "m-project"}],
        "one_to_many_relations": [],
        "many_to_many_relations": []
    }));

    let err = compile_err(&doc);
    assert_eq!(err.code(), "DUPLICATED_PERMISSIONS_OR_QUERIES_FOR_MODEL");
}

#[test]
fn test_missing_query_block() {
    let doc = manifest(json!({
        "models": [{"uid": "m-project", "name": "Project", "fields": []}],
        "permissions": [{"model_uid": "m-project"}],
        "resource_queries": [],
        "one_to_many_relations": [],
        "many_to_many_relations": []
    }));

    assert_eq!(
        compile_err(&doc).code(),
        "MISSING_PERMISSIONS_OR_QUERIES_FOR_MODEL"
    );
}

#[test]
fn test_rejections_by_class() {
    let cases: Vec<(Value, &str)> = vec![
        (
            single_model(json!({"uid": "m1", "name": "AuthToken", "fields": []}), json!({})),
            "PROTECTED_MODEL_NAME",
        ),
        (
            single_model(json!({"uid": "m1", "name": "2fast", "fields": []}), json!({})),
            "NAME_NOT_ALLOWED",
        ),
        (
            single_model(
                json!({"uid": "m1", "name": "Project", "fields": [{"name": "uid", "datatype": "char"}]}),
                json!({}),
            ),
            "PROTECTED_FIELD_NAME",
        ),
        (
            single_model(
                json!({"uid": "m1", "name": "Project", "fields": [
                    {"name": "title", "datatype": "char"},
                    {"name": "title", "datatype": "txt"}
                ]}),
                json!({}),
            ),
            "DUPLICATED_FIELDS",
        ),
        (
            single_model(
                json!({"uid": "m1", "name": "Project", "fields": [{"name": "owner", "datatype": "fk"}]}),
                json!({}),
            ),
            "MISSING_RELATION_TARGET",
        ),
        (
            single_model(
                json!({"uid": "m1", "name": "Project", "fields": [{"name": "size", "datatype": "huge"}]}),
                json!({}),
            ),
            "UNKNOWN_DATATYPE_FOR_FIELD",
        ),
        (
            single_model(
                json!({"uid": "m1", "name": "Project", "fields": [
                    {"name": "host", "datatype": "ip", "attributes": {"protocol": "ipv5"}}
                ]}),
                json!({}),
            ),
            "UNKNOWN_IP_PROTOCOL",
        ),
        (
            single_model(
                json!({"uid": "m1", "name": "Project", "fields": [
                    {"name": "host", "datatype": "ip", "attributes": {"protocol": "ipv6", "default": "10.0.0.1"}}
                ]}),
                json!({}),
            ),
            "INVALID_DEFAULT_IP",
        ),
        (
            json!({"manifest": {"version": "9.9.9", "data_modeling": {}}}),
            "UNKNOWN_DATAMODEL_VERSION",
        ),
    ];

    for (doc, code) in cases {
        assert_eq!(compile_err(&doc).code(), code, "document: {doc}");
    }
}

#[test]
fn test_reverse_names_unique_per_target() {
    let doc = manifest(json!({
        "models": [
            {"uid": "m-project", "name": "Project", "fields": [
                {"name": "owner", "datatype": "fk", "attributes": {"target": "User", "reverse": "owned"}}
            ]},
            {"uid": "m-task", "name": "Task", "fields": [
                {"name": "assignee", "datatype": "fk", "attributes": {"target": "User", "reverse": "owned"}}
            ]}
        ],
        "permissions": [{"model_uid": "m-project"}, {"model_uid": "m-task"}],
        "resource_queries": [{"model_uid": "m-project"}, {"model_uid": "m-task"}],
        "one_to_many_relations": [
            {"source_model_uid": "m-project", "source_field": "owner", "target_model_uid": "User"},
            {"source_model_uid": "m-task", "source_field": "assignee", "target_model_uid": "User"}
        ],
        "many_to_many_relations": []
    }));

    assert_eq!(compile_err(&doc).code(), "DUPLICATED_REVERSE_FOR_MODEL");
}

#[test]
fn test_company_workspace_compiles() {
    let registry = datamodel::compile_value(&company_workspace()).expect("compile workspace");

    assert_eq!(registry.version(), DatamodelVersion::V1);
    assert_eq!(registry.divider_name(), "Company");

    let project = registry.get("Project").expect("Project entity");
    assert!(project.is_scoped());
    assert_eq!(
        project.minimum_level(concrete::types::Operation::Update),
        MinimumLevel::Manager
    );

    let company = registry.get("Company").expect("Company entity");
    assert_eq!(company.divider, DividerLink::Unscoped);

    let note = registry.get("Note").expect("Note entity");
    assert!(!note.is_scoped());

    let user = registry.get("User").expect("User entity");
    assert_eq!(user.kind, EntityKind::User);
    assert!(matches!(user.divider, DividerLink::Membership { .. }));
}

#[test]
fn test_default_divider_without_lookups() {
    let doc = single_model(json!({"uid": "m1", "name": "Project", "fields": []}), json!({}));
    let registry = datamodel::compile_value(&doc).expect("compile");

    assert_eq!(registry.divider_name(), DEFAULT_DIVIDER);
    assert!(registry.get(DEFAULT_DIVIDER).is_some());
}

#[test]
fn test_compilation_is_deterministic() {
    let first = datamodel::compile_value(&company_workspace()).expect("first compile");
    let second = datamodel::compile_value(&company_workspace()).expect("second compile");

    assert_eq!(first, second);
    assert_eq!(first.fingerprint(), second.fingerprint());

    let mut changed = company_workspace();
    changed["manifest"]["data_modeling"]["models"][2]["fields"][0]["name"] = json!("content");
    let third = datamodel::compile_value(&changed).expect("changed compile");
    assert_ne!(first.fingerprint(), third.fingerprint());
}

#[test]
fn test_legacy_document() {
    let doc = json!([{
        "std.specifier": "Model",
        "std.uid": "m-project",
        "std.name": "Project",
        "std.description": "Projects",
        "ext.minimum_delete_level": "admin",
        "ext.model_fields": [
            {"std.specifier": "Field", "std.name": "title", "std.description": "", "std.datatype": "char"},
            {"std.specifier": "Field", "std.name": "members", "std.description": "", "std.datatype": "m2m", "ext.to": "User"}
        ]
    }]);

    let registry = datamodel::compile_value(&doc).expect("compile legacy document");
    assert_eq!(registry.version(), DatamodelVersion::Legacy);

    let project = registry.get("Project").expect("Project entity");
    assert_eq!(
        project.minimum_level(concrete::types::Operation::Delete),
        MinimumLevel::Admin
    );
    let relations: Vec<_> = project.relations().collect();
    assert_eq!(relations, vec![("members", "User")]);
}

#[test]
fn test_legacy_foreign_key_between_declared_models() {
    let doc = json!([
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
                {"std.specifier": "Field", "std.name": "company_ref", "std.description": "", "std.datatype": "fk", "ext.to": "Company"}
            ]
        }
    ]);

    let registry = datamodel::compile_value(&doc).expect("compile legacy foreign key");
    let project = registry.get("Project").expect("Project entity");
    let relations: Vec<_> = project.relations().collect();
    assert_eq!(relations, vec![("company_ref", "Company")]);
}

#[test]
fn test_common_words_are_valid_field_names() {
    let doc = single_model(
        json!({"uid": "m1", "name": "Project", "fields": [
            {"name": "type", "datatype": "char"},
            {"name": "order", "datatype": "int"},
            {"name": "key", "datatype": "char"},
            {"name": "match", "datatype": "bool"}
        ]}),
        json!({}),
    );

    let registry = datamodel::compile_value(&doc).expect("compile common field names");
    let project = registry.get("Project").expect("Project entity");
    assert!(project.field("type").is_some());
    assert!(project.field("order").is_some());
}

#[test]
fn test_decimal_places_bounded_by_max_digits() {
    let doc = single_model(
        json!({"uid": "m1", "name": "Project", "fields": [
            {"name": "budget", "datatype": "decimal", "attributes": {"max_digits": 10, "decimal_places": 4000000000u32}}
        ]}),
        json!({}),
    );

    assert_eq!(compile_err(&doc).code(), "INVALID_DECIMAL_PRECISION");
}

#[test]
fn test_legacy_missing_key() {
    let doc = json!([{
        "std.specifier": "Model",
        "std.uid": "m-project",
        "std.name": "Project",
        "std.description": "Projects",
        "ext.model_fields": [
            {"std.specifier": "Field", "std.name": "title", "std.description": ""}
        ]
    }]);

    assert_eq!(compile_err(&doc).code(), "MISSING_KEY_FOR_DEFINITION");
}

#[test]
fn test_load_yaml_document() {
    let dir = TempDir::new().expect("create temp dir");
    let path = dir.path().join("datamodel.yaml");
    fs::write(
        &path,
        r#"
manifest:
  version: "1.0.0"
  data_modeling:
    models:
      - uid: m-note
        name: Note
        fields:
          - name: body
            datatype: txt
    permissions:
      - model_uid: m-note
        retrieve: anonymous
    resource_queries:
      - model_uid: m-note
    one_to_many_relations: []
    many_to_many_relations: []
"#,
    )
    .expect("write datamodel");

    let registry = datamodel::load_and_compile(&path).expect("load yaml datamodel");
    let note = registry.get("Note").expect("Note entity");
    assert_eq!(
        note.minimum_level(concrete::types::Operation::Retrieve),
        MinimumLevel::Anonymous
    );
}

#[test]
fn test_missing_file() {
    let dir = TempDir::new().expect("create temp dir");
    let err = datamodel::load_and_compile(&dir.path().join("absent.json"))
        .expect_err("missing file should fail");
    assert_eq!(err.code(), "DATAMODEL_UNREADABLE");
}
