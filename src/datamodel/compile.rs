//! Schema compilation: validated descriptors to [`CompiledEntity`] values.

use std::collections::BTreeSet;

use serde_json::Value;
use tracing::debug;

use super::descriptor::{
    Document, FieldDescriptor, IpProtocol, ModelDescriptor, OnDelete, PermissionSpec,
    ResourceQuerySpec, StorageType,
};
use super::entity::{
    CompiledEntity, DividerLink, EntityKind, FieldDefault, FieldValidator, MinimumLevels,
    ResourceQuery, StorageField,
};
use super::error::DatamodelError;
use super::names::{self, EXTENSIBLE_MODELS};
use super::registry::Registry;
use super::validate::validate;
use crate::types::MinimumLevel;

pub const DEFAULT_DIVIDER: &str = "DefaultDivider";

const DEFAULT_CHAR_LENGTH: u32 = 200;
pub(super) const DEFAULT_DECIMAL_PLACES: u32 = 2;
pub(super) const DEFAULT_MAX_DIGITS: u32 = 20;

/// Validates `doc` and compiles it into a registry.
pub fn compile(doc: &Document) -> Result<Registry, DatamodelError> {
    validate(doc)?;

    let divider = resolve_divider(doc)?;
    let mut entities = Vec::with_capacity(doc.models.len() + 3);

    for model in &doc.models {
        let entity = compile_model(doc, model, &divider)?;
        debug!(
            entity = %entity.name,
            fields = entity.fields.len(),
            scoped = entity.is_scoped(),
            "Compiled entity"
        );
        entities.push(entity);
    }

    for built_in in EXTENSIBLE_MODELS {
        if !doc.models.iter().any(|m| m.name == *built_in) {
            entities.push(built_in_entity(built_in, &divider)?);
        }
    }
    if divider == DEFAULT_DIVIDER {
        entities.push(synthesized_divider());
    }

    Ok(Registry::new(doc.version, divider, entities))
}

/// Finds the single divider model named by permission lookups.
fn resolve_divider(doc: &Document) -> Result<String, DatamodelError> {
    let mut candidates = BTreeSet::new();
    for permission in &doc.permissions {
        for lookup in &permission.lookups {
            let target = doc
                .model_by_uid(lookup)
                .or_else(|| doc.models.iter().find(|m| &m.name == lookup))
                .ok_or_else(|| DatamodelError::UnknownDividerModel {
                    model: doc
                        .model_by_uid(&permission.model_uid)
                        .map_or_else(|| permission.model_uid.clone(), |m| m.name.clone()),
                    lookup: lookup.clone(),
                })?;
            candidates.insert(target.name.clone());
        }
    }

    match candidates.len() {
        0 => Ok(DEFAULT_DIVIDER.to_string()),
        1 => Ok(candidates.into_iter().next().unwrap_or_default()),
        _ => Err(DatamodelError::MultipleDividers {
            candidates: candidates.into_iter().collect(),
        }),
    }
}

fn kind_of(model: &ModelDescriptor, divider: &str) -> EntityKind {
    match model.name.as_str() {
        "User" => EntityKind::User,
        "Group" => EntityKind::Group,
        name if name == divider => EntityKind::Divider,
        _ => EntityKind::Declared,
    }
}

fn divider_link(kind: EntityKind, undivided: bool, divider: &str) -> DividerLink {
    match kind {
        EntityKind::User => DividerLink::Membership {
            model: divider.to_string(),
            field: names::plural(&names::snake_case(divider)),
        },
        EntityKind::Declared if !undivided => DividerLink::ForeignKey {
            model: divider.to_string(),
            field: names::snake_case(divider),
        },
        _ => DividerLink::Unscoped,
    }
}

fn compile_model(
    doc: &Document,
    model: &ModelDescriptor,
    divider: &str,
) -> Result<CompiledEntity, DatamodelError> {
    let kind = kind_of(model, divider);
    let link = divider_link(kind, model.undivided, divider);

    let mut fields = system_fields(model.default_public);
    fields.extend(link_fields(&link));
    fields.extend(built_in_fields(kind, divider));

    for declared in &model.fields {
        if fields.iter().any(|f| f.name == declared.name) {
            return Err(DatamodelError::ProtectedFieldName {
                model: model.name.clone(),
                field: declared.name.clone(),
            });
        }
        fields.push(compile_field(doc, declared));
    }

    let permission = doc.permissions.iter().find(|p| p.model_uid == model.uid);
    let query = doc.resource_queries.iter().find(|q| q.model_uid == model.uid);

    Ok(CompiledEntity {
        name: model.name.clone(),
        uid: model.uid.clone(),
        description: model.description.clone(),
        kind,
        representation: model.representation.clone(),
        default_public: model.default_public,
        unique_together: model.unique_together.clone(),
        resource_query: resource_query(&fields, query),
        minimum_levels: minimum_levels(permission, MinimumLevels::DECLARED),
        divider: link,
        fields,
    })
}

fn built_in_entity(name: &str, divider: &str) -> Result<CompiledEntity, DatamodelError> {
    let kind = match name {
        "User" => EntityKind::User,
        "Group" => EntityKind::Group,
        other => {
            return Err(DatamodelError::Malformed(format!(
                "'{other}' is not a built-in entity"
            )));
        }
    };
    let link = divider_link(kind, false, divider);
    let mut fields = system_fields(false);
    fields.extend(link_fields(&link));
    fields.extend(built_in_fields(kind, divider));

    Ok(CompiledEntity {
        name: name.to_string(),
        uid: name.to_string(),
        description: String::new(),
        kind,
        representation: None,
        default_public: false,
        unique_together: Vec::new(),
        resource_query: resource_query(&fields, None),
        minimum_levels: MinimumLevels::BUILT_IN,
        divider: link,
        fields,
    })
}

fn synthesized_divider() -> CompiledEntity {
    let mut fields = system_fields(false);
    let mut name = StorageField::new("name", StorageType::Char)
        .with_default(FieldDefault::Value(Value::String(String::new())));
    name.max_length = Some(DEFAULT_CHAR_LENGTH);
    fields.push(name);

    CompiledEntity {
        name: DEFAULT_DIVIDER.to_string(),
        uid: DEFAULT_DIVIDER.to_string(),
        description: String::new(),
        kind: EntityKind::SynthesizedDivider,
        representation: Some("name".to_string()),
        default_public: false,
        unique_together: Vec::new(),
        resource_query: resource_query(&fields, None),
        minimum_levels: MinimumLevels::BUILT_IN,
        divider: DividerLink::Unscoped,
        fields,
    }
}

fn system_fields(default_public: bool) -> Vec<StorageField> {
    vec![
        StorageField::new("uid", StorageType::Uuid)
            .with_default(FieldDefault::NewUuid)
            .system(),
        StorageField::new("creation_date", StorageType::DateTime)
            .with_default(FieldDefault::Now)
            .system(),
        StorageField::new("modification_date", StorageType::DateTime)
            .with_default(FieldDefault::Now)
            .system(),
        StorageField::new("public", StorageType::Boolean)
            .with_default(FieldDefault::Value(Value::Bool(default_public)))
            .system(),
    ]
}

fn link_fields(link: &DividerLink) -> Vec<StorageField> {
    let DividerLink::ForeignKey { model, field } = link else {
        return Vec::new();
    };
    let mut divider_fk = StorageField::new(field, StorageType::ForeignKey)
        .nullable()
        .targeting(model)
        .system();
    divider_fk.on_delete = Some(OnDelete::SetNull);

    let mut fields = vec![
        divider_fk,
        StorageField::new("additional_filtering", StorageType::Boolean)
            .with_default(FieldDefault::Value(Value::Bool(false)))
            .system(),
    ];
    fields.extend(
        [
            ("can_view_users", "User"),
            ("can_admin_users", "User"),
            ("can_view_groups", "Group"),
            ("can_admin_groups", "Group"),
        ]
        .into_iter()
        .map(|(name, target)| {
            StorageField::new(name, StorageType::ManyToMany)
                .targeting(target)
                .system()
        }),
    );
    fields
}

fn built_in_fields(kind: EntityKind, divider: &str) -> Vec<StorageField> {
    let flag = |name: &str, default: bool| {
        StorageField::new(name, StorageType::Boolean)
            .with_default(FieldDefault::Value(Value::Bool(default)))
            .system()
    };
    let char_field = |name: &str, max: u32| {
        let mut field = StorageField::new(name, StorageType::Char)
            .with_default(FieldDefault::Value(Value::String(String::new())));
        field.max_length = Some(max);
        field
    };

    match kind {
        EntityKind::User => {
            let mut email = StorageField::new("email", StorageType::Email).system();
            email.unique = true;
            vec![
                email,
                char_field("first_name", 150).system(),
                char_field("last_name", 150).system(),
                flag("is_active", true),
                flag("is_staff", false),
                flag("admin", false),
                flag("is_superuser", false),
                StorageField::new("password_modification_date", StorageType::DateTime)
                    .with_default(FieldDefault::Now)
                    .system(),
                StorageField::new(
                    &names::plural(&names::snake_case(divider)),
                    StorageType::ManyToMany,
                )
                .targeting(divider)
                .system(),
                flag("unsubscribe_all", false),
                StorageField::new("unsubscribe_to", StorageType::ManyToMany)
                    .targeting(divider)
                    .system(),
            ]
        }
        EntityKind::Group => {
            let mut name = char_field("name", DEFAULT_CHAR_LENGTH);
            name.unique = true;
            name.default = FieldDefault::None;
            vec![name]
        }
        _ => Vec::new(),
    }
}

/// Applies the per-type materialization rules to one declared field.
fn compile_field(doc: &Document, declared: &FieldDescriptor) -> StorageField {
    let attrs = &declared.attributes;
    // Validation has already rejected unknown tags.
    let storage_type = doc.storage_type(declared).unwrap_or(StorageType::Text);
    let mut field = StorageField::new(&declared.name, storage_type);
    field.unique = attrs.unique.unwrap_or(false);
    field.reverse = attrs.reverse.clone();
    field.target = attrs
        .target
        .as_deref()
        .and_then(|t| doc.resolve_model_name(t))
        .map(str::to_string);

    let nullable = attrs.null.unwrap_or(false);
    let declared_default = attrs.default.clone().filter(|v| !v.is_null());
    let literal = |fallback: Value| FieldDefault::Value(declared_default.clone().unwrap_or(fallback));

    match storage_type {
        StorageType::Text | StorageType::Url | StorageType::Email => {
            field.nullable = Some(nullable);
            field.default = literal(Value::String(String::new()));
        }
        StorageType::Char => {
            field.nullable = Some(nullable);
            field.max_length = Some(attrs.max_length.unwrap_or(DEFAULT_CHAR_LENGTH));
            field.default = literal(Value::String(String::new()));
        }
        StorageType::Integer | StorageType::BigInteger => {
            field.nullable = Some(nullable);
            field.default = literal(Value::from(0));
        }
        StorageType::Float => {
            field.nullable = Some(nullable);
            field.default = literal(Value::from(0.0));
        }
        StorageType::Boolean => {
            field.nullable = Some(nullable);
            field.default = literal(Value::Bool(false));
        }
        StorageType::Decimal => {
            let places = attrs.decimal_places.unwrap_or(DEFAULT_DECIMAL_PLACES);
            field.nullable = Some(nullable);
            field.decimal_places = Some(places);
            field.max_digits = Some(attrs.max_digits.unwrap_or(DEFAULT_MAX_DIGITS));
            field.default = literal(Value::String(format!("{:.*}", places as usize, 0.0)));
        }
        StorageType::ForeignKey => {
            field.nullable = Some(true);
            field.on_delete = Some(
                attrs
                    .on_delete
                    .as_deref()
                    .and_then(OnDelete::parse)
                    .unwrap_or(OnDelete::Protect),
            );
        }
        StorageType::ManyToMany => {
            field.nullable = None;
        }
        StorageType::Date | StorageType::DateTime => {
            if nullable {
                field.nullable = Some(true);
                field.default = declared_default.map_or(FieldDefault::None, FieldDefault::Value);
            } else {
                field.nullable = Some(false);
                field.default = match declared_default {
                    Some(value) => FieldDefault::Value(value),
                    None if storage_type == StorageType::Date => FieldDefault::Today,
                    None => FieldDefault::Now,
                };
            }
        }
        StorageType::File | StorageType::Image => {
            field.nullable = Some(true);
            field.validator = Some(FieldValidator::FileTypeAndSize);
        }
        StorageType::Json => {
            field.nullable = Some(false);
            field.default = FieldDefault::EmptyMapping;
        }
        StorageType::Uuid => {
            field.nullable = Some(nullable);
            field.default = declared_default.map_or(FieldDefault::NewUuid, FieldDefault::Value);
        }
        StorageType::GenericIpAddress => {
            field.nullable = Some(attrs.null.unwrap_or(true));
            field.protocol = Some(
                attrs
                    .protocol
                    .as_deref()
                    .and_then(IpProtocol::parse)
                    .unwrap_or(IpProtocol::Ipv4Or6),
            );
            field.default = declared_default.map_or(FieldDefault::None, FieldDefault::Value);
        }
        StorageType::Point => {
            field.nullable = Some(true);
            field.default = declared_default.map_or(FieldDefault::None, FieldDefault::Value);
        }
    }

    field
}

fn minimum_levels(permission: Option<&PermissionSpec>, fallback: MinimumLevels) -> MinimumLevels {
    let Some(permission) = permission else {
        return fallback;
    };
    let level = |declared: &Option<String>, default: MinimumLevel| {
        declared
            .as_deref()
            .and_then(MinimumLevel::parse)
            .unwrap_or(default)
    };
    MinimumLevels {
        create: level(&permission.create, fallback.create),
        retrieve: level(&permission.retrieve, fallback.retrieve),
        update: level(&permission.update, fallback.update),
        delete: level(&permission.delete, fallback.delete),
    }
}

/// Explicit field lists win; every omitted list falls back to all simple fields.
fn resource_query(fields: &[StorageField], spec: Option<&ResourceQuerySpec>) -> ResourceQuery {
    let simple: Vec<String> = fields
        .iter()
        .filter(|f| !f.system && f.storage_type.is_simple())
        .map(|f| f.name.clone())
        .collect();
    let pick = |declared: Option<&Vec<String>>| declared.cloned().unwrap_or_else(|| simple.clone());

    let display_fields = pick(spec.and_then(|s| s.display_fields.as_ref()));
    let ordering_fields = spec
        .and_then(|s| s.ordering_fields.clone())
        .unwrap_or_else(|| {
            let mut ordering = display_fields.clone();
            ordering.extend(["creation_date".to_string(), "modification_date".to_string()]);
            ordering
        });

    ResourceQuery {
        search_fields: pick(spec.and_then(|s| s.search_fields.as_ref())),
        filter_fields: pick(spec.and_then(|s| s.filter_fields.as_ref())),
        export_fields: pick(spec.and_then(|s| s.export_fields.as_ref())),
        ordering_fields,
        display_fields,
    }
}
