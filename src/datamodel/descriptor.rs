//! Normalized, version-independent descriptors produced by the version decoders.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::names::EXTENSIBLE_MODELS;
use super::version::DatamodelVersion;

/// Storage-level field class a datatype tag resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageType {
    #[serde(rename = "BooleanField")]
    Boolean,
    #[serde(rename = "TextField")]
    Text,
    #[serde(rename = "CharField")]
    Char,
    #[serde(rename = "URLField")]
    Url,
    #[serde(rename = "IntegerField")]
    Integer,
    #[serde(rename = "BigIntegerField")]
    BigInteger,
    #[serde(rename = "UUIDField")]
    Uuid,
    #[serde(rename = "FloatField")]
    Float,
    #[serde(rename = "DecimalField")]
    Decimal,
    #[serde(rename = "JSONField")]
    Json,
    #[serde(rename = "FileField")]
    File,
    #[serde(rename = "ImageField")]
    Image,
    #[serde(rename = "DateTimeField")]
    DateTime,
    #[serde(rename = "DateField")]
    Date,
    #[serde(rename = "EmailField")]
    Email,
    #[serde(rename = "ForeignKey")]
    ForeignKey,
    #[serde(rename = "ManyToManyField")]
    ManyToMany,
    #[serde(rename = "GenericIPAddressField")]
    GenericIpAddress,
    #[serde(rename = "PointField")]
    Point,
}

impl StorageType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            StorageType::Boolean => "BooleanField",
            StorageType::Text => "TextField",
            StorageType::Char => "CharField",
            StorageType::Url => "URLField",
            StorageType::Integer => "IntegerField",
            StorageType::BigInteger => "BigIntegerField",
            StorageType::Uuid => "UUIDField",
            StorageType::Float => "FloatField",
            StorageType::Decimal => "DecimalField",
            StorageType::Json => "JSONField",
            StorageType::File => "FileField",
            StorageType::Image => "ImageField",
            StorageType::DateTime => "DateTimeField",
            StorageType::Date => "DateField",
            StorageType::Email => "EmailField",
            StorageType::ForeignKey => "ForeignKey",
            StorageType::ManyToMany => "ManyToManyField",
            StorageType::GenericIpAddress => "GenericIPAddressField",
            StorageType::Point => "PointField",
        }
    }

    #[must_use]
    pub const fn is_relational(self) -> bool {
        matches!(self, StorageType::ForeignKey | StorageType::ManyToMany)
    }

    /// Scalar types usable as search/filter/ordering/export/display columns.
    #[must_use]
    pub const fn is_simple(self) -> bool {
        !matches!(
            self,
            StorageType::ForeignKey
                | StorageType::ManyToMany
                | StorageType::Json
                | StorageType::File
                | StorageType::Image
                | StorageType::Point
        )
    }
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OnDelete {
    #[serde(rename = "CASCADE")]
    Cascade,
    #[serde(rename = "SET_NULL")]
    SetNull,
    #[serde(rename = "PROTECT")]
    Protect,
}

impl OnDelete {
    pub fn parse(s: &str) -> Option<OnDelete> {
        match s {
            "CASCADE" => Some(OnDelete::Cascade),
            "SET_NULL" => Some(OnDelete::SetNull),
            "PROTECT" => Some(OnDelete::Protect),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IpProtocol {
    Ipv4,
    Ipv6,
    #[serde(rename = "ipv4_6")]
    Ipv4Or6,
}

impl IpProtocol {
    pub const AUTHORIZED: [&'static str; 3] = ["ipv4", "ipv6", "ipv4_6"];

    pub fn parse(s: &str) -> Option<IpProtocol> {
        match s {
            "ipv4" => Some(IpProtocol::Ipv4),
            "ipv6" => Some(IpProtocol::Ipv6),
            "ipv4_6" => Some(IpProtocol::Ipv4Or6),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            IpProtocol::Ipv4 => "ipv4",
            IpProtocol::Ipv6 => "ipv6",
            IpProtocol::Ipv4Or6 => "ipv4_6",
        }
    }

    /// Whether `value` is an address of this protocol.
    #[must_use]
    pub fn accepts(self, value: &str) -> bool {
        match self {
            IpProtocol::Ipv4 => value.parse::<std::net::Ipv4Addr>().is_ok(),
            IpProtocol::Ipv6 => value.parse::<std::net::Ipv6Addr>().is_ok(),
            IpProtocol::Ipv4Or6 => value.parse::<std::net::IpAddr>().is_ok(),
        }
    }
}

/// Type-specific field attributes, as declared.
///
/// Values stay raw (strings for rules and protocols) so the validator can
/// report what the operator actually wrote.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldAttributes {
    pub max_length: Option<u32>,
    pub max_digits: Option<u32>,
    pub decimal_places: Option<u32>,
    pub default: Option<Value>,
    pub null: Option<bool>,
    pub unique: Option<bool>,
    pub on_delete: Option<String>,
    pub protocol: Option<String>,
    pub target: Option<String>,
    pub reverse: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    pub name: String,
    /// Raw datatype tag, resolved through the version's equivalence table.
    pub datatype: String,
    pub description: String,
    pub attributes: FieldAttributes,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelDescriptor {
    pub uid: String,
    pub name: String,
    pub description: String,
    pub representation: Option<String>,
    pub unique_together: Vec<Vec<String>>,
    pub default_public: bool,
    pub undivided: bool,
    pub fields: Vec<FieldDescriptor>,
}

/// Raw permission block; level strings are checked by the validator.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PermissionSpec {
    pub model_uid: String,
    pub create: Option<String>,
    pub retrieve: Option<String>,
    pub update: Option<String>,
    pub delete: Option<String>,
    pub lookups: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ResourceQuerySpec {
    pub model_uid: String,
    pub search_fields: Option<Vec<String>>,
    pub filter_fields: Option<Vec<String>>,
    pub ordering_fields: Option<Vec<String>>,
    pub export_fields: Option<Vec<String>>,
    pub display_fields: Option<Vec<String>>,
}

/// One entry of a relation table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RelationDecl {
    pub source_model_uid: String,
    pub source_field: String,
    pub target_model_uid: String,
}

impl RelationDecl {
    #[must_use]
    pub fn matches(&self, model_uid: &str, field: &str, target: &str) -> bool {
        self.source_field == field
            && self.source_model_uid == model_uid
            && self.target_model_uid == target
    }
}

/// A whole decoded datamodel document.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub version: DatamodelVersion,
    pub models: Vec<ModelDescriptor>,
    pub permissions: Vec<PermissionSpec>,
    pub resource_queries: Vec<ResourceQuerySpec>,
    pub one_to_many_relations: Vec<RelationDecl>,
    pub many_to_many_relations: Vec<RelationDecl>,
}

impl Document {
    /// Resolves a field's datatype tag through this document's equivalence table.
    #[must_use]
    pub fn storage_type(&self, field: &FieldDescriptor) -> Option<StorageType> {
        self.version.resolve_datatype(&field.datatype)
    }

    pub fn model_by_uid(&self, uid: &str) -> Option<&ModelDescriptor> {
        self.models.iter().find(|m| m.uid == uid)
    }

    /// Resolves a relation target to a model name. Targets are declared model
    /// uids, or the name of an extensible built-in whether declared or not.
    #[must_use]
    pub fn resolve_model_name<'a>(&'a self, reference: &'a str) -> Option<&'a str> {
        if let Some(model) = self.model_by_uid(reference) {
            return Some(&model.name);
        }
        EXTENSIBLE_MODELS
            .contains(&reference)
            .then_some(reference)
    }

    /// The relation table a relational storage type is declared in.
    #[must_use]
    pub fn relation_table(&self, storage_type: StorageType) -> &[RelationDecl] {
        match storage_type {
            StorageType::ManyToMany => &self.many_to_many_relations,
            _ => &self.one_to_many_relations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ip_protocol_accepts() {
        assert!(IpProtocol::Ipv4.accepts("10.0.0.1"));
        assert!(!IpProtocol::Ipv4.accepts("::1"));
        assert!(IpProtocol::Ipv6.accepts("::1"));
        assert!(IpProtocol::Ipv4Or6.accepts("10.0.0.1"));
        assert!(IpProtocol::Ipv4Or6.accepts("fe80::1"));
        assert!(!IpProtocol::Ipv4Or6.accepts("10.0.0.300"));
    }

    #[test]
    fn test_simple_types() {
        assert!(StorageType::Char.is_simple());
        assert!(StorageType::Decimal.is_simple());
        assert!(!StorageType::ForeignKey.is_simple());
        assert!(!StorageType::Json.is_simple());
    }

    #[test]
    fn test_on_delete_parse_is_exact() {
        assert_eq!(OnDelete::parse("SET_NULL"), Some(OnDelete::SetNull));
        assert_eq!(OnDelete::parse("cascade"), None);
        assert_eq!(OnDelete::parse("RESTRICT"), None);
    }
}
