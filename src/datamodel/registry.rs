use std::collections::BTreeMap;

use serde::Serialize;
use sha2::{Digest, Sha256};

use super::entity::CompiledEntity;
use super::version::DatamodelVersion;

/// Process-wide set of compiled entities, built once at boot and read-only
/// afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Registry {
    version: DatamodelVersion,
    divider: String,
    entities: BTreeMap<String, CompiledEntity>,
}

impl Registry {
    #[must_use]
    pub fn new(
        version: DatamodelVersion,
        divider: String,
        entities: impl IntoIterator<Item = CompiledEntity>,
    ) -> Self {
        Self {
            version,
            divider,
            entities: entities
                .into_iter()
                .map(|e| (e.name.clone(), e))
                .collect(),
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&CompiledEntity> {
        self.entities.get(name)
    }

    /// Entities in name order.
    pub fn entities(&self) -> impl Iterator<Item = &CompiledEntity> {
        self.entities.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    #[must_use]
    pub const fn version(&self) -> DatamodelVersion {
        self.version
    }

    #[must_use]
    pub fn divider_name(&self) -> &str {
        &self.divider
    }

    #[must_use]
    pub fn divider(&self) -> Option<&CompiledEntity> {
        self.entities.get(&self.divider)
    }

    /// Hex sha256 of the canonical JSON rendering. Two compilations of the
    /// same document yield the same fingerprint.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        // Serializing plain structs and BTreeMaps cannot fail.
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(&canonical))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datamodel::compile::DEFAULT_DIVIDER;

    #[test]
    fn test_empty_registry() {
        let registry = Registry::new(DatamodelVersion::V1, DEFAULT_DIVIDER.to_string(), []);
        assert!(registry.is_empty());
        assert!(registry.divider().is_none());
        assert_eq!(registry.fingerprint().len(), 64);
    }
}
