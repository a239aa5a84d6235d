//! The datamodel compiler.
//!
//! A datamodel document is loaded from disk, decoded by its version into
//! normalized descriptors, cross-validated and compiled into a [`Registry`] of
//! immutable [`CompiledEntity`] values. Every failure is a [`DatamodelError`]
//! and aborts boot.

pub mod compile;
pub mod descriptor;
pub mod entity;
pub mod error;
pub mod loader;
pub mod names;
pub mod registry;
pub mod validate;
pub mod version;

use std::path::Path;

use serde_json::Value;
use tracing::info;

pub use compile::{DEFAULT_DIVIDER, compile};
pub use descriptor::{Document, StorageType};
pub use entity::{CompiledEntity, DividerLink, EntityKind, MaterializeError, StorageField};
pub use error::DatamodelError;
pub use registry::Registry;
pub use version::DatamodelVersion;

/// Decodes and compiles an already parsed document.
pub fn compile_value(raw: &Value) -> Result<Registry, DatamodelError> {
    let doc = version::decode(raw)?;
    compile(&doc)
}

/// Loads the document at `path` and compiles it.
pub fn load_and_compile(path: &Path) -> Result<Registry, DatamodelError> {
    let raw = loader::load(path)?;
    let registry = compile_value(&raw)?;
    info!(
        path = %path.display(),
        version = registry.version().as_str(),
        entities = registry.len(),
        divider = registry.divider_name(),
        "Compiled datamodel"
    );
    Ok(registry)
}
