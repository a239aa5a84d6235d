//! # Concrete
//!
//! A datamodel-driven datastore core, usable both as a standalone binary and
//! as a library.
//!
//! A declarative datamodel document is compiled once at boot into a
//! [`datamodel::Registry`] of immutable entities. Every request against those
//! entities goes through [`authz::Authorizer`], which combines the caller's
//! level, divider scope, per-instance grants and ACL roles.
//!
//! ## Library Usage
//!
//! ```toml
//! [dependencies]
//! concrete = { version = "0.0.1", default-features = false }
//! ```
//!
//! ```rust,ignore
//! use std::path::Path;
//! use std::sync::Arc;
//! use concrete::config::AuthConfig;
//! use concrete::datamodel;
//! use concrete::server::{AppState, create_router};
//! use concrete::store::{SqliteStore, Store};
//!
//! let registry = datamodel::load_and_compile(Path::new("datamodel.json")).unwrap();
//! let store = SqliteStore::new("./data/concrete.db").unwrap();
//! store.initialize().unwrap();
//!
//! let state = Arc::new(AppState::new(
//!     Arc::new(store),
//!     Arc::new(registry),
//!     AuthConfig::default(),
//! ));
//! let router = create_router(state);
//! // Serve with axum...
//! ```
//!
//! ## Feature Flags
//!
//! - `cli` (default): Builds the `concrete` binary. Disable with `default-features = false`.

pub mod auth;
pub mod authz;
pub mod config;
pub mod datamodel;
pub mod error;
pub mod server;
pub mod store;
pub mod types;
