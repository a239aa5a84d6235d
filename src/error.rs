use thiserror::Error;

use crate::authz::Denial;
use crate::datamodel::{DatamodelError, MaterializeError};

#[derive(Debug, Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("not found")]
    NotFound,

    #[error("already exists")]
    AlreadyExists,

    #[error("token lookup collision")]
    TokenLookupCollision,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Datamodel(#[from] DatamodelError),

    #[error(transparent)]
    Materialize(#[from] MaterializeError),

    #[error(transparent)]
    Denied(#[from] Denial),

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("invalid token format")]
    InvalidTokenFormat,

    #[error("token expired")]
    TokenExpired,

    #[error("password expired")]
    PasswordExpired,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("conflict: {0}")]
    Conflict(String),
}

pub type Result<T> = std::result::Result<T, Error>;
