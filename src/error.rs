//! Error types for coop-content

use crate::hash::Address;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoopError {
    #[error("Malformed address: {reason}")]
    MalformedAddress { reason: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{what} not found: {address}")]
    NotFound { what: &'static str, address: Address },

    #[error("Update base {base} is stale; current head is {head}")]
    Conflict { base: Address, head: Address },

    #[error("Agent {author} is not authorized for group {group_id}")]
    Unauthorized { author: Address, group_id: Address },

    #[error("Unknown function: {0}")]
    UnknownFunction(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl CoopError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        CoopError::MalformedAddress {
            reason: reason.into(),
        }
    }

    pub(crate) fn not_found(what: &'static str, address: &Address) -> Self {
        CoopError::NotFound {
            what,
            address: address.clone(),
        }
    }

    /// Short machine-readable name of the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            CoopError::MalformedAddress { .. } => "MalformedAddress",
            CoopError::Validation(_) => "ValidationError",
            CoopError::NotFound { .. } => "NotFound",
            CoopError::Conflict { .. } => "Conflict",
            CoopError::Unauthorized { .. } => "Unauthorized",
            CoopError::UnknownFunction(_) => "UnknownFunction",
            CoopError::Serialization(_) | CoopError::Json(_) => "SerializationError",
            CoopError::Database(_) | CoopError::Io(_) => "StorageError",
            CoopError::Config(_) => "ConfigError",
        }
    }
}

impl From<rmp_serde::encode::Error> for CoopError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        CoopError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for CoopError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        CoopError::Serialization(e.to_string())
    }
}

pub type CoopResult<T> = Result<T, CoopError>;
