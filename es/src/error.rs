//! Error types for the event log and snapshot cache

use std::path::PathBuf;
use thiserror::Error;

use crate::envelope::PayloadKind;

/// An envelope failed its kind's schema
#[derive(Debug, Error, PartialEq)]
pub enum SchemaError {
    #[error("envelope field '{0}' must not be empty")]
    EmptyEnvelopeField(&'static str),

    #[error("{kind}: payload must be a JSON object")]
    NotAnObject { kind: PayloadKind },

    #[error("{kind}: missing required field '{field}'")]
    MissingField { kind: PayloadKind, field: String },

    #[error("{kind}: field '{field}' must be {expected}")]
    WrongType {
        kind: PayloadKind,
        field: String,
        expected: &'static str,
    },

    #[error("{kind}: field '{field}' must be one of {allowed:?}, got '{value}'")]
    NotAllowed {
        kind: PayloadKind,
        field: String,
        allowed: &'static [&'static str],
        value: String,
    },

    #[error("{kind}: unexpected field '{field}'")]
    UnexpectedField { kind: PayloadKind, field: String },

    #[error("malformed envelope: {0}")]
    Malformed(String),
}

/// Errors from appending to or reading the event log
#[derive(Debug, Error)]
pub enum LogError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl LogError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io { path, source }
    }
}

/// Errors from the SQLite snapshot cache
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
