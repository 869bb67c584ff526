//! Error type shared by every component of the crate.

use std::path::PathBuf;
use thiserror::Error;

use crate::record::FeatureType;

/// Which checksummed segment of a frame failed verification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameSegment {
    Length,
    Payload,
}

impl std::fmt::Display for FrameSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Length => f.write_str("length"),
            Self::Payload => f.write_str("payload"),
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("corrupt frame at byte {offset}: {segment} checksum mismatch")]
    CorruptFrame { offset: u64, segment: FrameSegment },

    #[error("truncated frame at byte {offset}: stream ended mid-frame")]
    TruncatedFrame { offset: u64 },

    #[error("field '{field}' has type {found}, expected {expected}")]
    TypeMismatch {
        field: String,
        expected: FeatureType,
        found: FeatureType,
    },

    #[error("field '{field}' is not present in the record")]
    UnknownField { field: String },

    #[error("malformed record: {0}")]
    MalformedRecord(String),

    #[error("malformed index: {0}")]
    MalformedIndex(String),

    #[error("'{}' requested by {workers} workers has no index; sharding requires one", path.display())]
    MissingIndex { path: PathBuf, workers: usize },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("I/O error at '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    RawIo(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

// Convenience constructors
impl Error {
    pub fn malformed_record(message: impl Into<String>) -> Self {
        Self::MalformedRecord(message.into())
    }

    pub fn malformed_index(message: impl Into<String>) -> Self {
        Self::MalformedIndex(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn unknown_field(field: impl Into<String>) -> Self {
        Self::UnknownField {
            field: field.into(),
        }
    }

    pub fn type_mismatch(field: impl Into<String>, expected: FeatureType, found: FeatureType) -> Self {
        Self::TypeMismatch {
            field: field.into(),
            expected,
            found,
        }
    }
}
