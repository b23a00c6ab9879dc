//! Error types shared by the encoder, the artifact store and the service wiring.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors surfaced to callers of the core operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("input text is empty")]
    EmptyInput,

    #[error("input of {len} bytes does not fit in a QR code")]
    EncodingCapacityExceeded { len: usize },

    #[error("qr encoding failed: {0}")]
    Encoding(qrcode::types::QrError),

    #[error("failed to write artifact {path}: {source}")]
    StoreWriteFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(
        "invalid retention policy: ttl {ttl:?}, sweep interval {sweep_interval:?} \
         (interval must be non-zero and at most half the ttl)"
    )]
    InvalidRetentionPolicy {
        ttl: Duration,
        sweep_interval: Duration,
    },

    #[error("artifact subdirectory `{0}` must name a directory below the static root")]
    InvalidArtifactSubdir(String),

    #[error("failed to read translations at {path}: {source}")]
    CatalogRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse translations at {path}: {source}")]
    CatalogParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("no translations found for language `{0}`")]
    MissingLanguage(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// A failed step inside one sweep tick. Logged and counted, never propagated.
#[derive(Debug, Error)]
pub enum SweepError {
    #[error("failed to list {path}: {source}")]
    List {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to stat {path}: {source}")]
    Stat {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to delete {path}: {source}")]
    Delete {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl SweepError {
    pub fn path(&self) -> &PathBuf {
        match self {
            SweepError::List { path, .. }
            | SweepError::Stat { path, .. }
            | SweepError::Delete { path, .. } => path,
        }
    }
}
