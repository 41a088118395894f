//! Error types for dump parsing, metadata resolution and compression.
//!
//! Everything that aborts an import is an [`ImportError`]. Codec failures are
//! a separate [`CodecError`] because they never abort anything: they travel
//! with the completed revision to whoever consumes it.

use thiserror::Error;

pub type Result<T, E = ImportError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("XML error at byte {position}: {source}")]
    Xml {
        position: usize,
        #[source]
        source: quick_xml::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed dump at byte {position}: {message}")]
    Structure { position: usize, message: String },

    #[error("missing <{field}> in element ending at byte {position}")]
    MissingField {
        field: &'static str,
        position: usize,
    },

    #[error("invalid number {value:?} in <{field}> at byte {position}")]
    InvalidNumber {
        field: &'static str,
        value: String,
        position: usize,
    },

    #[error("invalid timestamp {value:?} at byte {position}: {source}")]
    InvalidTimestamp {
        value: String,
        position: usize,
        #[source]
        source: chrono::ParseError,
    },

    #[error("unknown case policy {0:?}")]
    UnknownCase(String),

    #[error("unknown content model {0:?}")]
    UnknownContentModel(String),

    #[error("cannot derive API URL from base {0:?}: no /wiki/ segment")]
    ApiUrl(String),

    #[error("namespace metadata request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("malformed namespace metadata: {0}")]
    Metadata(String),

    #[error("unsupported encoding {0:?}; dumps must be UTF-8")]
    UnsupportedEncoding(String),

    #[error("failed to start compression workers: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),

    #[error(transparent)]
    Listener(#[from] anyhow::Error),
}

impl ImportError {
    pub(crate) fn structure(position: usize, message: impl Into<String>) -> Self {
        ImportError::Structure {
            position,
            message: message.into(),
        }
    }
}

/// Failure of one codec invocation, attached to the revision it belongs to.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("compressor I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt delta payload: {0}")]
    CorruptDelta(&'static str),

    #[error("delta payload needs parent text")]
    MissingParent,

    #[error("codec panicked: {0}")]
    Panicked(String),
}
