use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors produced while decoding or encoding DNS wire data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DnsError {
    #[error("malformed message")]
    FormatError,

    #[error("message truncated: needed {needed} more bytes")]
    Truncated { needed: usize },

    #[error("name compression pointer loop")]
    PointerLoop,

    #[error("label longer than 63 bytes")]
    LabelTooLong,

    #[error("name longer than 255 bytes")]
    NameTooLong,

    #[error("invalid {type_} record data: {data}")]
    InvalidRecordData { type_: String, data: String },
}

/// Failures of the proxy itself, one variant per way a request, the snapshot
/// or startup can go wrong.
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("malformed query: {0}")]
    MalformedQuery(#[source] DnsError),

    #[error("upstream did not answer within {0:?}")]
    UpstreamTimeout(std::time::Duration),

    #[error("upstream unreachable: {0}")]
    UpstreamUnreachable(#[source] io::Error),

    #[error("failed to read snapshot {path}: {reason}")]
    PersistenceRead { path: PathBuf, reason: String },

    #[error("failed to write snapshot {path}: {source}")]
    PersistenceWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<DnsError> for ProxyError {
    fn from(value: DnsError) -> Self {
        Self::MalformedQuery(value)
    }
}
