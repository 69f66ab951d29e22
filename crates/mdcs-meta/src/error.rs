//! Error types for the meta layer.

use crate::codec::CodecError;
use crate::gateway::GatewayError;
use crate::keys::KeyError;
use thiserror::Error;

/// Errors surfaced by the meta store and key exchange.
///
/// A returned error always means the backing gateway or key registry could
/// not be reached or was inconsistent; the local frontier is left unchanged.
/// Missing history is not an error and is reported as `Ok(None)` instead.
#[derive(Error, Debug, Clone)]
pub enum MetaError {
    #[error("gateway {op} failed for {url}: {source}")]
    Gateway {
        op: &'static str,
        url: String,
        source: GatewayError,
    },

    #[error("meta codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("key registry error for {name}: {source}")]
    KeyRegistry { name: String, source: KeyError },

    #[error("store url has no name or localName parameter: {0}")]
    MissingStoreName(String),

    #[error("meta payload has no events to carry a key")]
    EmptyPayload,

    #[error("consumer failed on event {cid}: {reason}")]
    Consumer { cid: String, reason: String },

    #[error("meta store is closed: {0}")]
    Closed(String),
}

impl MetaError {
    pub(crate) fn gateway(op: &'static str, url: &url::Url, source: GatewayError) -> Self {
        MetaError::Gateway {
            op,
            url: url.to_string(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, MetaError>;
