//! The logical payload of a clock update.

use crate::codec::CodecError;
use mdcs_merkle::{to_canonical_vec, Cid, Link};
use serde::{Deserialize, Serialize};

/// Data roots committed at one point in history, plus an optional symmetric
/// key being distributed in-band.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "WireDbMeta", into = "WireDbMeta")]
pub struct DbMeta {
    pub cids: Vec<Cid>,
    pub key: Option<String>,
}

#[derive(Clone, Serialize, Deserialize)]
struct WireDbMeta {
    cids: Vec<Link>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    key: Option<String>,
}

impl From<WireDbMeta> for DbMeta {
    fn from(wire: WireDbMeta) -> Self {
        DbMeta {
            cids: wire.cids.into_iter().map(|l| l.0).collect(),
            key: wire.key,
        }
    }
}

impl From<DbMeta> for WireDbMeta {
    fn from(meta: DbMeta) -> Self {
        WireDbMeta {
            cids: meta.cids.into_iter().map(Link).collect(),
            key: meta.key,
        }
    }
}

impl DbMeta {
    pub fn new(cids: Vec<Cid>) -> Self {
        DbMeta { cids, key: None }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// The key, if present and non-empty.
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref().filter(|k| !k.is_empty())
    }

    /// Canonical encoding: equal values always produce identical bytes.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        to_canonical_vec(self).map_err(|e| CodecError::Encode(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::DbMeta(e.to_string()))
    }
}
