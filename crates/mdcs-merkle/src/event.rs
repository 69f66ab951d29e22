//! Immutable, content-addressed event blocks.
//!
//! Each event in the Merkle-Clock is encoded canonically as
//! `{"data": <payload>, "parents": [<links>]}`. The event's CID is the digest
//! of exactly those bytes, so it is a pure function of the payload and the
//! parent links: no counters, no timestamps.

use crate::dag::{to_canonical_vec, Link};
use crate::hash::Cid;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur while building, decoding or storing blocks.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlockError {
    #[error("Failed to encode block: {0}")]
    Encode(String),

    #[error("Failed to decode block: {0}")]
    Decode(String),

    #[error("Block not found: {}", .0.short())]
    NotFound(Cid),

    #[error("Verification failed for: {}", .0.short())]
    VerificationFailed(Cid),
}

#[derive(Serialize)]
struct EventViewRef<'a, T> {
    data: &'a T,
    parents: Vec<Link>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct EventView<T> {
    data: T,
    parents: Vec<Link>,
}

/// A decoded event block carrying a typed payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventBlock<T> {
    cid: Cid,
    parents: Vec<Cid>,
    data: T,
    bytes: Arc<[u8]>,
}

impl<T> EventBlock<T>
where
    T: Serialize + DeserializeOwned,
{
    /// Build a new event from a payload and its causal parents.
    ///
    /// Parents are sorted and deduplicated before encoding; the parent set
    /// is a set, and equal sets must produce equal CIDs.
    pub fn create(data: T, parents: impl IntoIterator<Item = Cid>) -> Result<Self, BlockError> {
        let mut parents: Vec<Cid> = parents.into_iter().collect();
        parents.sort();
        parents.dedup();

        let view = EventViewRef {
            data: &data,
            parents: parents.iter().copied().map(Link).collect(),
        };
        let bytes = to_canonical_vec(&view).map_err(|e| BlockError::Encode(e.to_string()))?;
        let cid = Cid::digest(&bytes);

        Ok(EventBlock {
            cid,
            parents,
            data,
            bytes: bytes.into(),
        })
    }

    /// Decode an event from its block bytes.
    ///
    /// The CID is recomputed from the bytes, so decoding the same bytes twice
    /// always yields the same identity.
    pub fn decode(bytes: &[u8]) -> Result<Self, BlockError> {
        let view: EventView<T> =
            serde_json::from_slice(bytes).map_err(|e| BlockError::Decode(e.to_string()))?;
        Ok(EventBlock {
            cid: Cid::digest(bytes),
            parents: view.parents.into_iter().map(|l| l.0).collect(),
            data: view.data,
            bytes: bytes.into(),
        })
    }
}

impl<T> EventBlock<T> {
    pub fn cid(&self) -> Cid {
        self.cid
    }

    pub fn parents(&self) -> &[Cid] {
        &self.parents
    }

    pub fn data(&self) -> &T {
        &self.data
    }

    pub fn into_data(self) -> T {
        self.data
    }

    /// The canonical encoded bytes of this block.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// A type-erased view of this block for a [`crate::BlockStore`].
    pub fn to_raw(&self) -> RawBlock {
        RawBlock {
            cid: self.cid,
            parents: self.parents.clone(),
            bytes: Arc::clone(&self.bytes),
        }
    }
}

/// A type-erased event block: identity, parent links and bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawBlock {
    cid: Cid,
    parents: Vec<Cid>,
    bytes: Arc<[u8]>,
}

impl RawBlock {
    /// Parse the parent links out of encoded event bytes without
    /// interpreting the payload.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BlockError> {
        let view: EventView<Value> =
            serde_json::from_slice(bytes).map_err(|e| BlockError::Decode(e.to_string()))?;
        Ok(RawBlock {
            cid: Cid::digest(bytes),
            parents: view.parents.into_iter().map(|l| l.0).collect(),
            bytes: bytes.into(),
        })
    }

    pub fn cid(&self) -> Cid {
        self.cid
    }

    pub fn parents(&self) -> &[Cid] {
        &self.parents
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Check that the CID matches the block bytes.
    pub fn verify(&self) -> bool {
        Cid::digest(&self.bytes) == self.cid
    }

    /// Decode the payload into a typed event.
    pub fn decode<T: Serialize + DeserializeOwned>(&self) -> Result<EventBlock<T>, BlockError> {
        EventBlock::decode(&self.bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    struct Note {
        text: String,
    }

    fn note(text: &str) -> Note {
        Note {
            text: text.to_string(),
        }
    }

    #[test]
    fn test_cid_deterministic() {
        let a = EventBlock::create(note("a"), vec![]).unwrap();
        let b = EventBlock::create(note("a"), vec![]).unwrap();
        assert_eq!(a.cid(), b.cid());
        assert_eq!(a.bytes(), b.bytes());
    }

    #[test]
    fn test_cid_changes_with_content() {
        let a = EventBlock::create(note("a"), vec![]).unwrap();
        let b = EventBlock::create(note("b"), vec![]).unwrap();
        assert_ne!(a.cid(), b.cid());
    }

    #[test]
    fn test_parent_order_is_irrelevant() {
        let p1 = Cid::digest(b"p1");
        let p2 = Cid::digest(b"p2");
        let a = EventBlock::create(note("x"), vec![p1, p2]).unwrap();
        let b = EventBlock::create(note("x"), vec![p2, p1, p2]).unwrap();
        assert_eq!(a.cid(), b.cid());
        assert_eq!(a.parents().len(), 2);
    }

    #[test]
    fn test_decode_preserves_identity() {
        let parent = EventBlock::create(note("genesis"), vec![]).unwrap();
        let child = EventBlock::create(note("child"), vec![parent.cid()]).unwrap();

        let decoded: EventBlock<Note> = EventBlock::decode(child.bytes()).unwrap();
        assert_eq!(decoded.cid(), child.cid());
        assert_eq!(decoded.parents(), &[parent.cid()]);
        assert_eq!(decoded.data(), &note("child"));
    }

    #[test]
    fn test_raw_block_reads_parents() {
        let parent = EventBlock::create(note("genesis"), vec![]).unwrap();
        let child = EventBlock::create(note("child"), vec![parent.cid()]).unwrap();

        let raw = RawBlock::from_bytes(child.bytes()).unwrap();
        assert_eq!(raw, child.to_raw());
        assert!(raw.verify());
        assert_eq!(raw.decode::<Note>().unwrap().data(), &note("child"));
    }

    #[test]
    fn test_verify_tampered_block() {
        let a = EventBlock::create(note("a"), vec![]).unwrap();
        let b = EventBlock::create(note("b"), vec![]).unwrap();
        let tampered = RawBlock {
            cid: a.cid(),
            parents: vec![],
            bytes: b.to_raw().bytes,
        };
        assert!(!tampered.verify());
    }

    #[test]
    fn test_decode_garbage() {
        assert!(matches!(
            EventBlock::<Note>::decode(b"not json"),
            Err(BlockError::Decode(_))
        ));
    }
}
