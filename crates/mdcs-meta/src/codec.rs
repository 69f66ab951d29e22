//! Wire codec for meta payloads.
//!
//! A meta payload is UTF-8 JSON: a list of CRDT entries, each carrying one
//! encoded event block (padded base64) and the parent set it was written
//! against:
//!
//! ```text
//! [ { "cid": "<cid>", "data": "<base64(event block)>", "parents": ["<cid>", ...] } ]
//! ```
//!
//! The event block wraps `{ "dbMeta": <canonical DbMeta bytes> }`.
//!
//! Malformed or absent history is never fatal: [`decode_meta_events`] maps
//! every failure to an empty sequence. [`try_decode_meta_events`] reports
//! what went wrong for callers that care.

use crate::meta::DbMeta;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use mdcs_merkle::{BlockError, Cid, CidParseError, EventBlock, TaggedBytes};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Errors from strict meta decoding and encoding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("meta payload is not a list of entries: {0}")]
    Envelope(String),

    #[error("entry {index}: invalid base64: {reason}")]
    Base64 { index: usize, reason: String },

    #[error("entry {index}: invalid event block: {source}")]
    Block { index: usize, source: BlockError },

    #[error("entry {index}: invalid parent: {source}")]
    Parent { index: usize, source: CidParseError },

    #[error("entry {index}: cid {claimed} does not match block {actual}")]
    CidMismatch {
        index: usize,
        claimed: String,
        actual: String,
    },

    #[error("invalid DbMeta: {0}")]
    DbMeta(String),

    #[error("failed to encode: {0}")]
    Encode(String),
}

/// One wire-level envelope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrdtEntry {
    pub cid: String,
    pub data: String,
    pub parents: Vec<String>,
}

/// Payload of a meta event block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbMetaPayload {
    #[serde(rename = "dbMeta")]
    pub db_meta: TaggedBytes,
}

pub type DbMetaEventBlock = EventBlock<DbMetaPayload>;

/// A decoded causal event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DbMetaEvent {
    pub event_cid: Cid,
    pub parents: Vec<Cid>,
    pub db_meta: DbMeta,
}

/// Build the event block for a `DbMeta` linked to `parents`.
pub fn create_db_meta_event_block(
    db_meta: &DbMeta,
    parents: &[Cid],
) -> Result<DbMetaEventBlock, CodecError> {
    let payload = DbMetaPayload {
        db_meta: TaggedBytes(db_meta.encode()?),
    };
    EventBlock::create(payload, parents.iter().copied())
        .map_err(|e| CodecError::Encode(e.to_string()))
}

/// Encode events into a meta payload. Every entry carries the same
/// `parents`.
pub fn encode_events_with_parents(
    events: &[DbMetaEventBlock],
    parents: &[Cid],
) -> Result<Vec<u8>, CodecError> {
    let parents: Vec<String> = parents.iter().map(Cid::to_string).collect();
    let entries: Vec<CrdtEntry> = events
        .iter()
        .map(|event| CrdtEntry {
            cid: event.cid().to_string(),
            data: STANDARD.encode(event.bytes()),
            parents: parents.clone(),
        })
        .collect();
    serde_json::to_vec(&entries).map_err(|e| CodecError::Encode(e.to_string()))
}

/// Build one event and encode it as a single-entry payload.
pub fn encode_meta_event(
    db_meta: &DbMeta,
    parents: &[Cid],
) -> Result<(DbMetaEventBlock, Vec<u8>), CodecError> {
    let event = create_db_meta_event_block(db_meta, parents)?;
    let bytes = encode_events_with_parents(std::slice::from_ref(&event), parents)?;
    Ok((event, bytes))
}

/// Strictly decode a meta payload.
///
/// Empty or whitespace-only input is an empty history, not an error.
pub fn try_decode_meta_events(bytes: &[u8]) -> Result<Vec<DbMetaEvent>, CodecError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }

    let entries: Vec<CrdtEntry> =
        serde_json::from_slice(bytes).map_err(|e| CodecError::Envelope(e.to_string()))?;

    entries
        .into_iter()
        .enumerate()
        .map(|(index, entry)| decode_entry(index, entry))
        .collect()
}

fn decode_entry(index: usize, entry: CrdtEntry) -> Result<DbMetaEvent, CodecError> {
    let block_bytes = STANDARD
        .decode(entry.data.as_bytes())
        .map_err(|e| CodecError::Base64 {
            index,
            reason: e.to_string(),
        })?;
    let block: DbMetaEventBlock =
        EventBlock::decode(&block_bytes).map_err(|source| CodecError::Block { index, source })?;

    if entry.cid != block.cid().to_string() {
        return Err(CodecError::CidMismatch {
            index,
            claimed: entry.cid,
            actual: block.cid().to_string(),
        });
    }

    let parents = entry
        .parents
        .iter()
        .map(|p| Cid::parse(p))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| CodecError::Parent { index, source })?;
    let db_meta = DbMeta::decode(&block.data().db_meta.0)?;

    Ok(DbMetaEvent {
        event_cid: block.cid(),
        parents,
        db_meta,
    })
}

/// Decode a meta payload, treating any malformation as "no prior state".
pub fn decode_meta_events(bytes: &[u8]) -> Vec<DbMetaEvent> {
    match try_decode_meta_events(bytes) {
        Ok(events) => {
            if events.is_empty() {
                debug!("no CRDT entries found in meta payload");
            }
            events
        }
        Err(e) => {
            debug!(error = %e, len = bytes.len(), "ignoring malformed meta payload");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_meta() -> DbMeta {
        DbMeta::new(vec![Cid::digest(b"car-1"), Cid::digest(b"car-2")])
    }

    #[test]
    fn test_roundtrip_single_event() {
        let parents = vec![Cid::digest(b"p1"), Cid::digest(b"p2")];
        let (event, bytes) = encode_meta_event(&sample_meta(), &parents).unwrap();

        let decoded = try_decode_meta_events(&bytes).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].event_cid, event.cid());
        assert_eq!(decoded[0].parents, parents);
        assert_eq!(decoded[0].db_meta, sample_meta());
    }

    #[test]
    fn test_wire_shape() {
        let parent = Cid::digest(b"p1");
        let (event, bytes) = encode_meta_event(&sample_meta(), &[parent]).unwrap();
        let entries: Vec<CrdtEntry> = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].cid, event.cid().to_string());
        assert_eq!(entries[0].parents, vec![parent.to_string()]);
        assert_eq!(STANDARD.decode(&entries[0].data).unwrap(), event.bytes());
    }

    #[test]
    fn test_every_entry_carries_parents() {
        let parents = vec![Cid::digest(b"p1")];
        let a = create_db_meta_event_block(&DbMeta::new(vec![]), &parents).unwrap();
        let b = create_db_meta_event_block(&sample_meta(), &parents).unwrap();
        let bytes = encode_events_with_parents(&[a, b], &parents).unwrap();

        let decoded = decode_meta_events(&bytes);
        assert_eq!(decoded.len(), 2);
        assert!(decoded.iter().all(|e| e.parents == parents));
    }

    #[test]
    fn test_event_cid_is_content_derived() {
        let a = create_db_meta_event_block(&sample_meta(), &[]).unwrap();
        let b = create_db_meta_event_block(&sample_meta(), &[]).unwrap();
        let c = create_db_meta_event_block(&sample_meta(), &[Cid::digest(b"p")]).unwrap();
        assert_eq!(a.cid(), b.cid());
        assert_ne!(a.cid(), c.cid());
    }

    #[test]
    fn test_empty_inputs() {
        assert!(decode_meta_events(b"").is_empty());
        assert!(decode_meta_events(b"  \n").is_empty());
        assert!(decode_meta_events(b"[]").is_empty());
    }

    #[test]
    fn test_malformed_inputs_degrade_to_empty() {
        let inputs: [&[u8]; 5] = [
            b"not json",
            b"{}",
            b"null",
            b"[1,2,3]",
            br#"[{"cid":"x","data":"!!!","parents":[]}]"#,
        ];
        for input in inputs {
            assert!(decode_meta_events(input).is_empty());
            assert!(try_decode_meta_events(input).is_err());
        }
    }

    #[test]
    fn test_cid_mismatch_is_rejected() {
        let (_, bytes) = encode_meta_event(&sample_meta(), &[]).unwrap();
        let mut entries: Vec<CrdtEntry> = serde_json::from_slice(&bytes).unwrap();
        entries[0].cid = Cid::digest(b"other").to_string();
        let tampered = serde_json::to_vec(&entries).unwrap();

        assert!(matches!(
            try_decode_meta_events(&tampered),
            Err(CodecError::CidMismatch { index: 0, .. })
        ));
    }

    #[test]
    fn test_padded_base64() {
        // Block bytes rarely land on a multiple of three; padding must survive.
        let (event, bytes) = encode_meta_event(&DbMeta::new(vec![]), &[]).unwrap();
        let entries: Vec<CrdtEntry> = serde_json::from_slice(&bytes).unwrap();
        let expected_pad = (3 - event.bytes().len() % 3) % 3;
        assert_eq!(
            entries[0].data.chars().rev().take_while(|c| *c == '=').count(),
            expected_pad
        );
    }
}
