//! # mdcs-merkle
//!
//! Merkle-Clock implementation for the Carnelia sync core.
//!
//! This crate provides:
//! - Content identifiers ([`Cid`]) for immutable blocks
//! - Canonical DAG-JSON style encoding with tagged links and bytes
//! - Content-addressed [`EventBlock`]s linking to their causal parents
//! - A [`BlockStore`] trait for resolving parent links
//! - The [`MerkleClock`], which tracks the causal frontier
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use mdcs_merkle::{BlockStore, EventBlock, MemoryBlockStore, MerkleClock};
//!
//! let store = Arc::new(MemoryBlockStore::new());
//! let clock = MerkleClock::new(store.clone());
//!
//! let genesis = EventBlock::create("genesis".to_string(), vec![]).unwrap();
//! store.put(genesis.to_raw()).unwrap();
//! clock.apply_head(&[genesis.cid()], &[]);
//!
//! let child = EventBlock::create("child".to_string(), vec![genesis.cid()]).unwrap();
//! store.put(child.to_raw()).unwrap();
//! clock.apply_head(&[child.cid()], &clock.head());
//!
//! // The child supersedes the genesis event
//! assert_eq!(clock.head(), vec![child.cid()]);
//! ```

mod clock;
mod dag;
mod event;
mod hash;
mod store;

pub use clock::{same_set, ClockHead, HeadChange, MergeKind, MerkleClock, ObserverId};
pub use dag::{to_canonical_vec, Link, TaggedBytes};
pub use event::{BlockError, EventBlock, RawBlock};
pub use hash::{Cid, CidParseError, Hasher};
pub use store::{BlockStore, MemoryBlockStore};
