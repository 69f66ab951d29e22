//! # mdcs-crdt
//!
//! Transactional document engine for the Carnelia sync core.
//!
//! This crate provides:
//! - [`CrdtEngine`]: bulk document writes committed as Merkle-Clock events
//! - Causal-order reads (`get`, `all_docs`, `changes`)
//! - [`IndexHook`]s reset whenever a merge reshapes the frontier
//! - Head persistence and remote merge through an `mdcs-meta` store
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use mdcs_crdt::{CrdtConfigBuilder, CrdtEngine, DocUpdate};
//! use mdcs_merkle::MemoryBlockStore;
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let engine = CrdtEngine::new(
//!     CrdtConfigBuilder::new("notes").build(),
//!     Arc::new(MemoryBlockStore::new()),
//! );
//! engine.bulk(vec![DocUpdate::put("todo", json!({"done": false}))]).await.unwrap();
//! assert_eq!(engine.get("todo").unwrap(), Some(json!({"done": false})));
//! # });
//! ```

pub mod config;
pub mod document;
pub mod engine;
pub mod error;
pub mod index;

pub use config::{CrdtConfig, CrdtConfigBuilder};
pub use document::{AllDocs, Changes, CrdtMeta, Doc, DocUpdate, TxnPayload};
pub use engine::CrdtEngine;
pub use error::{CrdtError, Result};
pub use index::IndexHook;
