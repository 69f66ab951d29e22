//! # mdcs-meta
//!
//! Metadata exchange for the Carnelia sync core.
//!
//! This crate provides:
//! - [`DbMeta`], the payload of one clock update
//! - The meta codec: event blocks wrapped in a JSON envelope of CRDT entries
//! - A [`Gateway`] abstraction plus [`MemoryGateway`]
//! - In-band key exchange over a [`KeyRegistry`]
//! - The [`MetaStore`], which persists and replicates the frontier
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use mdcs_meta::{DbMeta, MemoryGateway, MetaStore, MetaStoreConfigBuilder};
//! use mdcs_merkle::Cid;
//! use url::Url;
//!
//! # tokio_test::block_on(async {
//! let config = MetaStoreConfigBuilder::new("demo", Url::parse("memory://meta").unwrap()).build();
//! let store = MetaStore::new(config, Arc::new(MemoryGateway::new()));
//!
//! let cid = store.save(&DbMeta::new(vec![Cid::digest(b"root")]), None).await.unwrap();
//! assert_eq!(store.parents(), vec![cid]);
//! # });
//! ```

mod codec;
mod error;
mod exchange;
mod gateway;
mod keys;
mod meta;
mod ready;
mod store;

pub use codec::{
    create_db_meta_event_block, decode_meta_events, encode_events_with_parents, encode_meta_event,
    try_decode_meta_events, CodecError, CrdtEntry, DbMetaEvent, DbMetaEventBlock, DbMetaPayload,
};
pub use error::{MetaError, Result};
pub use exchange::{embed_key_into_payload, extract_and_register_key, store_key_name};
pub use gateway::{
    get_param, with_param, Gateway, GatewayError, MemoryGateway, SubscribeHandler, Subscription,
};
pub use keys::{ExtractedKey, KeyError, KeyHandle, KeyRegistry, MemoryKeyBag};
pub use meta::DbMeta;
pub use ready::ReadyOnce;
pub use store::{MetaConsumer, MetaStore, MetaStoreConfig, MetaStoreConfigBuilder};
