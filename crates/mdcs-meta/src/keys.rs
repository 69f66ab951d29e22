//! Named symmetric key registry.
//!
//! The registry stores keys at rest; this crate only needs to register a key
//! received in-band and to read back extractable key material before
//! embedding it into a payload.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use parking_lot::RwLock;
use rand::RngCore;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Errors reported by a key registry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("no key named {0}")]
    NotFound(String),

    #[error("key {0} is not extractable")]
    NotExtractable(String),

    #[error("key storage failure: {0}")]
    Storage(String),
}

/// Extracted key material.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtractedKey {
    pub key_str: String,
}

/// A handle to a named key held by a registry.
#[derive(Clone, Debug)]
pub struct KeyHandle {
    name: String,
    material: Arc<str>,
    extractable: bool,
}

impl KeyHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_extractable(&self) -> bool {
        self.extractable
    }

    /// Export the key string. Fails for keys stored as non-extractable.
    pub fn extract(&self) -> Result<ExtractedKey, KeyError> {
        if !self.extractable {
            return Err(KeyError::NotExtractable(self.name.clone()));
        }
        Ok(ExtractedKey {
            key_str: self.material.to_string(),
        })
    }
}

/// Storage of named symmetric keys.
#[async_trait]
pub trait KeyRegistry: Send + Sync {
    async fn set_named_key(&self, name: &str, key_str: &str) -> Result<(), KeyError>;

    /// Look up a key. With `extractable` set, the returned handle must
    /// allow [`KeyHandle::extract`].
    async fn get_named_extractable_key(
        &self,
        name: &str,
        extractable: bool,
    ) -> Result<KeyHandle, KeyError>;
}

#[derive(Clone, Debug)]
struct StoredKey {
    material: Arc<str>,
    extractable: bool,
}

/// In-memory key bag.
#[derive(Clone, Debug, Default)]
pub struct MemoryKeyBag {
    keys: Arc<RwLock<HashMap<String, StoredKey>>>,
}

impl MemoryKeyBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a key, choosing whether it may later be exported.
    pub fn set_named_key_with(&self, name: &str, key_str: &str, extractable: bool) {
        self.keys.write().insert(
            name.to_string(),
            StoredKey {
                material: key_str.into(),
                extractable,
            },
        );
    }

    /// Generate and store a random 256-bit key, returning its base64 form.
    pub fn generate_named_key(&self, name: &str) -> String {
        let mut raw = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut raw);
        let key_str = STANDARD.encode(raw);
        self.set_named_key_with(name, &key_str, true);
        debug!(name, "generated named key");
        key_str
    }

    pub fn contains(&self, name: &str) -> bool {
        self.keys.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.keys.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KeyRegistry for MemoryKeyBag {
    async fn set_named_key(&self, name: &str, key_str: &str) -> Result<(), KeyError> {
        self.set_named_key_with(name, key_str, true);
        Ok(())
    }

    async fn get_named_extractable_key(
        &self,
        name: &str,
        extractable: bool,
    ) -> Result<KeyHandle, KeyError> {
        let stored = self
            .keys
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| KeyError::NotFound(name.to_string()))?;

        if extractable && !stored.extractable {
            return Err(KeyError::NotExtractable(name.to_string()));
        }

        Ok(KeyHandle {
            name: name.to_string(),
            material: stored.material,
            extractable: stored.extractable,
        })
    }
}
