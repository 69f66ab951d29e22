//! In-band key exchange.
//!
//! A named symmetric key can ride along with the first clock update of a
//! store: the sender embeds it into the payload's `DbMeta.key`, the receiver
//! registers it under a name derived from the store address.

use crate::codec::{decode_meta_events, encode_meta_event};
use crate::error::{MetaError, Result};
use crate::gateway::get_param;
use crate::keys::{KeyError, KeyRegistry};
use crate::meta::DbMeta;
use tracing::{debug, error};
use url::Url;

/// Registry name of a store's data key:
/// `"@" + (localName | name) + [":" + index] + ":data@"`.
pub fn store_key_name(url: &Url) -> Result<String> {
    let name = get_param(url, "localName")
        .filter(|n| !n.is_empty())
        .or_else(|| get_param(url, "name").filter(|n| !n.is_empty()))
        .ok_or_else(|| MetaError::MissingStoreName(url.to_string()))?;

    let mut parts = vec![name];
    if let Some(index) = get_param(url, "index").filter(|i| !i.is_empty()) {
        parts.push(index);
    }
    parts.push("data".to_string());
    Ok(format!("@{}@", parts.join(":")))
}

/// Decode `bytes` and register the key carried by the first event, if any.
///
/// Returns the first decoded `DbMeta`, or `None` for a payload without
/// entries.
pub async fn extract_and_register_key(
    registry: &dyn KeyRegistry,
    url: &Url,
    bytes: &[u8],
) -> Result<Option<DbMeta>> {
    debug!(url = %url, "extracting key from meta payload");
    let Some(first) = decode_meta_events(bytes).into_iter().next() else {
        debug!(url = %url, "no key in meta payload");
        return Ok(None);
    };

    if let Some(key) = first.db_meta.key() {
        let name = store_key_name(url)?;
        registry
            .set_named_key(&name, key)
            .await
            .map_err(|source| MetaError::KeyRegistry {
                name: name.clone(),
                source,
            })?;
        debug!(url = %url, name = %name, "registered key from meta payload");
    }

    Ok(Some(first.db_meta))
}

/// Rewrite the first event of `bytes` so that it carries the store's
/// extractable key. The new event keeps the original parent set.
pub async fn embed_key_into_payload(
    registry: &dyn KeyRegistry,
    url: &Url,
    bytes: &[u8],
) -> Result<Vec<u8>> {
    debug!(url = %url, "embedding key into meta payload");
    let name = store_key_name(url)?;
    let key_err = |source: KeyError| {
        error!(name = %name, "failed to read extractable key");
        MetaError::KeyRegistry {
            name: name.clone(),
            source,
        }
    };
    let handle = registry
        .get_named_extractable_key(&name, true)
        .await
        .map_err(key_err)?;
    let extracted = handle.extract().map_err(key_err)?;

    let first = decode_meta_events(bytes)
        .into_iter()
        .next()
        .ok_or(MetaError::EmptyPayload)?;
    let db_meta = first.db_meta.with_key(extracted.key_str);
    let (_, encoded) = encode_meta_event(&db_meta, &first.parents)?;

    debug!(url = %url, name = %name, "embedded key into meta payload");
    Ok(encoded)
}
