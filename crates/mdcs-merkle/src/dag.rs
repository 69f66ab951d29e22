//! Canonical DAG-JSON style encoding.
//!
//! Blocks are encoded as JSON with lexicographically ordered object keys, so
//! two independent encodings of equal values are byte-identical. Links and raw
//! bytes carry explicit type tags:
//!
//! - a link to another block is `{"/": "<cid>"}`
//! - raw bytes are `{"/": {"bytes": "<base64, unpadded>"}}`

use crate::hash::Cid;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine as _;
use serde::ser::SerializeMap;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// A tagged reference to another block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Link(pub Cid);

impl From<Cid> for Link {
    fn from(cid: Cid) -> Self {
        Link(cid)
    }
}

impl Serialize for Link {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry("/", &self.0.to_hex())?;
        map.end()
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawLink {
    #[serde(rename = "/")]
    target: String,
}

impl<'de> Deserialize<'de> for Link {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawLink::deserialize(deserializer)?;
        Cid::parse(&raw.target).map(Link).map_err(de::Error::custom)
    }
}

/// Tagged binary data.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct TaggedBytes(pub Vec<u8>);

impl Serialize for TaggedBytes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut inner = Map::new();
        inner.insert(
            "bytes".to_string(),
            Value::String(STANDARD_NO_PAD.encode(&self.0)),
        );
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry("/", &Value::Object(inner))?;
        map.end()
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawBytes {
    #[serde(rename = "/")]
    inner: RawBytesInner,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawBytesInner {
    bytes: String,
}

impl<'de> Deserialize<'de> for TaggedBytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawBytes::deserialize(deserializer)?;
        STANDARD_NO_PAD
            .decode(raw.inner.bytes.as_bytes())
            .map(TaggedBytes)
            .map_err(de::Error::custom)
    }
}

/// Encode a value canonically: object keys sorted at every level, no
/// insignificant whitespace.
pub fn to_canonical_vec<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    let value = sort_keys(serde_json::to_value(value)?);
    serde_json::to_vec(&value)
}

fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, sort_keys(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}
