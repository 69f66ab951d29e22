//! Document updates and query results.

use mdcs_merkle::ClockHead;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One document write inside a transaction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DocUpdate {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub del: bool,
}

impl DocUpdate {
    /// Write `value` under `id`.
    pub fn put(id: impl Into<String>, value: Value) -> Self {
        DocUpdate {
            id: id.into(),
            value: Some(value),
            del: false,
        }
    }

    /// Delete `id`.
    pub fn delete(id: impl Into<String>) -> Self {
        DocUpdate {
            id: id.into(),
            value: None,
            del: true,
        }
    }
}

/// Payload of a transaction event block.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TxnPayload {
    pub updates: Vec<DocUpdate>,
}

/// A materialized document.
#[derive(Clone, Debug, PartialEq)]
pub struct Doc {
    pub id: String,
    pub value: Value,
}

/// Result of a committed bulk write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CrdtMeta {
    pub head: ClockHead,
}

/// Every live document, with the head it was read at.
#[derive(Clone, Debug, PartialEq)]
pub struct AllDocs {
    pub rows: Vec<Doc>,
    pub head: ClockHead,
}

/// Updates committed since a given head, in causal order.
#[derive(Clone, Debug, PartialEq)]
pub struct Changes {
    pub updates: Vec<DocUpdate>,
    pub head: ClockHead,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_update_wire_shape() {
        let put = DocUpdate::put("a", json!({"n": 1}));
        assert_eq!(
            serde_json::to_value(&put).unwrap(),
            json!({"id": "a", "value": {"n": 1}})
        );

        let del = DocUpdate::delete("a");
        assert_eq!(
            serde_json::to_value(&del).unwrap(),
            json!({"id": "a", "del": true})
        );
        let back: DocUpdate = serde_json::from_value(json!({"id": "a", "del": true})).unwrap();
        assert_eq!(back, del);
    }
}
