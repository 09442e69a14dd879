// src/domain/electron.rs

//! Work and result records exchanged through a conductor.
//!
//! Only the identifiers are interpreted here. Every other JSON member is
//! kept in an ordered map and written back out verbatim, so payload fields
//! added by producers survive a round trip through the conductor untouched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A unit of dispatchable work.
///
/// `id` is assigned by the originator and must be unique within the system.
/// `sender_id` names the private reply queue the result is returned to; it is
/// stamped by the conductor immediately before publishing, so callers leave it
/// empty.
///
/// # Example
///
/// ```
/// use amqp_conductor::Electron;
///
/// let electron = Electron::new("a1").with_field("payload", "aGVsbG8=");
/// assert_eq!(electron.id, "a1");
/// assert_eq!(electron.field("payload").and_then(|v| v.as_str()), Some("aGVsbG8="));
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Electron {
    // ---
    /// Reply queue of whoever sent this electron.
    #[serde(rename = "SenderID", default)]
    pub sender_id: String,

    /// Unique electron identifier.
    #[serde(rename = "ID")]
    pub id: String,

    /// Opaque members carried through unmodified.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Electron {
    /// Create an electron with the given identifier and no payload.
    pub fn new(id: impl Into<String>) -> Self {
        // ---
        Self {
            sender_id: String::new(),
            id: id.into(),
            fields: Map::new(),
        }
    }

    /// Attach an opaque member.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Look up an opaque member.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

/// The result record for a previously dispatched electron.
///
/// `electron_id` correlates the result with the electron that produced it;
/// all other completion metadata is opaque.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Properties {
    // ---
    /// Identifier of the electron these properties belong to.
    #[serde(rename = "ElectronID")]
    pub electron_id: String,

    /// Opaque completion metadata carried through unmodified.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Properties {
    /// Create an empty result for the given electron.
    pub fn new(electron_id: impl Into<String>) -> Self {
        // ---
        Self {
            electron_id: electron_id.into(),
            fields: Map::new(),
        }
    }

    /// Attach an opaque member.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Look up an opaque member.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use serde_json::json;

    #[test]
    fn test_electron_wire_names() {
        // ---
        let mut electron = Electron::new("e-1").with_field("AtomID", "echo");
        electron.sender_id = "reply-7".into();

        let value = serde_json::to_value(&electron).unwrap();
        assert_eq!(value, json!({"SenderID": "reply-7", "ID": "e-1", "AtomID": "echo"}));
    }

    #[test]
    fn test_electron_missing_sender_defaults_empty() {
        // ---
        let electron: Electron = serde_json::from_str(r#"{"ID":"e-2"}"#).unwrap();
        assert_eq!(electron.id, "e-2");
        assert!(electron.sender_id.is_empty());
        assert!(electron.fields.is_empty());
    }

    #[test]
    fn test_electron_requires_id() {
        // ---
        let parsed = serde_json::from_str::<Electron>(r#"{"SenderID":"x"}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_properties_preserve_opaque_fields() {
        // ---
        let raw = r#"{"ElectronID":"a1","status":"ok","Result":{"n":[1,2,3]}}"#;
        let props: Properties = serde_json::from_str(raw).unwrap();

        assert_eq!(props.electron_id, "a1");
        assert_eq!(props.field("status"), Some(&json!("ok")));
        assert_eq!(props.field("Result"), Some(&json!({"n": [1, 2, 3]})));

        let back: Value = serde_json::to_value(&props).unwrap();
        assert_eq!(back, serde_json::from_str::<Value>(raw).unwrap());
    }
}
