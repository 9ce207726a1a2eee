//! Wire envelope for text messages exchanged between peers.
//!
//! Every message is a JSON object carrying a `type` discriminator. Only the
//! kinds below are understood; anything else is rejected with
//! [`CoreError::UnknownMessageType`] so callers can log and drop it.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::types::ObjectId;

/// What a request message asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    /// The whole-tree snapshot.
    Model,
    /// The content of a single object.
    Object,
}

/// Ask the remote side to send a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMessage {
    pub request: RequestKind,
    pub identification: ObjectId,
}

/// Announces a peer descriptor file that is about to be pushed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushMessage {
    pub identification: ObjectId,
    /// Name the received file is stored under in the roster.
    pub name: String,
}

/// Lock traffic between established peers. Bootstrapping nodes ignore it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockMessage {
    #[serde(default)]
    pub action: String,
}

/// Recognized message kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Message {
    Request(RequestMessage),
    Push(PushMessage),
    Lock(LockMessage),
}

impl Message {
    /// Request for the whole-tree snapshot.
    pub fn model_request() -> Self {
        Message::Request(RequestMessage {
            request: RequestKind::Model,
            identification: ObjectId::model(),
        })
    }

    /// Request for the content of one object.
    pub fn object_request(identification: ObjectId) -> Self {
        Message::Request(RequestMessage {
            request: RequestKind::Object,
            identification,
        })
    }

    pub fn push(identification: ObjectId, name: impl Into<String>) -> Self {
        Message::Push(PushMessage {
            identification,
            name: name.into(),
        })
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a text message, rejecting unknown kinds explicitly.
    pub fn decode(text: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| CoreError::MalformedMessage(e.to_string()))?;
        let kind = value
            .get("type")
            .and_then(|t| t.as_str())
            .ok_or_else(|| CoreError::MalformedMessage("missing type".into()))?
            .to_string();

        match kind.as_str() {
            "request" => Ok(Message::Request(from_value(value)?)),
            "push" => Ok(Message::Push(from_value(value)?)),
            "lock" => Ok(Message::Lock(from_value(value)?)),
            _ => Err(CoreError::UnknownMessageType(kind)),
        }
    }
}

fn from_value<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| CoreError::MalformedMessage(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_request_wire_form() {
        let json = Message::model_request().to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "request");
        assert_eq!(value["request"], "model");
        assert_eq!(value["identification"], "MODEL");
    }

    #[test]
    fn test_decode_push() {
        let msg = Message::decode(r#"{"type":"push","identification":"p1","name":"bob.json"}"#)
            .unwrap();
        assert_eq!(msg, Message::push(ObjectId::new("p1"), "bob.json"));
    }

    #[test]
    fn test_decode_lock_without_fields() {
        let msg = Message::decode(r#"{"type":"lock"}"#).unwrap();
        assert!(matches!(msg, Message::Lock(_)));
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        let err = Message::decode(r#"{"type":"update","operation":"create"}"#).unwrap_err();
        assert!(matches!(err, CoreError::UnknownMessageType(t) if t == "update"));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            Message::decode("hello there").unwrap_err(),
            CoreError::MalformedMessage(_)
        ));
        assert!(matches!(
            Message::decode(r#"{"kind":"push"}"#).unwrap_err(),
            CoreError::MalformedMessage(_)
        ));
        assert!(matches!(
            Message::decode(r#"{"type":"push","name":"x"}"#).unwrap_err(),
            CoreError::MalformedMessage(_)
        ));
    }

    #[test]
    fn test_object_request_decodes() {
        let json = Message::object_request(ObjectId::new("obj1")).to_json().unwrap();
        match Message::decode(&json).unwrap() {
            Message::Request(req) => {
                assert_eq!(req.request, RequestKind::Object);
                assert_eq!(req.identification, ObjectId::new("obj1"));
            }
            other => panic!("expected request, got {:?}", other),
        }
    }
}
