//! Plaintext DIDComm message structure and builders.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::error::{Error, Result};

/// Media type of a plaintext message. If the `typ` header is present on the
/// wire it must carry this value.
pub const PLAINTEXT_TYP: &str = "application/didcomm-plain+json";

fn default_typ() -> String {
    PLAINTEXT_TYP.to_string()
}

/// A plaintext message. Provides helpers for message building; packing and
/// unpacking live in the didpost-agent crate.
///
/// The body is strongly typed when `T` is specified and defaults to an
/// arbitrary JSON value.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
#[serde(bound = "T: Serialize + serde::de::DeserializeOwned")]
pub struct Message<T = Value> {
    /// Message id. Must be unique to the sender.
    pub id: String,

    /// Optional, if present it must be "application/didcomm-plain+json".
    #[serde(default = "default_typ")]
    pub typ: String,

    /// Message type attribute value MUST be a valid message type URI that,
    /// when resolved, gives human readable information about the message.
    #[serde(rename = "type")]
    pub type_: String,

    /// Message body.
    pub body: T,

    /// Sender identifier. When present it must be a DID resolvable at pack
    /// time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,

    /// Identifier(s) for recipients, each a DID resolvable at pack time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<Vec<String>>,

    /// Uniquely identifies the thread the message belongs to. If not
    /// included, the `id` property is treated as the thread id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thid: Option<String>,

    /// Parent thread id when the message is a child of another thread.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pthid: Option<String>,

    /// Sender-asserted creation time in UTC epoch seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_time: Option<u64>,

    /// Sender-asserted expiry time in UTC epoch seconds. When omitted the
    /// message has no expiration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_time: Option<u64>,

    /// Custom message headers.
    #[serde(flatten)]
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub extra_headers: HashMap<String, Value>,
}

/// Type alias for a message with an arbitrary JSON body.
pub type UntypedMessage = Message<Value>;

impl<T> Message<T>
where
    T: Serialize + serde::de::DeserializeOwned,
{
    /// Create a new message with the given type and body. A fresh v4 UUID is
    /// used as the message id and `created_time` is set to now.
    pub fn new(type_: impl Into<String>, body: T) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            typ: default_typ(),
            type_: type_.into(),
            body,
            from: None,
            to: None,
            thid: None,
            pthid: None,
            created_time: Some(chrono::Utc::now().timestamp() as u64),
            expires_time: None,
            extra_headers: HashMap::new(),
        }
    }

    /// Builder method to override the generated message id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Builder method to set the sender.
    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    /// Builder method to set the recipients.
    pub fn with_to(mut self, to: Vec<String>) -> Self {
        self.to = Some(to);
        self
    }

    /// Builder method to add a single recipient.
    pub fn with_recipient(mut self, recipient: &str) -> Self {
        self.to
            .get_or_insert_with(Vec::new)
            .push(recipient.to_string());
        self
    }

    /// Builder method to set the thread id.
    pub fn with_thread_id(mut self, thid: impl Into<String>) -> Self {
        self.thid = Some(thid.into());
        self
    }

    /// Builder method to set the parent thread id.
    pub fn with_parent_thread_id(mut self, pthid: impl Into<String>) -> Self {
        self.pthid = Some(pthid.into());
        self
    }

    /// Builder method to set the creation time (UTC epoch seconds).
    pub fn with_created_time(mut self, created_time: u64) -> Self {
        self.created_time = Some(created_time);
        self
    }

    /// Builder method to set the expiry time (UTC epoch seconds).
    pub fn with_expires_time(mut self, expires_time: u64) -> Self {
        self.expires_time = Some(expires_time);
        self
    }

    /// Builder method to add a custom header.
    pub fn with_header(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra_headers.insert(key.into(), value);
        self
    }

    /// Check structural invariants that do not require resolution: non-empty
    /// id and type, the fixed `typ` value, and no empty recipient list.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(Error::Validation("message id must not be empty".into()));
        }
        if self.type_.is_empty() {
            return Err(Error::Validation("message type must not be empty".into()));
        }
        if self.typ != PLAINTEXT_TYP {
            return Err(Error::Validation(format!(
                "unexpected typ header: {}",
                self.typ
            )));
        }
        if let Some(to) = &self.to {
            if to.is_empty() {
                return Err(Error::Validation(
                    "recipient list must not be empty when present".into(),
                ));
            }
        }
        Ok(())
    }

    /// The effective thread id: `thid` when set, otherwise the message id.
    pub fn thread_id(&self) -> &str {
        self.thid.as_deref().unwrap_or(&self.id)
    }

    /// Serialize to the JSON wire form.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from the JSON wire form.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl Message<Value> {
    /// Try to parse the body into a strongly typed message.
    pub fn parse_body<T: Serialize + serde::de::DeserializeOwned>(self) -> Result<Message<T>> {
        let typed_body: T = serde_json::from_value(self.body)?;

        Ok(Message {
            id: self.id,
            typ: self.typ,
            type_: self.type_,
            body: typed_body,
            from: self.from,
            to: self.to,
            thid: self.thid,
            pthid: self.pthid,
            created_time: self.created_time,
            expires_time: self.expires_time,
            extra_headers: self.extra_headers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn build_and_serialize_roundtrip() {
        let msg = Message::new("https://didpost.example/protocols/basic/1.0/text", json!({"text": "hi"}))
            .with_from("did:example:alice")
            .with_to(vec!["did:example:bob".to_string()]);

        let json = msg.to_json().unwrap();
        let parsed: UntypedMessage = Message::from_json(&json).unwrap();

        assert_eq!(parsed, msg);
        assert_eq!(parsed.from.as_deref(), Some("did:example:alice"));
        assert_eq!(parsed.to.as_deref(), Some(&["did:example:bob".to_string()][..]));
    }

    #[test]
    fn wire_form_uses_literal_from_and_to() {
        let msg = Message::new("https://didpost.example/test", json!({}))
            .with_id("msg-1")
            .with_from("did:example:alice")
            .with_recipient("did:example:bob");

        let value: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(value["from"], "did:example:alice");
        assert_eq!(value["to"][0], "did:example:bob");
        assert_eq!(value["type"], "https://didpost.example/test");
        assert_eq!(value["typ"], PLAINTEXT_TYP);
    }

    #[test]
    fn optional_fields_are_omitted() {
        let msg = Message::new("https://didpost.example/test", json!({})).with_id("msg-2");
        let value: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();

        assert!(value.get("from").is_none());
        assert!(value.get("to").is_none());
        assert!(value.get("thid").is_none());
        assert!(value.get("expires_time").is_none());
    }

    #[test]
    fn thread_id_falls_back_to_message_id() {
        let msg = Message::new("https://didpost.example/test", json!({})).with_id("msg-3");
        assert_eq!(msg.thread_id(), "msg-3");

        let threaded = msg.with_thread_id("thread-9");
        assert_eq!(threaded.thread_id(), "thread-9");
    }

    #[test]
    fn validate_rejects_empty_recipients() {
        let msg = Message::new("https://didpost.example/test", json!({})).with_to(vec![]);
        assert!(msg.validate().is_err());
    }

    #[test]
    fn typed_body_parses() {
        #[derive(Debug, Serialize, Deserialize, PartialEq)]
        struct Ping {
            response_requested: bool,
        }

        let msg = Message::new(
            "https://didcomm.org/trust-ping/2.0/ping",
            json!({"response_requested": true}),
        );
        let typed: Message<Ping> = msg.parse_body().unwrap();
        assert!(typed.body.response_requested);
    }
}
