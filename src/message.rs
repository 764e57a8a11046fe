//! Self-describing wire message unit.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Request type tag carried in a message's `type` field.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum MsgType {
    /// Write a key-value pair; head-bound from clients, carries a `version`
    /// field once forwarded between CRAQ replicas.
    Set,
    /// Read a key; tail-bound in CR, any replica in CRAQ.
    Get,
    /// Query the committed version of a key; CRAQ non-tail to tail only.
    Version,
}

impl MsgType {
    /// The wire spelling of this tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Set => "SET",
            Self::Get => "GET",
            Self::Version => "VERSION",
        }
    }

    /// Parses a wire tag string.
    pub fn parse_name(name: &str) -> Option<Self> {
        match name {
            "SET" => Some(Self::Set),
            "GET" => Some(Self::Get),
            "VERSION" => Some(Self::Version),
            _ => None,
        }
    }
}

/// A self-describing record of string-keyed JSON fields; the sole wire unit.
/// Well-known fields have typed accessors below; unknown fields are
/// preserved across decode/encode and otherwise ignored.
#[derive(Debug, PartialEq, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Message {
    fields: Map<String, Value>,
}

impl Message {
    const TYPE: &'static str = "type";
    const KEY: &'static str = "key";
    const VALUE: &'static str = "value";
    const VERSION: &'static str = "version";
    const STATUS: &'static str = "status";
    const REASON: &'static str = "reason";

    const STATUS_OK: &'static str = "OK";
    const STATUS_ERR: &'static str = "ERR";

    /// Composes a SET request (no version; the head assigns one in CRAQ).
    pub fn set_req(key: &str, value: &str) -> Self {
        let mut msg = Message::default();
        msg.insert(Self::TYPE, MsgType::Set.as_str().into());
        msg.insert(Self::KEY, key.into());
        msg.insert(Self::VALUE, value.into());
        msg
    }

    /// Composes a GET request.
    pub fn get_req(key: &str) -> Self {
        let mut msg = Message::default();
        msg.insert(Self::TYPE, MsgType::Get.as_str().into());
        msg.insert(Self::KEY, key.into());
        msg
    }

    /// Composes a VERSION query.
    pub fn version_req(key: &str) -> Self {
        let mut msg = Message::default();
        msg.insert(Self::TYPE, MsgType::Version.as_str().into());
        msg.insert(Self::KEY, key.into());
        msg
    }

    /// Composes a bare success reply.
    pub fn ok_reply() -> Self {
        let mut msg = Message::default();
        msg.insert(Self::STATUS, Self::STATUS_OK.into());
        msg
    }

    /// Composes a success reply carrying a value (GET replies).
    pub fn ok_with_value(value: &str) -> Self {
        let mut msg = Self::ok_reply();
        msg.insert(Self::VALUE, value.into());
        msg
    }

    /// Composes a success reply carrying a version number (VERSION replies
    /// and CRAQ write acknowledgements).
    pub fn ok_with_version(version: u64) -> Self {
        let mut msg = Self::ok_reply();
        msg.insert(Self::VERSION, version.into());
        msg
    }

    /// Composes an error reply; error replies never mutate replica state.
    pub fn err_reply(reason: impl Into<String>) -> Self {
        let mut msg = Message::default();
        msg.insert(Self::STATUS, Self::STATUS_ERR.into());
        msg.insert(Self::REASON, reason.into().into());
        msg
    }

    /// Parsed `type` field tag, if present and recognized.
    pub fn msg_type(&self) -> Option<MsgType> {
        MsgType::parse_name(self.str_field(Self::TYPE)?)
    }

    /// The `key` field.
    pub fn key(&self) -> Option<&str> {
        self.str_field(Self::KEY)
    }

    /// The `value` field.
    pub fn value(&self) -> Option<&str> {
        self.str_field(Self::VALUE)
    }

    /// The `version` field.
    pub fn version(&self) -> Option<u64> {
        self.fields.get(Self::VERSION)?.as_u64()
    }

    /// Stamps the `version` field (done by the CRAQ head before forwarding).
    pub fn set_version(&mut self, version: u64) {
        self.insert(Self::VERSION, version.into());
    }

    /// The `status` field.
    pub fn status(&self) -> Option<&str> {
        self.str_field(Self::STATUS)
    }

    /// The `reason` field of an error reply.
    pub fn reason(&self) -> Option<&str> {
        self.str_field(Self::REASON)
    }

    /// Whether this is a reply with `status` == `"OK"`.
    pub fn is_ok(&self) -> bool {
        self.status() == Some(Self::STATUS_OK)
    }

    /// Sets an arbitrary field, well-known or not.
    pub fn insert(&mut self, field: &str, value: Value) {
        self.fields.insert(field.into(), value);
    }

    /// Reads an arbitrary field, well-known or not.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    fn str_field(&self, field: &str) -> Option<&str> {
        self.fields.get(field)?.as_str()
    }
}

#[cfg(test)]
mod message_tests {
    use super::*;

    #[test]
    fn compose_requests() {
        let msg = Message::set_req("x", "1");
        assert_eq!(msg.msg_type(), Some(MsgType::Set));
        assert_eq!(msg.key(), Some("x"));
        assert_eq!(msg.value(), Some("1"));
        assert_eq!(msg.version(), None);

        let msg = Message::get_req("x");
        assert_eq!(msg.msg_type(), Some(MsgType::Get));
        assert_eq!(msg.key(), Some("x"));

        let msg = Message::version_req("x");
        assert_eq!(msg.msg_type(), Some(MsgType::Version));
    }

    #[test]
    fn compose_replies() {
        assert!(Message::ok_reply().is_ok());
        assert_eq!(Message::ok_with_value("7").value(), Some("7"));
        assert_eq!(Message::ok_with_version(3).version(), Some(3));

        let err = Message::err_reply("bad request");
        assert!(!err.is_ok());
        assert_eq!(err.status(), Some("ERR"));
        assert_eq!(err.reason(), Some("bad request"));
    }

    #[test]
    fn version_stamping() {
        let mut msg = Message::set_req("k", "v");
        msg.set_version(42);
        assert_eq!(msg.version(), Some(42));
    }

    #[test]
    fn unknown_fields_preserved() -> Result<(), serde_json::Error> {
        let raw = r#"{"type":"SET","key":"k","value":"v","shard":7}"#;
        let msg: Message = serde_json::from_str(raw)?;
        assert_eq!(msg.msg_type(), Some(MsgType::Set));
        assert_eq!(msg.get("shard"), Some(&serde_json::json!(7)));

        let encoded = serde_json::to_string(&msg)?;
        assert!(encoded.contains("\"shard\":7"));
        Ok(())
    }

    #[test]
    fn unrecognized_type_is_none() {
        let raw = r#"{"type":"FROB","key":"k"}"#;
        let msg: Message = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.msg_type(), None);
    }
}
