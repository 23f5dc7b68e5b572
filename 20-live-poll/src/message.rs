use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::tally::VoteStatus;

/// Every kind of message exchanged between the hub and its clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// hub → client, carries `client_id`.
    ConnectSuccess,
    /// client → hub, carries `vote` and `vote_key`.
    Vote,
    /// hub → client, empty payload.
    VoteSuccess,
    /// hub → client, carries `new_status`.
    VoteStatusChange,
    /// client → hub, carries `vote_key`.
    QueryVoteStatus,
    /// hub → client, carries `status`.
    VoteStatus,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::ConnectSuccess => "connect_success",
            MessageKind::Vote => "vote",
            MessageKind::VoteSuccess => "vote_success",
            MessageKind::VoteStatusChange => "vote_status_change",
            MessageKind::QueryVoteStatus => "query_vote_status",
            MessageKind::VoteStatus => "vote_status",
        }
    }

    pub fn from_kind(kind: &str) -> Option<Self> {
        let kind = match kind {
            "connect_success" => MessageKind::ConnectSuccess,
            "vote" => MessageKind::Vote,
            "vote_success" => MessageKind::VoteSuccess,
            "vote_status_change" => MessageKind::VoteStatusChange,
            "query_vote_status" => MessageKind::QueryVoteStatus,
            "vote_status" => MessageKind::VoteStatus,
            _ => return None,
        };
        Some(kind)
    }
}

/// Wire envelope: `{"kind": "...", "payload": {...}}`.
///
/// The kind stays a plain string so messages of unknown kinds still decode
/// and can be reported by name. A missing payload decodes as empty and
/// unknown top-level fields are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub kind: String,
    #[serde(default)]
    pub payload: Map<String, Value>,
}

impl Envelope {
    pub fn new(kind: MessageKind) -> Self {
        Self {
            kind: kind.as_str().to_string(),
            payload: Map::new(),
        }
    }

    pub fn with(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.payload.insert(field.to_string(), value.into());
        self
    }

    pub fn connect_success(client_id: &str) -> Self {
        Self::new(MessageKind::ConnectSuccess).with("client_id", client_id)
    }

    pub fn vote(vote: &str, vote_key: &str) -> Self {
        Self::new(MessageKind::Vote)
            .with("vote", vote)
            .with("vote_key", vote_key)
    }

    pub fn vote_success() -> Self {
        Self::new(MessageKind::VoteSuccess)
    }

    pub fn vote_status_change(new_status: bool) -> Self {
        Self::new(MessageKind::VoteStatusChange).with("new_status", new_status)
    }

    pub fn query_vote_status(vote_key: &str) -> Self {
        Self::new(MessageKind::QueryVoteStatus).with("vote_key", vote_key)
    }

    pub fn vote_status(status: VoteStatus) -> Self {
        Self::new(MessageKind::VoteStatus).with("status", status.as_str())
    }

    /// `None` for kinds outside the protocol.
    pub fn message_kind(&self) -> Option<MessageKind> {
        MessageKind::from_kind(&self.kind)
    }

    /// A payload field, only if present and a string.
    pub fn str_field(&self, field: &str) -> Option<&str> {
        self.payload.get(field).and_then(Value::as_str)
    }

    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn decode(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vote_success_has_empty_payload_object() {
        let encoded = Envelope::vote_success().encode().expect("encode");
        assert_eq!(encoded, r#"{"kind":"vote_success","payload":{}}"#);
    }

    #[test]
    fn decodes_client_vote() {
        let message = Envelope::decode(
            r#"{"kind":"vote","payload":{"vote":"2","vote_key":"abc"},"extra":1}"#,
        )
        .expect("decode");
        assert_eq!(message.message_kind(), Some(MessageKind::Vote));
        assert_eq!(message.str_field("vote"), Some("2"));
        assert_eq!(message.str_field("vote_key"), Some("abc"));
        assert_eq!(message, Envelope::vote("2", "abc"));
    }

    #[test]
    fn missing_payload_decodes_as_empty() {
        let message = Envelope::decode(r#"{"kind":"query_vote_status"}"#).expect("decode");
        assert!(message.payload.is_empty());
        assert_eq!(message.str_field("vote_key"), None);
    }

    #[test]
    fn non_string_fields_are_not_strings() {
        let message =
            Envelope::decode(r#"{"kind":"vote","payload":{"vote":2,"vote_key":null}}"#)
                .expect("decode");
        assert_eq!(message.str_field("vote"), None);
        assert_eq!(message.str_field("vote_key"), None);
    }

    #[test]
    fn unknown_kind_still_decodes() {
        let message = Envelope::decode(r#"{"kind":"dance","payload":{}}"#).expect("decode");
        assert_eq!(message.kind, "dance");
        assert_eq!(message.message_kind(), None);
    }

    #[test]
    fn rejects_garbage() {
        assert!(Envelope::decode("not json").is_err());
        assert!(Envelope::decode(r#"{"payload":{}}"#).is_err());
    }

    #[test]
    fn status_messages_carry_expected_fields() {
        let change = Envelope::vote_status_change(true);
        assert_eq!(change.payload.get("new_status"), Some(&Value::Bool(true)));

        let status = Envelope::vote_status(VoteStatus::AlreadyVoted);
        assert_eq!(status.str_field("status"), Some("already_voted"));

        let welcome = Envelope::connect_success("xyz");
        assert_eq!(welcome.str_field("client_id"), Some("xyz"));
    }
}
