// consentry/src/message.rs

use serde::{ser::SerializeMap, Deserialize, Serialize, Serializer};
use std::sync::Arc;

use crate::{
    operation::{OperationRequest, OperationResult},
    tasks::TaskList,
    tokens::TokenEncoding,
};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role { System, User, Assistant }

impl Role {
    pub fn as_str(self) -> &'static str {
        match self { Self::System => "system", Self::User => "user", Self::Assistant => "assistant" }
    }
}

/// Something waiting to be folded into the next user turn.
#[derive(Clone, Debug)]
pub enum PendingEntry {
    Comment(String),
    Result(OperationResult),
}

impl PendingEntry {
    pub fn is_comment(&self) -> bool { matches!(self, Self::Comment(_)) }
}

impl Serialize for PendingEntry {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Comment(c) => {
                let mut m = s.serialize_map(Some(1))?;
                m.serialize_entry("comment", c)?;
                m.end()
            }
            Self::Result(r) => r.serialize(s),
        }
    }
}

#[derive(Clone, Debug, Serialize, Default)]
pub struct UserPayload {
    pub responses: Vec<PendingEntry>,
}

#[derive(Clone, Debug, Serialize)]
pub struct AssistantResponse {
    pub comment: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tasks: Option<TaskList>,
    pub operations: Vec<Arc<OperationRequest>>,
}

#[derive(Clone, Debug)]
pub enum TurnPayload {
    System(String),
    User(UserPayload),
    Assistant(AssistantResponse),
}

impl TurnPayload {
    pub fn role(&self) -> Role {
        match self { Self::System(_) => Role::System, Self::User(_) => Role::User, Self::Assistant(_) => Role::Assistant }
    }

    fn render(&self) -> String {
        let json = match self {
            Self::System(text) => return text.clone(),
            Self::User(p) => serde_json::to_string(p),
            Self::Assistant(p) => serde_json::to_string(p),
        };
        json.unwrap_or_default()
    }
}

/// A turn with its serialized form and token cost fixed at creation.
#[derive(Clone, Debug)]
pub struct ConversationTurn {
    pub role: Role,
    pub payload: TurnPayload,
    pub content: String,
    pub tokens: usize,
}

impl ConversationTurn {
    pub fn new(payload: TurnPayload, encoding: &dyn TokenEncoding) -> Self {
        let content = payload.render();
        let tokens = encoding.count(&content);
        Self { role: payload.role(), payload, content, tokens }
    }

    pub fn wire(&self) -> WireMessage {
        WireMessage { role: self.role, content: self.content.clone() }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct WireMessage {
    pub role: Role,
    pub content: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{req, WordEncoding};
    use serde_json::json;

    #[test]
    fn user_payload_keeps_arrival_order() {
        let r = OperationResult::for_request(&req("read", &[])).accepted(true);
        let p = UserPayload { responses: vec![PendingEntry::Comment("hi".into()), PendingEntry::Result(r)] };
        let v = serde_json::to_value(&p).unwrap();
        assert_eq!(v["responses"][0], json!({"comment": "hi"}));
        assert_eq!(v["responses"][1]["title"], "read");
    }

    #[test]
    fn system_turn_is_raw_text() {
        let t = ConversationTurn::new(TurnPayload::System("be careful".into()), &WordEncoding);
        assert_eq!(t.content, "be careful");
        assert_eq!(t.tokens, 2);
        assert_eq!(t.role, Role::System);
    }
}
