//! Transcript entries.

use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::events::{Interrupt, PortfolioResult};

/// Opaque, unique message identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Uuid);

impl MessageId {
    /// Generates a fresh identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for MessageId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Who authored a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The person at the keyboard.
    User,
    /// The server.
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// The kind of a message, without its payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageKind {
    /// Plain text.
    Text,
    /// A pending request for structured input.
    InterruptRequest,
    /// A portfolio recommendation card.
    PortfolioResult,
}

/// A message's payload, tagged by kind.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "content", rename_all = "kebab-case")]
pub enum MessageContent {
    /// Plain text.
    Text(String),
    /// A pending request for structured input.
    InterruptRequest(Interrupt),
    /// A portfolio recommendation card.
    PortfolioResult(PortfolioResult),
}

/// One entry of the transcript.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier.
    pub id: MessageId,
    /// Author.
    pub role: Role,
    /// Payload.
    #[serde(flatten)]
    pub content: MessageContent,
    /// Creation time.
    #[serde(with = "crate::utils::time")]
    pub created_at: OffsetDateTime,
}

impl Message {
    fn new(role: Role, content: MessageContent) -> Self {
        Self {
            id: MessageId::generate(),
            role,
            content,
            created_at: crate::utils::time::now(),
        }
    }

    /// A text message authored by the user.
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, MessageContent::Text(text.into()))
    }

    /// A text message authored by the server.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, MessageContent::Text(text.into()))
    }

    /// An interrupt request from the server.
    pub fn interrupt(interrupt: Interrupt) -> Self {
        Self::new(Role::Assistant, MessageContent::InterruptRequest(interrupt))
    }

    /// A portfolio result from the server.
    pub fn portfolio(result: PortfolioResult) -> Self {
        Self::new(Role::Assistant, MessageContent::PortfolioResult(result))
    }

    /// The message's kind.
    pub fn kind(&self) -> MessageKind {
        match self.content {
            MessageContent::Text(_) => MessageKind::Text,
            MessageContent::InterruptRequest(_) => MessageKind::InterruptRequest,
            MessageContent::PortfolioResult(_) => MessageKind::PortfolioResult,
        }
    }

    /// The text of a text message.
    pub fn text(&self) -> Option<&str> {
        match &self.content {
            MessageContent::Text(text) => Some(text),
            _ => None,
        }
    }

    /// The interrupt carried by an interrupt request.
    pub fn as_interrupt(&self) -> Option<&Interrupt> {
        match &self.content {
            MessageContent::InterruptRequest(interrupt) => Some(interrupt),
            _ => None,
        }
    }

    /// Wall-clock label for display.
    pub fn clock_label(&self) -> String {
        crate::utils::time::clock_label(&self.created_at)
    }

    pub(crate) fn push_text(&mut self, delta: &str) {
        if let MessageContent::Text(text) = &mut self.content {
            text.push_str(delta);
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn ids_are_unique() {
        assert_ne!(Message::user("a").id, Message::user("a").id);
    }

    #[test]
    fn kinds() {
        assert_eq!(Message::assistant("hi").kind(), MessageKind::Text);
        assert_eq!(
            Message::interrupt(Interrupt::default()).kind(),
            MessageKind::InterruptRequest
        );
    }

    #[test]
    fn push_text_only_touches_text() {
        let mut message = Message::assistant("He");
        message.push_text("llo");
        assert_eq!(message.text(), Some("Hello"));

        let mut interrupt = Message::interrupt(Interrupt::default());
        interrupt.push_text("ignored");
        assert_eq!(interrupt.as_interrupt(), Some(&Interrupt::default()));
    }

    #[test]
    fn serializes_kind_and_content() {
        let message = Message::user("hello");
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["role"], json!("user"));
        assert_eq!(value["kind"], json!("text"));
        assert_eq!(value["content"], json!("hello"));
        let back: Message = serde_json::from_value(value).unwrap();
        assert_eq!(back.id, message.id);
        assert_eq!(back.text(), Some("hello"));
    }

    #[test]
    fn message_id_parses() {
        let id = MessageId::generate();
        let parsed: MessageId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }
}
