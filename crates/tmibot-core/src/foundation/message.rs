//! Outbound messages and their classification.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Classification tag carried by every chat reply.
///
/// Channels can switch individual kinds off; the sender drops messages whose
/// kind is disabled for their target channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    Functional,
    Command,
    Spam,
    Helpful,
    Special,
    Subscriber,
    Chat,
    Blacklisted,
}

impl MessageKind {
    /// Every kind, in declaration order.
    pub const ALL: [MessageKind; 8] = [
        Self::Functional,
        Self::Command,
        Self::Spam,
        Self::Helpful,
        Self::Special,
        Self::Subscriber,
        Self::Chat,
        Self::Blacklisted,
    ];

    /// Whether channel-wide `on`/`off` toggles affect this kind.
    ///
    /// Functional and chat traffic stay enabled when a channel is switched off.
    pub fn is_toggleable(&self) -> bool {
        !matches!(self, Self::Functional | Self::Chat)
    }

    /// Returns the kind's wire/storage name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Functional => "FUNCTIONAL",
            Self::Command => "COMMAND",
            Self::Spam => "SPAM",
            Self::Helpful => "HELPFUL",
            Self::Special => "SPECIAL",
            Self::Subscriber => "SUBSCRIBER",
            Self::Chat => "CHAT",
            Self::Blacklisted => "BLACKLISTED",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A chat reply addressed to one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Text to send.
    pub content: String,
    /// Classification used for permission gating.
    pub kind: MessageKind,
    /// Target channel without the leading `#`.
    pub channel: String,
}

impl OutboundMessage {
    /// Creates a new outbound message.
    pub fn new(content: impl Into<String>, kind: MessageKind, channel: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            kind,
            channel: channel.into(),
        }
    }
}

/// An item on the outbound queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// A chat reply, subject to the send predicate.
    Chat(OutboundMessage),
    /// A protocol line (`JOIN`, `PART`, `PONG`) without its terminator.
    /// Never gated by the send predicate.
    Raw(String),
}

impl Outbound {
    /// Serializes to the exact bytes written on the wire.
    ///
    /// Always a single protocol line: embedded CR or LF become spaces.
    pub fn to_wire(&self) -> String {
        match self {
            Self::Chat(msg) => format!(
                "PRIVMSG #{} :{}\n",
                single_line(&msg.channel),
                single_line(&msg.content)
            ),
            Self::Raw(line) => format!("{}\r\n", single_line(line)),
        }
    }
}

fn single_line(text: &str) -> std::borrow::Cow<'_, str> {
    if text.contains(['\r', '\n']) {
        text.replace(['\r', '\n'], " ").into()
    } else {
        text.into()
    }
}

impl From<OutboundMessage> for Outbound {
    fn from(msg: OutboundMessage) -> Self {
        Self::Chat(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_wire_format() {
        let out = Outbound::from(OutboundMessage::new("hi there", MessageKind::Chat, "lobby"));
        assert_eq!(out.to_wire(), "PRIVMSG #lobby :hi there\n");
    }

    #[test]
    fn raw_wire_format_appends_crlf() {
        assert_eq!(Outbound::Raw("JOIN #lobby".into()).to_wire(), "JOIN #lobby\r\n");
    }

    #[test]
    fn line_breaks_cannot_start_a_second_command() {
        let out = Outbound::Chat(OutboundMessage::new(
            "hi\r\nPART #lobby",
            MessageKind::Chat,
            "lobby",
        ));
        let wire = out.to_wire();
        assert_eq!(wire, "PRIVMSG #lobby :hi  PART #lobby\n");
        assert_eq!(wire.matches('\n').count(), 1);

        let raw = Outbound::Raw("PONG :x\nJOIN #other".into()).to_wire();
        assert_eq!(raw, "PONG :x JOIN #other\r\n");
    }

    #[test]
    fn functional_and_chat_are_not_toggleable() {
        let fixed: Vec<_> = MessageKind::ALL
            .iter()
            .filter(|k| !k.is_toggleable())
            .collect();
        assert_eq!(fixed, vec![&MessageKind::Functional, &MessageKind::Chat]);
    }

    #[test]
    fn kind_serializes_to_screaming_case() {
        let json = serde_json::to_string(&MessageKind::Subscriber).unwrap();
        assert_eq!(json, "\"SUBSCRIBER\"");
    }
}
