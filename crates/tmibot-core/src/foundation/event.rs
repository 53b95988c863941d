//! Classified inbound events.
//!
//! Every line read from the server becomes exactly one [`Event`]. The event is
//! handed to the dispatcher and dropped once dispatch returns.

use std::collections::BTreeMap;
use std::fmt;

/// Protocol tags parsed from the `@key=value;...` block of a line.
pub type Tags = BTreeMap<String, String>;

/// Kind of an inbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// `PRIVMSG` from a user in a channel.
    ChatMessage,
    /// `USERNOTICE` (subscriptions, gifts, raids).
    UserNotice,
    /// `CLEARCHAT` (timeouts, bans, full clears).
    ClearChat,
    /// Our own `JOIN` echoed back by the server.
    JoinAck,
    /// Our own `PART` echoed back by the server.
    PartAck,
    /// Server `PING`.
    KeepAlive,
    /// The server rejected our credentials.
    LoginError,
    /// Anything else.
    Unrecognized,
}

impl EventKind {
    /// Returns a stable, lowercase name for logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChatMessage => "chat_message",
            Self::UserNotice => "user_notice",
            Self::ClearChat => "clear_chat",
            Self::JoinAck => "join_ack",
            Self::PartAck => "part_ack",
            Self::KeepAlive => "keep_alive",
            Self::LoginError => "login_error",
            Self::Unrecognized => "unrecognized",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One classified inbound protocol occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// What kind of line this was.
    pub kind: EventKind,
    /// Channel name without the leading `#`. Empty when the line has none.
    pub channel: String,
    /// Sending (or, for `CLEARCHAT`, targeted) user, if the line names one.
    pub user: Option<String>,
    /// Free-text payload: the chat text, the notice text, or the ping token.
    pub payload: String,
    /// Tags from the leading `@...` block.
    pub tags: Tags,
}

impl Event {
    /// Creates an event with no user and no tags.
    pub fn new(kind: EventKind, channel: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            kind,
            channel: channel.into(),
            user: None,
            payload: payload.into(),
            tags: Tags::new(),
        }
    }

    /// Sets the user (builder pattern).
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Adds a tag (builder pattern).
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Shorthand for a chat message from `user` in `channel`.
    pub fn chat(channel: impl Into<String>, user: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(EventKind::ChatMessage, channel, text).with_user(user)
    }

    /// Looks up a tag value.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    /// Returns the user name or an empty string.
    pub fn user_or_empty(&self) -> &str {
        self.user.as_deref().unwrap_or("")
    }
}
