//! Event classifier: turns one text line into one [`Event`].
//!
//! Line shape, after an optional `@tag=value;...` block:
//!
//! ```text
//! [:prefix SPACE] command [SPACE params] [SPACE :trailing]
//! ```
//!
//! Classification never fails; anything that does not match a recognized
//! shape becomes [`EventKind::Unrecognized`] carrying the raw line.

use crate::foundation::{Event, EventKind, Tags};

/// Notice texts the server uses to reject credentials.
const LOGIN_FAILURE_NOTICES: &[&str] = &[
    "Login authentication failed",
    "Improperly formatted auth",
    "Error logging in",
];

/// A line split into its structural parts.
#[derive(Debug, Default, PartialEq, Eq)]
struct RawLine<'a> {
    tags: Tags,
    prefix: Option<&'a str>,
    command: &'a str,
    params: Vec<&'a str>,
}

impl<'a> RawLine<'a> {
    fn parse(line: &'a str) -> Option<Self> {
        let mut rest = line;
        let mut tags = Tags::new();

        if let Some(stripped) = rest.strip_prefix('@') {
            let (block, remainder) = stripped.split_once(' ')?;
            tags = parse_tags(block);
            rest = remainder;
        }

        let mut prefix = None;
        if let Some(stripped) = rest.strip_prefix(':') {
            let (p, remainder) = stripped.split_once(' ')?;
            prefix = Some(p);
            rest = remainder;
        }

        let (command, mut remaining) = match rest.split_once(' ') {
            Some((c, r)) => (c, r),
            None => (rest, ""),
        };
        if command.is_empty() {
            return None;
        }

        let mut params = Vec::new();
        while !remaining.is_empty() {
            if let Some(trailing) = remaining.strip_prefix(':') {
                params.push(trailing);
                break;
            }
            match remaining.split_once(' ') {
                Some((p, r)) => {
                    if !p.is_empty() {
                        params.push(p);
                    }
                    remaining = r;
                }
                None => {
                    params.push(remaining);
                    break;
                }
            }
        }

        Some(Self {
            tags,
            prefix,
            command,
            params,
        })
    }

    /// Nickname portion of a `nick!user@host` prefix.
    fn nick(&self) -> Option<&'a str> {
        let prefix = self.prefix?;
        let nick = prefix.split_once('!').map_or(prefix, |(n, _)| n);
        (!nick.is_empty()).then_some(nick)
    }

    fn channel(&self) -> Option<&'a str> {
        self.param(0).and_then(|p| p.strip_prefix('#'))
    }

    fn param(&self, idx: usize) -> Option<&'a str> {
        self.params.get(idx).copied()
    }
}

/// Parses a tag block (without the leading `@`). A bare key maps to `""`.
fn parse_tags(block: &str) -> Tags {
    block
        .split(';')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (k.to_string(), v.to_string()),
            None => (pair.to_string(), String::new()),
        })
        .collect()
}

/// Classifies inbound lines relative to the bot's own nickname.
#[derive(Debug, Clone)]
pub struct Classifier {
    nickname: String,
}

impl Classifier {
    /// Creates a classifier for the given bot nickname.
    pub fn new(nickname: impl AsRef<str>) -> Self {
        Self {
            nickname: nickname.as_ref().to_lowercase(),
        }
    }

    /// Classifies a single line (without its terminator).
    pub fn classify(&self, line: &str) -> Event {
        let Some(raw) = RawLine::parse(line) else {
            return unrecognized(line);
        };

        match raw.command {
            "PRIVMSG" => match (raw.channel(), raw.nick(), raw.param(1)) {
                (Some(channel), Some(nick), Some(text)) => Event {
                    kind: EventKind::ChatMessage,
                    channel: channel.to_string(),
                    user: Some(nick.to_string()),
                    payload: text.to_string(),
                    tags: raw.tags,
                },
                _ => unrecognized(line),
            },
            "USERNOTICE" => match raw.channel() {
                Some(channel) => {
                    let user = raw.tags.get("login").cloned();
                    Event {
                        kind: EventKind::UserNotice,
                        channel: channel.to_string(),
                        user,
                        payload: raw.param(1).unwrap_or_default().to_string(),
                        tags: raw.tags,
                    }
                }
                None => unrecognized(line),
            },
            "CLEARCHAT" => match raw.channel() {
                Some(channel) => {
                    let target = raw.param(1).filter(|t| !t.is_empty());
                    Event {
                        kind: EventKind::ClearChat,
                        channel: channel.to_string(),
                        user: target.map(str::to_string),
                        payload: target.unwrap_or_default().to_string(),
                        tags: raw.tags,
                    }
                }
                None => unrecognized(line),
            },
            "JOIN" | "PART" => match (raw.channel(), raw.nick()) {
                (Some(channel), Some(nick)) if nick.eq_ignore_ascii_case(&self.nickname) => {
                    let kind = if raw.command == "JOIN" {
                        EventKind::JoinAck
                    } else {
                        EventKind::PartAck
                    };
                    Event {
                        kind,
                        channel: channel.to_string(),
                        user: Some(nick.to_string()),
                        payload: String::new(),
                        tags: raw.tags,
                    }
                }
                _ => unrecognized(line),
            },
            "PING" => Event {
                kind: EventKind::KeepAlive,
                channel: String::new(),
                user: None,
                payload: raw.param(0).unwrap_or_default().to_string(),
                tags: raw.tags,
            },
            "NOTICE" if raw.param(0) == Some("*") && is_login_failure(raw.param(1)) => Event {
                kind: EventKind::LoginError,
                channel: String::new(),
                user: None,
                payload: raw.param(1).unwrap_or_default().to_string(),
                tags: raw.tags,
            },
            _ => unrecognized(line),
        }
    }
}

fn is_login_failure(text: Option<&str>) -> bool {
    text.is_some_and(|t| LOGIN_FAILURE_NOTICES.iter().any(|p| t.starts_with(p)))
}

fn unrecognized(line: &str) -> Event {
    Event::new(EventKind::Unrecognized, "", line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn classifier() -> Classifier {
        Classifier::new("TmiBot")
    }

    #[test]
    fn chat_message_with_tags() {
        let event = classifier().classify(
            "@badges=moderator/1;display-name=Alice;mod=1 :alice!alice@alice.tmi.twitch.tv PRIVMSG #lobby :hello there",
        );
        assert_eq!(event.kind, EventKind::ChatMessage);
        assert_eq!(event.channel, "lobby");
        assert_eq!(event.user.as_deref(), Some("alice"));
        assert_eq!(event.payload, "hello there");
        assert_eq!(event.tag("display-name"), Some("Alice"));
        assert_eq!(event.tag("mod"), Some("1"));
        assert_eq!(event.tag("color"), None);
    }

    #[test]
    fn chat_message_without_tags() {
        let event = classifier().classify(":bob!bob@bob.tmi.twitch.tv PRIVMSG #lobby :!ping");
        assert_eq!(event.kind, EventKind::ChatMessage);
        assert_eq!(event.payload, "!ping");
        assert!(event.tags.is_empty());
    }

    #[test]
    fn resub_notice_keeps_months_tag() {
        let event = classifier().classify(
            "@badge-info=;login=carol;msg-id=resub;msg-param-cumulative-months=6;msg-param-sub-plan=1000 :tmi.twitch.tv USERNOTICE #lobby :six months!",
        );
        assert_eq!(event.kind, EventKind::UserNotice);
        assert_eq!(event.channel, "lobby");
        assert_eq!(event.user.as_deref(), Some("carol"));
        assert_eq!(event.payload, "six months!");
        assert_eq!(event.tag("msg-param-cumulative-months"), Some("6"));
        assert_eq!(event.tag("msg-id"), Some("resub"));
        assert_eq!(event.tag("badge-info"), Some(""));
    }

    #[test]
    fn usernotice_without_text() {
        let event = classifier()
            .classify("@login=dave;msg-id=sub :tmi.twitch.tv USERNOTICE #lobby");
        assert_eq!(event.kind, EventKind::UserNotice);
        assert_eq!(event.payload, "");
    }

    #[test]
    fn clearchat_targets_user() {
        let event = classifier()
            .classify("@ban-duration=600 :tmi.twitch.tv CLEARCHAT #lobby :spammer");
        assert_eq!(event.kind, EventKind::ClearChat);
        assert_eq!(event.user.as_deref(), Some("spammer"));
        assert_eq!(event.tag("ban-duration"), Some("600"));
    }

    #[test]
    fn clearchat_whole_channel() {
        let event = classifier().classify(":tmi.twitch.tv CLEARCHAT #lobby");
        assert_eq!(event.kind, EventKind::ClearChat);
        assert_eq!(event.user, None);
    }

    #[test]
    fn own_join_and_part_are_acks() {
        let c = classifier();
        let join = c.classify(":tmibot!tmibot@tmibot.tmi.twitch.tv JOIN #lobby");
        assert_eq!(join.kind, EventKind::JoinAck);
        assert_eq!(join.channel, "lobby");

        let part = c.classify(":tmibot!tmibot@tmibot.tmi.twitch.tv PART #lobby");
        assert_eq!(part.kind, EventKind::PartAck);
    }

    #[test]
    fn other_users_join_is_unrecognized() {
        let event = classifier().classify(":eve!eve@eve.tmi.twitch.tv JOIN #lobby");
        assert_eq!(event.kind, EventKind::Unrecognized);
    }

    #[test]
    fn ping_carries_token() {
        let event = classifier().classify("PING :tmi.twitch.tv");
        assert_eq!(event.kind, EventKind::KeepAlive);
        assert_eq!(event.payload, "tmi.twitch.tv");
    }

    #[test]
    fn login_failure_is_distinct() {
        let c = classifier();
        let event = c.classify(":tmi.twitch.tv NOTICE * :Login authentication failed");
        assert_eq!(event.kind, EventKind::LoginError);

        let event = c.classify(":tmi.twitch.tv NOTICE * :Error logging in");
        assert_eq!(event.kind, EventKind::LoginError);

        let other = c.classify("@msg-id=slow_on :tmi.twitch.tv NOTICE #lobby :This room is now in slow mode.");
        assert_eq!(other.kind, EventKind::Unrecognized);
    }

    #[test]
    fn garbage_is_unrecognized() {
        let c = classifier();
        for line in ["", "@", "@tags-without-rest", ":prefixonly", ":tmi.twitch.tv 001 tmibot :Welcome"] {
            let event = c.classify(line);
            assert_eq!(event.kind, EventKind::Unrecognized, "line: {line:?}");
            assert_eq!(event.payload, line);
        }
    }
}
