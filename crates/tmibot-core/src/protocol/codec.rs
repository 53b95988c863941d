//! Line codec: frames the server's byte stream into text lines.
//!
//! Lines end in `\n`; a `\r` right before it is stripped, so both `\r\n` and
//! bare `\n` terminators are accepted. Bytes after the last terminator stay
//! buffered until more data arrives.

use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;
use tracing::debug;

use crate::error::CodecError;

/// Default maximum line length: up to 8191 bytes of tags plus the classic
/// 512 byte message.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 8191 + 512;

/// A tokio decoder yielding one `String` per terminated line.
#[derive(Debug, Clone)]
pub struct LineCodec {
    max_length: usize,
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl LineCodec {
    /// Creates a codec with the default line limit.
    pub fn new() -> Self {
        Self {
            max_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }

    /// Creates a codec with a custom line limit.
    pub fn with_max_length(max_length: usize) -> Self {
        Self { max_length }
    }

    /// Returns the line limit.
    pub fn max_length(&self) -> usize {
        self.max_length
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(pos) = src.iter().position(|b| *b == b'\n') else {
            if src.len() > self.max_length {
                return Err(CodecError::LineTooLong {
                    max: self.max_length,
                });
            }
            return Ok(None);
        };

        if pos > self.max_length {
            return Err(CodecError::LineTooLong {
                max: self.max_length,
            });
        }

        let mut line = src.split_to(pos);
        src.advance(1);
        if line.last() == Some(&b'\r') {
            line.truncate(line.len() - 1);
        }

        Ok(Some(String::from_utf8_lossy(&line).into_owned()))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        // An unterminated tail is never delivered.
        if !src.is_empty() {
            debug!(bytes = src.len(), "Discarding unterminated data at end of stream");
            src.clear();
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_crlf_line() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from("PING :tmi.twitch.tv\r\n");
        assert_eq!(
            codec.decode(&mut buf).unwrap().as_deref(),
            Some("PING :tmi.twitch.tv")
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_bare_lf_line() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from("PING :x\n");
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("PING :x"));
    }

    #[test]
    fn decode_partial_then_complete() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from("PRIVMSG #a :he");
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"llo\r\nPING");
        assert_eq!(
            codec.decode(&mut buf).unwrap().as_deref(),
            Some("PRIVMSG #a :hello")
        );
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(&buf[..], b"PING");
    }

    #[test]
    fn decode_two_lines_in_order() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from("one\r\ntwo\n");
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("one"));
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("two"));
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn empty_line_is_delivered() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from("\r\n");
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some(""));
    }

    #[test]
    fn line_too_long() {
        let mut codec = LineCodec::with_max_length(8);
        let mut buf = BytesMut::from("0123456789");
        assert!(matches!(
            codec.decode(&mut buf),
            Err(CodecError::LineTooLong { max: 8 })
        ));
    }

    #[test]
    fn full_tag_block_plus_message_fits() {
        let tags = format!("@{}", "a".repeat(8190));
        let rest = format!(" :u!u@u.tmi.twitch.tv PRIVMSG #a :{}", "x".repeat(450));
        let line = format!("{tags}{rest}");
        assert!(line.len() > 8191 && line.len() <= DEFAULT_MAX_LINE_LENGTH);

        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(format!("{line}\r\n").as_str());
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(line));
    }

    #[test]
    fn unterminated_tail_dropped_at_eof() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from("dangling");
        assert!(codec.decode_eof(&mut buf).unwrap().is_none());
        assert!(buf.is_empty());
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"caf\xff\r\n"[..]);
        assert_eq!(
            codec.decode(&mut buf).unwrap().as_deref(),
            Some("caf\u{fffd}")
        );
    }
}
