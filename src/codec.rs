//! The Line Codec (spec §6, external collaborator): framing of CR LF
//! terminated IRC lines and parsing/serializing of
//! `[:prefix] COMMAND params... [:trailing]`.

use std::fmt;

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Maximum size of a single on-the-wire line, CR LF included. Consulted by
/// the dispatcher when truncating PRIVMSG text (spec §4.5).
pub const MAX_LINE_LEN: usize = 512;

/// A parsed (or about-to-be-serialized) IRC protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    pub prefix: Option<String>,
    pub command: String,
    pub params: Vec<String>,
    pub trailing: Option<String>,
}

impl Message {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            prefix: None,
            command: command.into(),
            params: Vec::new(),
            trailing: None,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn param(mut self, value: impl Into<String>) -> Self {
        self.params.push(value.into());
        self
    }

    pub fn trailing(mut self, value: impl Into<String>) -> Self {
        self.trailing = Some(value.into());
        self
    }

    /// All parameters, including the trailing one if present, in order.
    /// Most dispatcher handlers only care about "the parameters", not
    /// whether the last one happened to need a leading colon on the wire.
    pub fn all_params(&self) -> Vec<String> {
        let mut params = self.params.clone();
        if let Some(trailing) = &self.trailing {
            params.push(trailing.clone());
        }
        params
    }

    /// Parses a single line (without its trailing CR LF). Returns `None`
    /// for blank lines, which the codec silently skips rather than
    /// treating as a protocol error — plenty of clients send spurious
    /// blank keepalives.
    pub fn parse(line: &str) -> Option<Message> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            return None;
        }

        let mut rest = line;
        let mut prefix = None;
        if let Some(stripped) = rest.strip_prefix(':') {
            let (p, r) = stripped.split_once(' ').unwrap_or((stripped, ""));
            prefix = Some(p.to_string());
            rest = r.trim_start();
        }
        if rest.is_empty() {
            return None;
        }

        let (command, mut remaining) = match rest.split_once(' ') {
            Some((cmd, r)) => (cmd.to_string(), r.trim_start()),
            None => (rest.to_string(), ""),
        };

        let mut params = Vec::new();
        let mut trailing = None;
        while !remaining.is_empty() {
            if let Some(t) = remaining.strip_prefix(':') {
                trailing = Some(t.to_string());
                break;
            }
            match remaining.split_once(' ') {
                Some((p, r)) => {
                    params.push(p.to_string());
                    remaining = r.trim_start();
                }
                None => {
                    params.push(remaining.to_string());
                    remaining = "";
                }
            }
        }

        Some(Message {
            prefix,
            command: command.to_uppercase(),
            params,
            trailing,
        })
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(prefix) = &self.prefix {
            write!(f, ":{} ", prefix)?;
        }
        write!(f, "{}", self.command)?;
        for param in &self.params {
            write!(f, " {}", param)?;
        }
        if let Some(trailing) = &self.trailing {
            write!(f, " :{}", trailing)?;
        }
        Ok(())
    }
}

/// Splits a byte stream into CR LF terminated lines and parses each one.
#[derive(Debug, Clone, Copy, Default)]
pub struct LineCodec;

impl Decoder for LineCodec {
    type Item = Message;
    type Error = std::io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> std::io::Result<Option<Message>> {
        loop {
            let Some(pos) = buf.windows(2).position(|w| w == b"\r\n") else {
                if buf.len() > MAX_LINE_LEN {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        "line too long",
                    ));
                }
                return Ok(None);
            };

            let line = buf.split_to(pos);
            buf.advance(2);
            let line = String::from_utf8_lossy(&line).into_owned();
            // A blank line (or a line that parses to nothing) is already
            // consumed from `buf` at this point, so we must keep looping
            // over what's left rather than return `Ok(None)` — that would
            // tell `FramedRead` to wait for more socket bytes even though a
            // complete next frame may already be sitting in the buffer.
            if let Some(message) = Message::parse(&line) {
                return Ok(Some(message));
            }
        }
    }
}

impl Encoder<Message> for LineCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> std::io::Result<()> {
        use bytes::BufMut;
        let line = item.to_string();
        dst.reserve(line.len() + 2);
        dst.put_slice(line.as_bytes());
        dst.put_slice(b"\r\n");
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_simple_command() {
        let m = Message::parse("PING tolsun.oulu.fi").unwrap();
        assert_eq!(m.command, "PING");
        assert_eq!(m.params, vec!["tolsun.oulu.fi".to_string()]);
        assert_eq!(m.trailing, None);
    }

    #[test]
    fn parse_with_prefix_and_trailing() {
        let m = Message::parse(":alice!~alice@host PRIVMSG #lobby :hi there").unwrap();
        assert_eq!(m.prefix.as_deref(), Some("alice!~alice@host"));
        assert_eq!(m.command, "PRIVMSG");
        assert_eq!(m.params, vec!["#lobby".to_string()]);
        assert_eq!(m.trailing.as_deref(), Some("hi there"));
    }

    #[test]
    fn parse_user_command() {
        let m = Message::parse("USER guest 0 * :Meow Tompski").unwrap();
        assert_eq!(m.command, "USER");
        assert_eq!(
            m.params,
            vec!["guest".to_string(), "0".to_string(), "*".to_string()]
        );
        assert_eq!(m.trailing.as_deref(), Some("Meow Tompski"));
    }

    #[test]
    fn parse_blank_line_is_none() {
        assert_eq!(Message::parse(""), None);
        assert_eq!(Message::parse("   "), None);
    }

    #[test]
    fn display_roundtrips() {
        let m = Message::new("PRIVMSG")
            .with_prefix("alice!~alice@host")
            .param("#lobby")
            .trailing("hi there");
        assert_eq!(m.to_string(), ":alice!~alice@host PRIVMSG #lobby :hi there");
    }

    #[test]
    fn decoder_finds_crlf_frame() {
        let mut codec = LineCodec;
        let mut buf = BytesMut::from(&b"NICK alice\r\nUSER"[..]);
        let m = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(m.command, "NICK");
        assert_eq!(buf, &b"USER"[..]);
    }

    #[test]
    fn decoder_waits_for_more_data() {
        let mut codec = LineCodec;
        let mut buf = BytesMut::from(&b"NICK alice"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }
}
