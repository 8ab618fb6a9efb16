/// IRC line protocol (RFC 1459 / IRCv3 message tags)
use crate::error::{RelayError, Result};
use std::fmt;

/// A single protocol line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrcMessage {
    /// Raw IRCv3 tag section, without the leading `@`
    pub tags: Option<String>,
    /// Source of the message, without the leading `:`
    pub prefix: Option<String>,
    pub command: String,
    pub params: Vec<String>,
}

impl IrcMessage {
    /// Build a message with no tags or prefix
    pub fn new(command: &str, params: Vec<String>) -> Self {
        Self {
            tags: None,
            prefix: None,
            command: command.to_string(),
            params,
        }
    }

    pub fn nick(nick: &str) -> Self {
        Self::new("NICK", vec![nick.to_string()])
    }

    pub fn user(user: &str, realname: &str) -> Self {
        Self::new(
            "USER",
            vec![user.to_string(), "0".to_string(), "*".to_string(), realname.to_string()],
        )
    }

    pub fn pass(password: &str) -> Self {
        Self::new("PASS", vec![password.to_string()])
    }

    pub fn join(channel: &str) -> Self {
        Self::new("JOIN", vec![channel.to_string()])
    }

    pub fn privmsg(target: &str, text: &str) -> Self {
        Self::new("PRIVMSG", vec![target.to_string(), text.to_string()])
    }

    pub fn pong(token: &str) -> Self {
        Self::new("PONG", vec![token.to_string()])
    }

    pub fn cap(args: &[&str]) -> Self {
        Self::new("CAP", args.iter().map(|a| a.to_string()).collect())
    }

    pub fn authenticate(payload: &str) -> Self {
        Self::new("AUTHENTICATE", vec![payload.to_string()])
    }

    pub fn quit(reason: &str) -> Self {
        Self::new("QUIT", vec![reason.to_string()])
    }

    /// Parse one line, with or without the trailing CRLF
    pub fn parse(line: &str) -> Result<Self> {
        let mut rest = line.trim_end_matches(['\r', '\n']);

        let tags = if let Some(stripped) = rest.strip_prefix('@') {
            let (tags, tail) = stripped
                .split_once(' ')
                .ok_or_else(|| RelayError::Protocol(format!("Line has only tags: {}", line)))?;
            rest = tail.trim_start_matches(' ');
            Some(tags.to_string())
        } else {
            None
        };

        let prefix = if let Some(stripped) = rest.strip_prefix(':') {
            let (prefix, tail) = stripped
                .split_once(' ')
                .ok_or_else(|| RelayError::Protocol(format!("Line has only a prefix: {}", line)))?;
            rest = tail.trim_start_matches(' ');
            Some(prefix.to_string())
        } else {
            None
        };

        let (command, mut rest) = match rest.split_once(' ') {
            Some((command, tail)) => (command, tail),
            None => (rest, ""),
        };
        if command.is_empty() {
            return Err(RelayError::Protocol(format!("Missing command: {}", line)));
        }

        let mut params = Vec::new();
        loop {
            rest = rest.trim_start_matches(' ');
            if rest.is_empty() {
                break;
            }
            if let Some(trailing) = rest.strip_prefix(':') {
                params.push(trailing.to_string());
                break;
            }
            match rest.split_once(' ') {
                Some((param, tail)) => {
                    params.push(param.to_string());
                    rest = tail;
                }
                None => {
                    params.push(rest.to_string());
                    break;
                }
            }
        }

        Ok(Self {
            tags,
            prefix,
            command: command.to_ascii_uppercase(),
            params,
        })
    }

    /// Serialize to a wire line without the CRLF.
    ///
    /// Line breaks inside parameters are replaced with spaces so a parameter can
    /// never smuggle in a second command.
    pub fn to_line(&self) -> String {
        let mut line = String::new();

        if let Some(tags) = &self.tags {
            line.push('@');
            line.push_str(tags);
            line.push(' ');
        }
        if let Some(prefix) = &self.prefix {
            line.push(':');
            line.push_str(prefix);
            line.push(' ');
        }
        line.push_str(&self.command);

        let last = self.params.len().saturating_sub(1);
        for (idx, param) in self.params.iter().enumerate() {
            let clean = param.replace(['\r', '\n'], " ");
            line.push(' ');
            if idx == last && (clean.is_empty() || clean.contains(' ') || clean.starts_with(':')) {
                line.push(':');
            }
            line.push_str(&clean);
        }

        line
    }

    /// Nickname part of the prefix (`nick!user@host` -> `nick`)
    pub fn prefix_nick(&self) -> Option<&str> {
        self.prefix
            .as_deref()
            .map(|p| p.split(['!', '@']).next().unwrap_or(p))
    }

    pub fn param(&self, idx: usize) -> Option<&str> {
        self.params.get(idx).map(String::as_str)
    }
}

impl fmt::Display for IrcMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_line())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_privmsg() {
        let msg = IrcMessage::parse(":alice!a@host PRIVMSG #lobby :hello there\r\n").unwrap();
        assert_eq!(msg.prefix.as_deref(), Some("alice!a@host"));
        assert_eq!(msg.prefix_nick(), Some("alice"));
        assert_eq!(msg.command, "PRIVMSG");
        assert_eq!(msg.params, vec!["#lobby", "hello there"]);
    }

    #[test]
    fn test_parse_tags_and_numeric() {
        let msg = IrcMessage::parse("@time=2024-01-01T00:00:00Z :irc.example.net 001 relay :Welcome")
            .unwrap();
        assert_eq!(msg.tags.as_deref(), Some("time=2024-01-01T00:00:00Z"));
        assert_eq!(msg.prefix_nick(), Some("irc.example.net"));
        assert_eq!(msg.command, "001");
        assert_eq!(msg.param(1), Some("Welcome"));
    }

    #[test]
    fn test_parse_without_trailing() {
        let msg = IrcMessage::parse("PING irc.example.net").unwrap();
        assert_eq!(msg.prefix, None);
        assert_eq!(msg.params, vec!["irc.example.net"]);

        let msg = IrcMessage::parse("AUTHENTICATE +").unwrap();
        assert_eq!(msg.param(0), Some("+"));
    }

    #[test]
    fn test_parse_rejects_empty() {
        assert!(IrcMessage::parse("").is_err());
        assert!(IrcMessage::parse(":prefix-only").is_err());
    }

    #[test]
    fn test_to_line_trailing_rules() {
        assert_eq!(IrcMessage::join("#lobby").to_line(), "JOIN #lobby");
        assert_eq!(
            IrcMessage::privmsg("#lobby", "<bob> hi all").to_line(),
            "PRIVMSG #lobby :<bob> hi all"
        );
        assert_eq!(
            IrcMessage::user("relay", "Shoutbox relay").to_line(),
            "USER relay 0 * :Shoutbox relay"
        );
    }

    #[test]
    fn test_to_line_strips_line_breaks() {
        let line = IrcMessage::privmsg("#lobby", "one\r\nQUIT :bye").to_line();
        assert!(!line.contains('\r'));
        assert!(!line.contains('\n'));
    }
}
