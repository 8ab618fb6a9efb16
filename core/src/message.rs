/// Messages passed between the relay components
use std::fmt;

/// Where a relayed message was authored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// Written directly on one of the two bridged surfaces
    NativeChat,
    /// Relayed into the channel by the external bridge bot
    BridgedExternal,
}

/// A single chat line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub nickname: String,
    pub message: String,
    pub source: Source,
}

impl Message {
    pub fn new(nickname: impl Into<String>, message: impl Into<String>, source: Source) -> Self {
        Self {
            nickname: nickname.into(),
            message: message.into(),
            source,
        }
    }

    /// Shorthand for a message authored on a native surface
    pub fn native(nickname: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(nickname, message, Source::NativeChat)
    }

    /// Render as a channel line: `<nickname> message`
    pub fn to_channel_line(&self) -> String {
        format!("<{}> {}", self.nickname, self.message)
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::NativeChat => write!(f, "native"),
            Source::BridgedExternal => write!(f, "bridged"),
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.source, self.nickname, self.message)
    }
}
