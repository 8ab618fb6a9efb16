/// Shoutrelay - bridge between an IRC channel and a web shoutbox
///
/// Shouts are polled from the shoutbox and posted to the channel with flood
/// control; channel messages are delivered to the shoutbox in order, retrying
/// each one until the endpoint accepts it.

pub mod config;
pub mod error;
pub mod irc;
pub mod message;
pub mod queue;
pub mod relay;
pub mod shout;

pub use config::Config;
pub use error::{RelayError, Result};
pub use message::{Message, Source};
pub use relay::Relay;
