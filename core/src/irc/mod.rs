/// IRC side of the relay
pub mod client;
pub mod gateway;
pub mod protocol;

pub use client::{IrcClient, IrcEvent, IrcHandle};
pub use gateway::{ChatGateway, SessionState};
pub use protocol::IrcMessage;
