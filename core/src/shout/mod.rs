/// Shoutbox side of the relay
pub mod client;
pub mod extract;
pub mod sink;
pub mod source;

pub use client::{HttpShoutClient, PostCommand, ShoutApi};
pub use extract::{extract_shouts, RawShout};
pub use sink::MessageSink;
pub use source::MessageSource;
