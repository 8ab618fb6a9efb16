/// HTTP client for the shoutbox endpoint
use crate::config::ShoutConfig;
use crate::error::{RelayError, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::fmt;
use tracing::{debug, instrument};

const FIELD_COMMAND: &str = "command";
const FIELD_LAST: &str = "last";
const FIELD_KEY: &str = "key";
const FIELD_NICK: &str = "nick";
const FIELD_MSG: &str = "msg";

/// Prefix of shout element ids, also used for the poll cursor
pub const SHOUT_ID_PREFIX: &str = "shoutid-";

/// Delivery operation on the shout endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostCommand {
    /// Message written on IRC
    IrcPost,
    /// Message relayed into IRC by the bridge bot
    DiscordPost,
}

impl PostCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostCommand::IrcPost => "ircpost",
            PostCommand::DiscordPost => "discordpost",
        }
    }
}

impl fmt::Display for PostCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operations the relay needs from the shoutbox
#[async_trait]
pub trait ShoutApi: Send + Sync {
    /// Fetch the HTML fragment of shouts newer than `last_id`
    async fn poll(&self, last_id: u64) -> Result<String>;

    /// Post one message; only an HTTP 200 counts as delivered
    async fn post(&self, command: PostCommand, key: &str, nick: &str, msg: &str) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct PollResponse {
    #[serde(default)]
    msgs: Option<String>,
}

/// `ShoutApi` over HTTP form posts
pub struct HttpShoutClient {
    http: reqwest::Client,
    url: String,
}

impl HttpShoutClient {
    pub fn new(config: &ShoutConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .user_agent(concat!("shoutrelay/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            url: config.url.clone(),
        })
    }
}

#[async_trait]
impl ShoutApi for HttpShoutClient {
    #[instrument(skip(self))]
    async fn poll(&self, last_id: u64) -> Result<String> {
        let last = format!("{}{}", SHOUT_ID_PREFIX, last_id);
        let response = self
            .http
            .post(&self.url)
            .form(&[(FIELD_COMMAND, "ajax"), (FIELD_LAST, last.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RelayError::Status {
                code: status.as_u16(),
            });
        }

        let body: PollResponse = response.json().await?;
        let html = body.msgs.unwrap_or_default();
        debug!("Poll returned {} bytes of markup", html.len());
        Ok(html)
    }

    #[instrument(skip(self, command, key, msg), fields(command = %command))]
    async fn post(&self, command: PostCommand, key: &str, nick: &str, msg: &str) -> Result<()> {
        let response = self
            .http
            .post(&self.url)
            .form(&[
                (FIELD_COMMAND, command.as_str()),
                (FIELD_KEY, key),
                (FIELD_NICK, nick),
                (FIELD_MSG, msg),
            ])
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(()),
            status => Err(RelayError::Status {
                code: status.as_u16(),
            }),
        }
    }
}
