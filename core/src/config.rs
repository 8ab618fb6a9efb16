/// Configuration management
use crate::error::{RelayError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const DEFAULT_IRC_PORT: u16 = 6697;

/// Relay configuration, loaded once at startup
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Chat network side
    pub irc: IrcConfig,

    /// Shoutbox side
    pub shout: ShoutConfig,

    /// Wiring between components
    pub relay: RelayConfig,
}

/// Chat network connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IrcConfig {
    pub server: String,
    pub port: u16,

    /// Wrap the connection in TLS
    pub tls: bool,

    /// Authenticate with SASL PLAIN during capability negotiation
    pub sasl: bool,

    pub nick: String,
    pub password: String,
    pub realname: String,

    /// Channel bridged to the shoutbox
    pub relay_channel: String,

    /// Nickname of a bot that relays a third chat system into the channel
    pub bridge_nick: Option<String>,

    /// Account service that receives the post-registration login
    pub service_nick: String,

    /// Raw command used to log in to the account service
    pub service_auth_command: String,

    pub reconnect_delay_ms: u64,
    pub connect_timeout_ms: u64,

    /// Length of one flood-control unit between channel messages
    pub flood_unit_ms: u64,
}

impl Default for IrcConfig {
    fn default() -> Self {
        Self {
            server: String::new(),
            port: DEFAULT_IRC_PORT,
            tls: true,
            sasl: true,
            nick: String::new(),
            password: String::new(),
            realname: "Shoutbox relay".to_string(),
            relay_channel: String::new(),
            bridge_nick: None,
            service_nick: "Q".to_string(),
            service_auth_command: "AUTH".to_string(),
            reconnect_delay_ms: 5_000,
            connect_timeout_ms: 10_000,
            flood_unit_ms: 1_000,
        }
    }
}

impl IrcConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn flood_unit(&self) -> Duration {
        Duration::from_millis(self.flood_unit_ms)
    }
}

/// Shoutbox endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShoutConfig {
    /// Full URL of the shout endpoint
    pub url: String,

    /// Key sent with `ircpost` deliveries
    pub irc_key: String,

    /// Key sent with `discordpost` deliveries (falls back to `irc_key`)
    pub discord_key: Option<String>,

    pub poll_interval_ms: u64,

    /// Pause between consecutive deliveries
    pub send_delay_ms: u64,

    pub request_timeout_ms: u64,
}

impl Default for ShoutConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            irc_key: String::new(),
            discord_key: None,
            poll_interval_ms: 3_000,
            send_delay_ms: 1_000,
            request_timeout_ms: 15_000,
        }
    }
}

impl ShoutConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn send_delay(&self) -> Duration {
        Duration::from_millis(self.send_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Key for bridged deliveries
    pub fn bridge_key(&self) -> &str {
        self.discord_key.as_deref().unwrap_or(&self.irc_key)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Capacity of each pipe between components
    pub channel_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 16,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            RelayError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&raw)
            .map_err(|e| RelayError::Config(format!("Invalid config {}: {}", path.display(), e)))
    }

    /// Create config from command line arguments
    pub fn from_args(args: &[String]) -> Result<Self> {
        if args.len() < 2 {
            return Err(RelayError::Config(format!(
                "Usage: {} <config.json> [--channel <name>] [--nick <nick>] [--no-tls]",
                args.first().map(String::as_str).unwrap_or("shoutrelay")
            )));
        }

        let mut config = Self::from_file(Path::new(&args[1]))?;

        let mut i = 2;
        while i < args.len() {
            match args[i].as_str() {
                "--channel" => {
                    let channel = args.get(i + 1).ok_or_else(|| {
                        RelayError::Config("--channel requires a channel name".to_string())
                    })?;
                    config.irc.relay_channel = channel.clone();
                    i += 2;
                }
                "--nick" => {
                    let nick = args.get(i + 1).ok_or_else(|| {
                        RelayError::Config("--nick requires a nickname".to_string())
                    })?;
                    config.irc.nick = nick.clone();
                    i += 2;
                }
                "--no-tls" => {
                    config.irc.tls = false;
                    i += 1;
                }
                other => {
                    return Err(RelayError::Config(format!("Unknown argument: {}", other)));
                }
            }
        }

        // Secrets may live outside the config file
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    /// Apply environment overrides through the given lookup
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(password) = lookup("SHOUTRELAY_IRC_PASSWORD") {
            self.irc.password = password;
        }
        if let Some(key) = lookup("SHOUTRELAY_SHOUT_KEY") {
            self.shout.irc_key = key;
        }
    }

    /// Reject configurations the relay cannot run with
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("irc.server", &self.irc.server),
            ("irc.nick", &self.irc.nick),
            ("irc.relay_channel", &self.irc.relay_channel),
            ("shout.url", &self.shout.url),
            ("shout.irc_key", &self.shout.irc_key),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(RelayError::Config(format!("{} must not be empty", name)));
            }
        }

        if self.shout.poll_interval_ms == 0 {
            return Err(RelayError::Config("shout.poll_interval_ms must be positive".to_string()));
        }
        if self.irc.flood_unit_ms == 0 {
            return Err(RelayError::Config("irc.flood_unit_ms must be positive".to_string()));
        }
        if self.relay.channel_capacity == 0 {
            return Err(RelayError::Config("relay.channel_capacity must be positive".to_string()));
        }

        Ok(())
    }
}
