/// Gateway between the relay pipeline and the IRC channel
use crate::config::IrcConfig;
use crate::irc::client::{IrcEvent, IrcHandle};
use crate::message::{Message, Source};
use crate::queue::MessageQueue;
use crate::relay::{Inlet, Outlet};
use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

/// Notice text the account service sends after a successful AUTH
const SERVICE_LOGIN_PREFIX: &str = "You are now logged in";

/// Session state as seen by the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Connected,
    Disconnected,
}

/// Flood-control delay, in units, after sending `line`.
///
/// Stays under RFC 1459 penalty accounting: two units per line plus one per
/// 120 characters.
pub fn flood_delay_units(line: &str) -> u32 {
    2 + (line.chars().count() / 120) as u32
}

/// Flood delay as a duration for the given unit
pub fn flood_delay(line: &str, unit: Duration) -> Duration {
    unit * flood_delay_units(line)
}

fn bridge_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^<([^>]+)> (.*)$").expect("bridge pattern is valid"))
}

/// Recover the real author of a line relayed by the bridge bot
pub fn parse_bridged(text: &str) -> Option<(String, String)> {
    let caps = bridge_pattern().captures(text)?;
    let author: String = caps[1].chars().filter(|c| (*c as u32) > 0x1F).collect();
    Some((author, caps[2].to_string()))
}

/// Owns the IRC side of the relay.
///
/// Messages accepted for the channel go through a single-flight drain loop
/// that paces sends for flood control. Channel messages worth relaying are
/// buffered until the pipeline pulls them.
pub struct ChatGateway {
    config: IrcConfig,
    irc: IrcHandle,
    nick: String,
    state: SessionState,
    outbound: MessageQueue,
    inbound: MessageQueue,

    /// Set while the drain loop is active: when the next send is due
    next_send: Option<Instant>,
}

impl ChatGateway {
    pub fn new(config: IrcConfig, irc: IrcHandle) -> Self {
        Self {
            nick: config.nick.clone(),
            config,
            irc,
            state: SessionState::Connecting,
            outbound: MessageQueue::new(),
            inbound: MessageQueue::new(),
            next_send: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Nickname currently in use on the network
    pub fn nick(&self) -> &str {
        &self.nick
    }

    pub fn outbound_len(&self) -> usize {
        self.outbound.len()
    }

    pub fn is_draining(&self) -> bool {
        self.next_send.is_some()
    }

    /// Next message bound for the pipeline, if one is buffered
    pub fn take_inbound(&mut self) -> Option<Message> {
        self.inbound.pop()
    }

    /// Queue a message for the channel. Never blocks or rejects.
    pub fn accept(&mut self, msg: Message) {
        self.outbound.push(msg);
        self.drain();
    }

    /// Start the drain loop unless it cannot or need not run
    fn drain(&mut self) {
        if self.state != SessionState::Connected || self.next_send.is_some() || self.outbound.is_empty() {
            return;
        }
        self.send_next();
    }

    /// One drain iteration: send the head and schedule the next one
    fn send_next(&mut self) {
        let Some(msg) = self.outbound.pop() else {
            self.next_send = None;
            return;
        };

        // No delivery confirmation exists on IRC, so the message is gone either way
        let line = msg.to_channel_line();
        if let Err(e) = self.irc.privmsg(&self.config.relay_channel, &line) {
            error!("(IRC) Failed to send to {}: {}", self.config.relay_channel, e);
        }

        self.next_send = if self.outbound.is_empty() {
            None
        } else {
            Some(Instant::now() + flood_delay(&line, self.config.flood_unit()))
        };
    }

    /// Called when the flood-control delay has elapsed
    pub fn on_flood_timer(&mut self) {
        if self.state != SessionState::Connected {
            self.next_send = None;
            return;
        }
        self.send_next();
    }

    /// Apply one event from the IRC client
    pub fn handle_event(&mut self, event: IrcEvent) {
        match event {
            IrcEvent::Connecting => {
                self.state = SessionState::Connecting;
            }
            IrcEvent::Registered { nick } => {
                info!("(IRC) Connected as {}, authorizing...", nick);
                self.nick = nick;
                self.state = SessionState::Connected;
                self.on_connected();
            }
            IrcEvent::Closed { reason } => {
                self.state = SessionState::Disconnected;
                self.next_send = None;
                info!(
                    "(IRC) Disconnected ({}), {} message(s) held for the channel",
                    reason,
                    self.outbound.len()
                );
            }
            IrcEvent::ReconnectFailed { attempt, error } => {
                self.state = SessionState::Disconnected;
                info!("(IRC) Reconnect failed (attempt {}): {}", attempt, error);
            }
            IrcEvent::NickChanged { old, new } => {
                if old == self.nick {
                    info!("(IRC) Nick changed: {} -> {}", old, new);
                    self.nick = new;
                }
            }
            IrcEvent::Notice { nickname, target, message } => {
                if self.is_service_login(&nickname, &target, &message) {
                    info!("(IRC) Logged in to {}", self.config.service_nick);
                }
            }
            IrcEvent::Privmsg { nickname, target, message } => {
                if let Some(msg) = self.classify(nickname, &target, message) {
                    info!("(IRC) {}", msg);
                    self.inbound.push(msg);
                }
            }
        }
    }

    fn on_connected(&mut self) {
        if self.config.password.is_empty() {
            debug!("(IRC) No password configured, skipping service login");
        } else if let Err(e) = self.irc.raw(&[
            self.config.service_auth_command.as_str(),
            self.config.nick.as_str(),
            self.config.password.as_str(),
        ]) {
            error!("(IRC) Failed to send service login: {}", e);
        }

        if let Err(e) = self.irc.join(&self.config.relay_channel) {
            error!("(IRC) Failed to join {}: {}", self.config.relay_channel, e);
        }

        self.drain();
    }

    fn is_service_login(&self, sender: &str, target: &str, message: &str) -> bool {
        target.eq_ignore_ascii_case(&self.nick)
            && sender.eq_ignore_ascii_case(&self.config.service_nick)
            && message.starts_with(SERVICE_LOGIN_PREFIX)
    }

    /// Turn a channel message into a relay message, or drop it
    pub fn classify(&self, nickname: String, target: &str, message: String) -> Option<Message> {
        if !target.eq_ignore_ascii_case(&self.config.relay_channel) {
            return None;
        }

        let from_bridge = self
            .config
            .bridge_nick
            .as_deref()
            .is_some_and(|bridge| bridge.eq_ignore_ascii_case(&nickname));

        if from_bridge {
            match parse_bridged(&message) {
                Some((author, text)) => Some(Message::new(author, text, Source::BridgedExternal)),
                None => {
                    warn!("(IRC) Error parsing bridged message: {}", message);
                    None
                }
            }
        } else {
            Some(Message::new(nickname, message, Source::NativeChat))
        }
    }

    /// Run the gateway on its own task.
    ///
    /// Returns the inlet for messages bound to the channel and the outlet of
    /// messages read from it. The outlet holds at most `capacity` messages
    /// before the gateway buffers internally.
    pub fn spawn(
        self,
        events: mpsc::UnboundedReceiver<IrcEvent>,
        capacity: usize,
    ) -> (Inlet, Outlet, JoinHandle<()>) {
        let (inlet, outbound_rx) = Inlet::channel();
        let (inbound_tx, outlet) = Outlet::channel(capacity);
        let task = tokio::spawn(self.run(events, outbound_rx, inbound_tx));
        (inlet, outlet, task)
    }

    async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<IrcEvent>,
        mut outbound: mpsc::UnboundedReceiver<Message>,
        inbound: mpsc::Sender<Message>,
    ) {
        let mut accepting = true;

        loop {
            let deadline = self.next_send;

            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => {
                        error!("(IRC) Client event stream ended, gateway stopping");
                        break;
                    }
                },
                msg = outbound.recv(), if accepting => match msg {
                    Some(msg) => self.accept(msg),
                    None => accepting = false,
                },
                permit = inbound.reserve(), if !self.inbound.is_empty() => match permit {
                    Ok(permit) => {
                        if let Some(msg) = self.inbound.pop() {
                            permit.send(msg);
                        }
                    }
                    Err(_) => {
                        warn!("(IRC) Nobody is pulling channel messages anymore");
                        self.inbound.clear();
                    }
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.on_flood_timer();
                }
            }
        }
    }
}
