/// IRC connection owner: registration, SASL, keepalive and reconnection
use crate::config::IrcConfig;
use crate::error::{RelayError, Result};
use crate::irc::protocol::IrcMessage;
use base64::{engine::general_purpose, Engine as _};
use rand::Rng;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

/// Silence on the socket before we probe the server with a PING
const IDLE_TIMEOUT: Duration = Duration::from_secs(180);

/// SASL payloads are split into chunks of this many base64 characters
const SASL_CHUNK: usize = 400;

/// Longest nickname we try during registration (QuakeNet's limit)
const MAX_NICK_LEN: usize = 15;

/// Alternate nicknames tried before the session is given up
const MAX_NICK_ATTEMPTS: u32 = 5;

/// Events delivered to the single subscriber of a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IrcEvent {
    /// A connection attempt is starting
    Connecting,
    /// Server accepted our registration
    Registered { nick: String },
    /// The session ended; the client reconnects on its own
    Closed { reason: String },
    /// A connection attempt failed before registration
    ReconnectFailed { attempt: u32, error: String },
    NickChanged { old: String, new: String },
    Privmsg { nickname: String, target: String, message: String },
    Notice { nickname: String, target: String, message: String },
}

/// Sending side of a client. Every send is fire-and-forget.
#[derive(Debug, Clone)]
pub struct IrcHandle {
    commands: mpsc::UnboundedSender<IrcMessage>,
}

impl IrcHandle {
    /// Create a handle not attached to any connection; lines end up on the receiver
    pub fn detached() -> (Self, mpsc::UnboundedReceiver<IrcMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { commands: tx }, rx)
    }

    pub fn send(&self, msg: IrcMessage) -> Result<()> {
        self.commands
            .send(msg)
            .map_err(|e| RelayError::ChannelClosed(format!("IRC client is gone, dropped {}", e.0.command)))
    }

    /// Send an arbitrary command, e.g. `["AUTH", nick, password]`
    pub fn raw(&self, args: &[&str]) -> Result<()> {
        let (command, params) = args
            .split_first()
            .ok_or_else(|| RelayError::Protocol("Empty raw command".to_string()))?;
        self.send(IrcMessage::new(
            command,
            params.iter().map(|p| p.to_string()).collect(),
        ))
    }

    pub fn join(&self, channel: &str) -> Result<()> {
        self.send(IrcMessage::join(channel))
    }

    pub fn privmsg(&self, target: &str, text: &str) -> Result<()> {
        self.send(IrcMessage::privmsg(target, text))
    }
}

trait IrcStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> IrcStream for T {}

/// Owned IRC client, driven by its own task
pub struct IrcClient {
    config: IrcConfig,
    tls: Option<tokio_native_tls::TlsConnector>,
    events: mpsc::UnboundedSender<IrcEvent>,
    commands: mpsc::UnboundedReceiver<IrcMessage>,

    /// Nickname the server currently knows us by
    nick: String,
    registered: bool,
    nick_attempts: u32,
    sasl_requested: bool,
    awaiting_pong: bool,
    shutdown: bool,
}

impl IrcClient {
    /// Start a client task that connects and reconnects forever
    pub fn spawn(
        config: IrcConfig,
    ) -> Result<(IrcHandle, mpsc::UnboundedReceiver<IrcEvent>, JoinHandle<()>)> {
        let tls = if config.tls {
            let connector = tokio_native_tls::native_tls::TlsConnector::new()?;
            Some(tokio_native_tls::TlsConnector::from(connector))
        } else {
            None
        };

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let client = Self {
            nick: config.nick.clone(),
            config,
            tls,
            events: event_tx,
            commands: command_rx,
            registered: false,
            nick_attempts: 0,
            sasl_requested: false,
            awaiting_pong: false,
            shutdown: false,
        };
        let task = tokio::spawn(client.run());

        Ok((IrcHandle { commands: command_tx }, event_rx, task))
    }

    fn emit(&self, event: IrcEvent) {
        if self.events.send(event).is_err() {
            debug!("IRC event dropped, no subscriber");
        }
    }

    async fn run(mut self) {
        let mut attempt = 0u32;

        loop {
            self.emit(IrcEvent::Connecting);
            info!(
                "(IRC) Connecting to {}:{} (tls: {})",
                self.config.server, self.config.port, self.config.tls
            );

            match self.connect().await {
                Ok(stream) => {
                    attempt = 0;
                    let reason = match self.session(stream).await {
                        Ok(()) => "connection closed".to_string(),
                        Err(e) => e.to_string(),
                    };
                    info!("(IRC) Disconnected: {}", reason);
                    self.emit(IrcEvent::Closed { reason });
                }
                Err(e) => {
                    attempt = attempt.saturating_add(1);
                    warn!("(IRC) Reconnect failed (attempt {}): {}", attempt, e);
                    self.emit(IrcEvent::ReconnectFailed {
                        attempt,
                        error: e.to_string(),
                    });
                }
            }

            if self.shutdown || self.events.is_closed() {
                info!("(IRC) Client stopped");
                break;
            }

            sleep(jittered(self.config.reconnect_delay())).await;
        }
    }

    async fn connect(&self) -> Result<Box<dyn IrcStream>> {
        let addr = (self.config.server.as_str(), self.config.port);
        let tcp = timeout(self.config.connect_timeout(), TcpStream::connect(addr))
            .await
            .map_err(|_| RelayError::Timeout(format!("Connecting to {}", self.config.server)))?
            .map_err(|e| RelayError::Connection(format!("{}: {}", self.config.server, e)))?;

        match &self.tls {
            Some(connector) => {
                let stream = timeout(
                    self.config.connect_timeout(),
                    connector.connect(&self.config.server, tcp),
                )
                .await
                .map_err(|_| RelayError::Timeout("TLS handshake".to_string()))??;
                Ok(Box::new(stream))
            }
            None => Ok(Box::new(tcp)),
        }
    }

    /// Run one connected session until the socket closes
    async fn session(&mut self, stream: Box<dyn IrcStream>) -> Result<()> {
        self.registered = false;
        self.nick_attempts = 0;
        self.sasl_requested = false;
        self.awaiting_pong = false;
        self.nick = self.config.nick.clone();

        // Lines queued for the previous session would land before AUTH/JOIN
        let mut stale = 0;
        while self.commands.try_recv().is_ok() {
            stale += 1;
        }
        if stale > 0 {
            debug!("(IRC) Dropped {} command(s) queued for the previous session", stale);
        }

        let (reader, mut writer) = tokio::io::split(stream);
        let mut lines = BufReader::new(reader).lines();

        if self.config.sasl {
            write_message(&mut writer, &IrcMessage::cap(&["LS", "302"])).await?;
        } else if !self.config.password.is_empty() {
            write_message(&mut writer, &IrcMessage::pass(&self.config.password)).await?;
        }
        write_message(&mut writer, &IrcMessage::nick(&self.nick)).await?;
        write_message(
            &mut writer,
            &IrcMessage::user(&self.config.nick, &self.config.realname),
        )
        .await?;

        loop {
            tokio::select! {
                line = timeout(IDLE_TIMEOUT, lines.next_line()) => {
                    match line {
                        Ok(Ok(Some(line))) => {
                            self.awaiting_pong = false;
                            self.handle_line(&line, &mut writer).await?;
                        }
                        Ok(Ok(None)) => return Ok(()),
                        Ok(Err(e)) => return Err(RelayError::Io(e)),
                        Err(_) if self.awaiting_pong => {
                            return Err(RelayError::Timeout("Server stopped responding".to_string()));
                        }
                        Err(_) => {
                            // Idle - probe the server
                            self.awaiting_pong = true;
                            write_message(&mut writer, &IrcMessage::new("PING", vec![self.config.server.clone()])).await?;
                        }
                    }
                }
                command = self.commands.recv(), if self.registered => {
                    match command {
                        Some(msg) => write_message(&mut writer, &msg).await?,
                        None => {
                            self.shutdown = true;
                            write_message(&mut writer, &IrcMessage::quit("Relay shutting down")).await?;
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    async fn handle_line<W>(&mut self, line: &str, writer: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        if line.is_empty() {
            return Ok(());
        }
        debug!("(IRC) << {}", line);

        let msg = match IrcMessage::parse(line) {
            Ok(msg) => msg,
            Err(e) => {
                debug!("(IRC) Ignoring unparsable line: {}", e);
                return Ok(());
            }
        };
        let sender = msg.prefix_nick().unwrap_or_default().to_string();

        match msg.command.as_str() {
            "PING" => {
                let token = msg.param(0).unwrap_or_default();
                write_message(writer, &IrcMessage::pong(token)).await?;
            }
            "CAP" => self.handle_cap(&msg, writer).await?,
            "AUTHENTICATE" if msg.param(0) == Some("+") => {
                let payload = sasl_plain_payload(&self.config.nick, &self.config.password);
                for chunk in sasl_chunks(&payload) {
                    write_message(writer, &IrcMessage::authenticate(&chunk)).await?;
                }
            }
            // RPL_SASLSUCCESS
            "903" => {
                info!("(IRC) SASL authentication succeeded");
                write_message(writer, &IrcMessage::cap(&["END"])).await?;
            }
            // ERR_SASLFAIL, ERR_SASLTOOLONG, ERR_SASLABORTED, ERR_SASLALREADY
            "902" | "904" | "905" | "906" | "907" => {
                warn!("(IRC) SASL authentication failed: {}", line);
                write_message(writer, &IrcMessage::cap(&["END"])).await?;
            }
            // RPL_WELCOME
            "001" => {
                if let Some(nick) = msg.param(0) {
                    self.nick = nick.to_string();
                }
                self.registered = true;
                info!("(IRC) Registered as {}", self.nick);
                self.emit(IrcEvent::Registered {
                    nick: self.nick.clone(),
                });
            }
            // ERR_ERRONEUSNICKNAME, ERR_NICKNAMEINUSE
            "432" | "433" if !self.registered => {
                if msg.command == "432" && self.nick_attempts == 0 {
                    return Err(RelayError::Protocol(format!(
                        "Nickname {} rejected by server",
                        self.nick
                    )));
                }
                self.nick_attempts += 1;
                if self.nick_attempts > MAX_NICK_ATTEMPTS {
                    return Err(RelayError::Protocol(format!(
                        "No usable nickname after {} attempts",
                        MAX_NICK_ATTEMPTS
                    )));
                }
                self.nick = alternate_nick(&self.config.nick, self.nick_attempts);
                warn!("(IRC) Nickname unavailable, trying {}", self.nick);
                write_message(writer, &IrcMessage::nick(&self.nick)).await?;
            }
            "NICK" => {
                let new = msg.param(0).unwrap_or_default().to_string();
                if sender == self.nick {
                    self.nick = new.clone();
                }
                self.emit(IrcEvent::NickChanged { old: sender, new });
            }
            "PRIVMSG" | "NOTICE" => {
                let target = msg.param(0).unwrap_or_default().to_string();
                let message = msg.param(1).unwrap_or_default().to_string();
                let event = if msg.command == "PRIVMSG" {
                    IrcEvent::Privmsg { nickname: sender, target, message }
                } else {
                    IrcEvent::Notice { nickname: sender, target, message }
                };
                self.emit(event);
            }
            "ERROR" => {
                return Err(RelayError::Connection(
                    msg.param(0).unwrap_or("server closed the link").to_string(),
                ));
            }
            _ => {}
        }

        Ok(())
    }

    async fn handle_cap<W>(&mut self, msg: &IrcMessage, writer: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let subcommand = msg.param(1).unwrap_or_default();
        let caps = msg.params.last().map(String::as_str).unwrap_or_default();

        match subcommand {
            "LS" => {
                // `CAP * LS * :...` means more lines follow
                let more = msg.params.len() > 3 && msg.param(2) == Some("*");
                if !self.sasl_requested && caps.split(' ').any(|c| c == "sasl" || c.starts_with("sasl=")) {
                    self.sasl_requested = true;
                    write_message(writer, &IrcMessage::cap(&["REQ", "sasl"])).await?;
                } else if !more && !self.sasl_requested {
                    warn!("(IRC) Server does not offer SASL");
                    write_message(writer, &IrcMessage::cap(&["END"])).await?;
                }
            }
            "ACK" if caps.split(' ').any(|c| c == "sasl") => {
                write_message(writer, &IrcMessage::authenticate("PLAIN")).await?;
            }
            "NAK" => {
                warn!("(IRC) Server refused SASL capability");
                write_message(writer, &IrcMessage::cap(&["END"])).await?;
            }
            _ => {}
        }

        Ok(())
    }
}

async fn write_message<W>(writer: &mut W, msg: &IrcMessage) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = msg.to_line();
    if msg.command == "AUTHENTICATE" || msg.command == "PASS" {
        debug!("(IRC) >> {} <hidden>", msg.command);
    } else {
        debug!("(IRC) >> {}", line);
    }
    line.push_str("\r\n");
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Base64 of `authzid \0 authcid \0 password` for SASL PLAIN
pub fn sasl_plain_payload(nick: &str, password: &str) -> String {
    general_purpose::STANDARD.encode(format!("{}\0{}\0{}", nick, nick, password))
}

/// Split a SASL payload into AUTHENTICATE arguments
fn sasl_chunks(payload: &str) -> Vec<String> {
    let mut chunks: Vec<String> = payload
        .as_bytes()
        .chunks(SASL_CHUNK)
        .map(|c| String::from_utf8_lossy(c).into_owned())
        .collect();
    // An exact multiple of the chunk size is terminated by an empty argument
    if payload.is_empty() || payload.len() % SASL_CHUNK == 0 {
        chunks.push("+".to_string());
    }
    chunks
}

/// Nickname for the given retry: `nick_`, then `nick_2`, `nick_3`, ...,
/// shortened so it never exceeds `MAX_NICK_LEN`
fn alternate_nick(base: &str, attempt: u32) -> String {
    let suffix = if attempt <= 1 {
        "_".to_string()
    } else {
        format!("_{}", attempt)
    };
    let keep = MAX_NICK_LEN.saturating_sub(suffix.len());
    let mut nick: String = base.chars().take(keep).collect();
    nick.push_str(&suffix);
    nick
}

/// Add up to 20% random jitter so many relays do not reconnect in lockstep
fn jittered(delay: Duration) -> Duration {
    let max_jitter = delay.as_millis() as u64 / 5;
    if max_jitter == 0 {
        return delay;
    }
    delay + Duration::from_millis(rand::thread_rng().gen_range(0..=max_jitter))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sasl_plain_payload() {
        let payload = sasl_plain_payload("relay", "pw");
        let decoded = general_purpose::STANDARD.decode(payload).unwrap();
        assert_eq!(decoded, b"relay\0relay\0pw");
    }

    #[test]
    fn test_sasl_chunks() {
        assert_eq!(sasl_chunks("abc"), vec!["abc"]);

        let exact = "a".repeat(SASL_CHUNK);
        let chunks = sasl_chunks(&exact);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1], "+");
    }

    #[test]
    fn test_jitter_bounds() {
        let base = Duration::from_millis(1000);
        for _ in 0..50 {
            let d = jittered(base);
            assert!(d >= base && d <= Duration::from_millis(1200));
        }
    }

    #[test]
    fn test_alternate_nick_bounded() {
        assert_eq!(alternate_nick("relay", 1), "relay_");
        assert_eq!(alternate_nick("relay", 2), "relay_2");
        assert_eq!(alternate_nick("relay", 5), "relay_5");

        let long = "shoutboxrelaybot";
        for attempt in 1..=MAX_NICK_ATTEMPTS {
            assert!(alternate_nick(long, attempt).chars().count() <= MAX_NICK_LEN);
        }
        assert_eq!(alternate_nick(long, 3), "shoutboxrelay_3");
    }

    #[test]
    fn test_raw_command() {
        let (handle, mut rx) = IrcHandle::detached();
        handle.raw(&["AUTH", "relay", "pw"]).unwrap();
        let msg = rx.try_recv().unwrap();
        assert_eq!(msg.to_line(), "AUTH relay pw");
        assert!(handle.raw(&[]).is_err());
    }
}
