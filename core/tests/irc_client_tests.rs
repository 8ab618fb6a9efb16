/// IRC client tests against a scripted local server
use base64::Engine;
use shoutrelay_core::config::IrcConfig;
use shoutrelay_core::irc::{IrcClient, IrcEvent};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

const STEP: Duration = Duration::from_secs(5);

fn config(port: u16, sasl: bool) -> IrcConfig {
    IrcConfig {
        server: "127.0.0.1".to_string(),
        port,
        tls: false,
        sasl,
        nick: "relay".to_string(),
        password: "pw".to_string(),
        relay_channel: "#lobby".to_string(),
        reconnect_delay_ms: 50,
        connect_timeout_ms: 2_000,
        ..Default::default()
    }
}

struct FakeServer {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl FakeServer {
    async fn accept(listener: &TcpListener) -> Self {
        let (stream, _) = timeout(STEP, listener.accept()).await.unwrap().unwrap();
        let (reader, writer) = stream.into_split();
        Self {
            lines: BufReader::new(reader).lines(),
            writer,
        }
    }

    async fn expect(&mut self, line: &str) {
        let got = timeout(STEP, self.lines.next_line())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(got, line);
    }

    async fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{}\r\n", line).as_bytes())
            .await
            .unwrap();
    }
}

async fn next_event(events: &mut UnboundedReceiver<IrcEvent>) -> IrcEvent {
    timeout(STEP, events.recv()).await.unwrap().unwrap()
}

#[tokio::test]
async fn test_registration_and_messages() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let (handle, mut events, task) = IrcClient::spawn(config(port, false)).unwrap();
    assert_eq!(next_event(&mut events).await, IrcEvent::Connecting);

    let mut server = FakeServer::accept(&listener).await;
    server.expect("PASS pw").await;
    server.expect("NICK relay").await;
    server.expect("USER relay 0 * :Shoutbox relay").await;

    server.send(":irc.test 001 relay :Welcome").await;
    assert_eq!(
        next_event(&mut events).await,
        IrcEvent::Registered {
            nick: "relay".to_string()
        }
    );

    server.send("PING :token123").await;
    server.expect("PONG token123").await;

    server.send(":alice!a@host PRIVMSG #lobby :hello relay").await;
    assert_eq!(
        next_event(&mut events).await,
        IrcEvent::Privmsg {
            nickname: "alice".to_string(),
            target: "#lobby".to_string(),
            message: "hello relay".to_string(),
        }
    );

    server.send(":Q!service@net NOTICE relay :You are now logged in as relay.").await;
    assert!(matches!(
        next_event(&mut events).await,
        IrcEvent::Notice { nickname, .. } if nickname == "Q"
    ));

    server.send(":relay!r@host NICK relay2").await;
    assert_eq!(
        next_event(&mut events).await,
        IrcEvent::NickChanged {
            old: "relay".to_string(),
            new: "relay2".to_string()
        }
    );

    handle.join("#lobby").unwrap();
    server.expect("JOIN #lobby").await;
    handle.privmsg("#lobby", "<bob> from the shoutbox").unwrap();
    server.expect("PRIVMSG #lobby :<bob> from the shoutbox").await;

    task.abort();
}

#[tokio::test]
async fn test_sasl_plain_negotiation() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let (_handle, mut events, task) = IrcClient::spawn(config(port, true)).unwrap();
    let mut server = FakeServer::accept(&listener).await;

    server.expect("CAP LS 302").await;
    server.expect("NICK relay").await;
    server.expect("USER relay 0 * :Shoutbox relay").await;

    server.send(":irc.test CAP * LS :multi-prefix sasl=PLAIN,EXTERNAL").await;
    server.expect("CAP REQ sasl").await;
    server.send(":irc.test CAP relay ACK :sasl").await;
    server.expect("AUTHENTICATE PLAIN").await;
    server.send("AUTHENTICATE +").await;

    let expected = base64::engine::general_purpose::STANDARD.encode("relay\0relay\0pw");
    server.expect(&format!("AUTHENTICATE {}", expected)).await;
    server.send(":irc.test 903 relay :SASL authentication successful").await;
    server.expect("CAP END").await;
    server.send(":irc.test 001 relay :Welcome").await;

    assert_eq!(next_event(&mut events).await, IrcEvent::Connecting);
    assert!(matches!(
        next_event(&mut events).await,
        IrcEvent::Registered { .. }
    ));

    task.abort();
}

#[tokio::test]
async fn test_nick_collision_retries_with_suffix() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let (_handle, mut events, task) = IrcClient::spawn(config(port, false)).unwrap();
    let mut server = FakeServer::accept(&listener).await;
    server.expect("PASS pw").await;
    server.expect("NICK relay").await;
    server.expect("USER relay 0 * :Shoutbox relay").await;

    server.send(":irc.test 433 * relay :Nickname is already in use").await;
    server.expect("NICK relay_").await;
    server.send(":irc.test 001 relay_ :Welcome").await;

    assert_eq!(next_event(&mut events).await, IrcEvent::Connecting);
    assert_eq!(
        next_event(&mut events).await,
        IrcEvent::Registered {
            nick: "relay_".to_string()
        }
    );

    task.abort();
}

#[tokio::test]
async fn test_reconnects_after_server_drop() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let mut config = config(port, false);
    config.reconnect_delay_ms = 300;
    let (handle, mut events, task) = IrcClient::spawn(config).unwrap();
    assert_eq!(next_event(&mut events).await, IrcEvent::Connecting);

    let mut server = FakeServer::accept(&listener).await;
    server.expect("PASS pw").await;
    server.send(":irc.test 001 relay :Welcome").await;
    assert!(matches!(
        next_event(&mut events).await,
        IrcEvent::Registered { .. }
    ));

    drop(server);
    assert!(matches!(
        next_event(&mut events).await,
        IrcEvent::Closed { .. }
    ));
    // Sent into the dead session; must not reach the next one
    handle.privmsg("#lobby", "stale line").unwrap();
    assert_eq!(next_event(&mut events).await, IrcEvent::Connecting);

    // Second session comes up on its own
    let mut server = FakeServer::accept(&listener).await;
    server.expect("PASS pw").await;
    server.expect("NICK relay").await;
    server.expect("USER relay 0 * :Shoutbox relay").await;
    server.send(":irc.test 001 relay :Welcome back").await;
    assert!(matches!(
        next_event(&mut events).await,
        IrcEvent::Registered { .. }
    ));

    handle.join("#lobby").unwrap();
    server.expect("JOIN #lobby").await;

    task.abort();
}

#[tokio::test]
async fn test_erroneous_nick_ends_session() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let (_handle, mut events, task) = IrcClient::spawn(config(port, false)).unwrap();
    assert_eq!(next_event(&mut events).await, IrcEvent::Connecting);

    let mut server = FakeServer::accept(&listener).await;
    server.expect("PASS pw").await;
    server.expect("NICK relay").await;
    server.expect("USER relay 0 * :Shoutbox relay").await;
    server.send(":irc.test 432 * relay :Erroneous Nickname").await;

    assert!(matches!(
        next_event(&mut events).await,
        IrcEvent::Closed { reason } if reason.contains("rejected")
    ));

    task.abort();
}

#[tokio::test]
async fn test_nick_retries_are_bounded() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let (_handle, mut events, task) = IrcClient::spawn(config(port, false)).unwrap();
    assert_eq!(next_event(&mut events).await, IrcEvent::Connecting);

    let mut server = FakeServer::accept(&listener).await;
    server.expect("PASS pw").await;
    server.expect("NICK relay").await;
    server.expect("USER relay 0 * :Shoutbox relay").await;

    for expected in ["relay_", "relay_2", "relay_3", "relay_4", "relay_5"] {
        server.send(":irc.test 433 * taken :Nickname is already in use").await;
        server.expect(&format!("NICK {}", expected)).await;
    }
    // An oversized alternate may come back as 432; it counts as one more try
    server.send(":irc.test 432 * relay_5 :Erroneous Nickname").await;

    assert!(matches!(
        next_event(&mut events).await,
        IrcEvent::Closed { reason } if reason.contains("No usable nickname")
    ));

    task.abort();
}
