/// Wiring between the shoutbox and IRC components
use crate::config::Config;
use crate::error::{RelayError, Result};
use crate::irc::client::IrcClient;
use crate::irc::gateway::ChatGateway;
use crate::message::Message;
use crate::shout::client::{HttpShoutClient, ShoutApi};
use crate::shout::sink::MessageSink;
use crate::shout::source::MessageSource;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle, JoinSet};
use tracing::{error, info, warn};

/// A producer of messages. `pull` suspends until the next one is available;
/// `None` means the producer is gone for good.
#[async_trait]
pub trait Pull: Send {
    async fn pull(&mut self) -> Option<Message>;
}

/// A consumer of messages. `accept` never blocks; an error means the consumer
/// has stopped.
pub trait Accept: Send {
    fn accept(&mut self, msg: Message) -> Result<()>;
}

/// Input side of a component: an unbounded FIFO feeding its task
#[derive(Debug, Clone)]
pub struct Inlet {
    tx: mpsc::UnboundedSender<Message>,
}

impl Inlet {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Accept for Inlet {
    fn accept(&mut self, msg: Message) -> Result<()> {
        self.tx
            .send(msg)
            .map_err(|_| RelayError::ChannelClosed("component input".to_string()))
    }
}

/// Output side of a component. The component only hands over a message once
/// there is room, so a slow reader holds messages back instead of losing them.
#[derive(Debug)]
pub struct Outlet {
    rx: mpsc::Receiver<Message>,
}

impl Outlet {
    pub fn channel(capacity: usize) -> (mpsc::Sender<Message>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self { rx })
    }
}

#[async_trait]
impl Pull for Outlet {
    async fn pull(&mut self) -> Option<Message> {
        self.rx.recv().await
    }
}

#[async_trait]
impl Pull for MessageSource {
    async fn pull(&mut self) -> Option<Message> {
        Some(MessageSource::pull(self).await)
    }
}

/// Move messages from `from` to `to` until either side stops.
///
/// The next message is only pulled after the previous one was accepted.
pub async fn pipe<P, A>(name: &str, mut from: P, mut to: A)
where
    P: Pull,
    A: Accept,
{
    loop {
        let Some(msg) = from.pull().await else {
            warn!("Relay {}: producer finished", name);
            break;
        };
        if let Err(e) = to.accept(msg) {
            error!("Relay {}: {}", name, e);
            break;
        }
    }
}

/// The whole bridge: shoutbox -> IRC and IRC -> shoutbox
pub struct Relay {
    config: Config,
}

impl Relay {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Start every component and run until Ctrl+C or SIGTERM
    pub async fn run(&self) -> Result<()> {
        let tasks = self.start()?;
        let aborts: Vec<AbortHandle> = tasks.iter().map(|(_, task)| task.abort_handle()).collect();

        let mut watched = JoinSet::new();
        for (name, task) in tasks {
            watched.spawn(async move { (name, task.await) });
        }

        let shutdown = wait_for_shutdown();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                finished = watched.join_next() => match finished {
                    Some(Ok((name, Ok(())))) => error!("Component {} stopped unexpectedly", name),
                    Some(Ok((name, Err(e)))) => error!("Component {} crashed: {}", name, e),
                    Some(Err(e)) => error!("Component watcher failed: {}", e),
                    None => {
                        error!("All components stopped");
                        break;
                    }
                },
            }
        }

        info!("Shutting down relay...");
        for abort in aborts {
            abort.abort();
        }
        watched.shutdown().await;
        info!("Relay stopped");

        Ok(())
    }

    /// Build and spawn all components; returns their tasks
    pub fn start(&self) -> Result<Vec<(&'static str, JoinHandle<()>)>> {
        let capacity = self.config.relay.channel_capacity;

        let api: Arc<dyn ShoutApi> = Arc::new(HttpShoutClient::new(&self.config.shout)?);
        let (irc, events, irc_task) = IrcClient::spawn(self.config.irc.clone())?;

        let gateway = ChatGateway::new(self.config.irc.clone(), irc);
        let (to_irc, from_irc, gateway_task) = gateway.spawn(events, capacity);

        let sink = MessageSink::new(api.clone(), &self.config.shout);
        let (to_shout, sink_task) = sink.spawn();

        let mut source = MessageSource::new(api, &self.config.shout);
        let inbound_task = tokio::spawn(async move {
            source.initialize().await;
            pipe("shoutbox -> irc", source, to_irc).await;
        });
        let outbound_task = tokio::spawn(pipe("irc -> shoutbox", from_irc, to_shout));

        info!(
            "Relaying {} <-> {}",
            self.config.irc.relay_channel, self.config.shout.url
        );

        Ok(vec![
            ("irc client", irc_task),
            ("chat gateway", gateway_task),
            ("shout sink", sink_task),
            ("shoutbox -> irc", inbound_task),
            ("irc -> shoutbox", outbound_task),
        ])
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn wait_for_shutdown() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Ctrl+C received"),
            Err(e) => {
                error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
                info!("SIGTERM received");
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
