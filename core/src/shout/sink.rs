/// Ordered, retry-until-success delivery to the shoutbox
use crate::config::ShoutConfig;
use crate::message::{Message, Source};
use crate::queue::MessageQueue;
use crate::relay::Inlet;
use crate::shout::client::{PostCommand, ShoutApi};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info};

/// Delivers messages to the shoutbox one at a time, in order.
///
/// The head of the queue stays in place until the endpoint confirms it, so a
/// failing message blocks everything behind it and is retried forever.
pub struct MessageSink {
    api: Arc<dyn ShoutApi>,
    irc_key: String,
    bridge_key: String,
    send_delay: Duration,
    queue: MessageQueue,

    /// Set while the delivery loop is active: when the next attempt is due
    next_attempt: Option<Instant>,
}

impl MessageSink {
    pub fn new(api: Arc<dyn ShoutApi>, config: &ShoutConfig) -> Self {
        Self {
            api,
            irc_key: config.irc_key.clone(),
            bridge_key: config.bridge_key().to_string(),
            send_delay: config.send_delay(),
            queue: MessageQueue::new(),
            next_attempt: None,
        }
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn head(&self) -> Option<&Message> {
        self.queue.head()
    }

    pub fn is_delivering(&self) -> bool {
        self.next_attempt.is_some()
    }

    /// Queue a message and make sure the delivery loop is running
    pub fn accept(&mut self, msg: Message) {
        self.queue.push(msg);
        if self.next_attempt.is_none() {
            self.next_attempt = Some(Instant::now());
        }
    }

    fn route(&self, source: Source) -> (PostCommand, &str) {
        match source {
            Source::NativeChat => (PostCommand::IrcPost, &self.irc_key),
            Source::BridgedExternal => (PostCommand::DiscordPost, &self.bridge_key),
        }
    }

    /// Try to deliver the head once; it is removed only on success
    pub async fn deliver_head(&mut self) -> bool {
        let Some(msg) = self.queue.head().cloned() else {
            return false;
        };
        let (command, key) = self.route(msg.source);

        let result = self.api.post(command, key, &msg.nickname, &msg.message).await;
        match result {
            Ok(()) => {
                debug!("(shoutbox) Delivered {} via {}", msg, command);
                self.queue.commit_head();
                true
            }
            Err(e) => {
                error!(
                    "(shoutbox) Delivery failed, {} message(s) waiting: {}",
                    self.queue.len(),
                    e
                );
                false
            }
        }
    }

    /// One loop iteration: attempt the head, then schedule the next attempt
    async fn delivery_step(&mut self) {
        self.deliver_head().await;
        self.next_attempt = if self.queue.is_empty() {
            None
        } else {
            Some(Instant::now() + self.send_delay)
        };
    }

    /// Run the sink on its own task, returning the inlet that feeds it
    pub fn spawn(self) -> (Inlet, JoinHandle<()>) {
        let (inlet, rx) = Inlet::channel();
        let task = tokio::spawn(self.run(rx));
        (inlet, task)
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Message>) {
        let mut accepting = true;

        loop {
            if !accepting && self.queue.is_empty() {
                info!("(shoutbox) Input closed and queue drained, sink stopping");
                break;
            }

            let deadline = self.next_attempt;
            tokio::select! {
                msg = rx.recv(), if accepting => match msg {
                    Some(msg) => self.accept(msg),
                    None => accepting = false,
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.delivery_step().await;
                }
            }
        }
    }
}
