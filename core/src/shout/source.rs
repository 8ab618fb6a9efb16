/// Shoutbox poller producing new shouts as a pull-based stream
use crate::config::ShoutConfig;
use crate::message::Message;
use crate::queue::MessageQueue;
use crate::shout::client::ShoutApi;
use crate::shout::extract::{extract_shouts, is_annotation, parse_shout_id, RawShout};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Polls the shoutbox and hands out shouts oldest first, each exactly once.
///
/// Taking `&mut self` everywhere means a poll can never overlap another one.
pub struct MessageSource {
    api: Arc<dyn ShoutApi>,
    poll_interval: Duration,

    /// Highest shout id seen so far
    cursor: u64,
    buffer: MessageQueue,
    initialized: bool,
}

impl MessageSource {
    pub fn new(api: Arc<dyn ShoutApi>, config: &ShoutConfig) -> Self {
        Self {
            api,
            poll_interval: config.poll_interval(),
            cursor: 0,
            buffer: MessageQueue::new(),
            initialized: false,
        }
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Skip past the existing history so only new shouts are relayed.
    ///
    /// Retries until a poll succeeds; a failed first poll would otherwise
    /// leave the cursor at zero and replay the whole history.
    pub async fn initialize(&mut self) {
        if self.initialized {
            return;
        }
        self.poll(true).await;
        self.initialized = true;
        info!("(shoutbox) Starting after shout {}", self.cursor);
    }

    /// Next shout, polling until one shows up
    pub async fn pull(&mut self) -> Message {
        self.initialize().await;

        loop {
            if let Some(msg) = self.buffer.pop() {
                return msg;
            }
            self.poll(false).await;
        }
    }

    /// Poll until at least one new shout is buffered.
    ///
    /// With `discard` set, polls until one request succeeds and its shouts
    /// only move the cursor.
    pub async fn poll(&mut self, discard: bool) {
        loop {
            match self.poll_once(discard).await {
                Some(_) if discard => return,
                Some(found) if found > 0 => return,
                _ => sleep(self.poll_interval).await,
            }
        }
    }

    /// One request; returns how many shouts were buffered, or `None` when
    /// the request or its markup failed
    async fn poll_once(&mut self, discard: bool) -> Option<usize> {
        let html = match self.api.poll(self.cursor).await {
            Ok(html) => html,
            Err(e) => {
                warn!("(shoutbox) Poll error: {}", e);
                return None;
            }
        };

        let shouts = match extract_shouts(&html) {
            Ok(shouts) => shouts,
            Err(e) => {
                warn!("(shoutbox) Could not read poll response: {}", e);
                return None;
            }
        };

        let fresh = self.ingest(shouts);
        if discard {
            debug!("(shoutbox) Skipped {} historical shout(s)", fresh.len());
            return Some(0);
        }

        let count = fresh.len();
        for msg in fresh {
            info!("(shoutbox) {}: {}", msg.nickname, msg.message);
            self.buffer.push(msg);
        }
        Some(count)
    }

    /// Advance the cursor over one poll's `shouts` and keep the ones worth
    /// relaying, in arrival order.
    ///
    /// Everything above the cursor held before the poll is new, whatever
    /// order the batch comes in.
    pub fn ingest(&mut self, shouts: Vec<RawShout>) -> Vec<Message> {
        let floor = self.cursor;
        let mut seen = HashSet::new();
        let mut fresh = Vec::new();

        for shout in shouts {
            let Some(id) = parse_shout_id(&shout.id) else {
                error!("(shoutbox) Erroneous shout id: {:?}", shout.id);
                continue;
            };
            if id <= floor || !seen.insert(id) {
                debug!("(shoutbox) Already relayed shout {}", id);
                continue;
            }
            self.cursor = self.cursor.max(id);

            if is_annotation(&shout.nickname) {
                debug!("(shoutbox) Skipping annotation from {}", shout.nickname);
                continue;
            }
            fresh.push(Message::native(shout.nickname, shout.message));
        }

        fresh
    }
}
