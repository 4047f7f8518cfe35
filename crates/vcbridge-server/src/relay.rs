//! Relay debounce: bursts of text from one channel become one message in
//! another after a quiet period.

use crate::config::RelayConfig;
use crate::platform::{ChatPlatform, IncomingMessage};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use vcbridge_gate::is_filler;
use vcbridge_types::{ChannelId, IdFilter};
use vcbridge_voice::text::{normalize_whitespace, split_message};

/// Which messages are relayed.
pub struct RelayFilter {
    source: ChannelId,
    target: ChannelId,
    authors: IdFilter,
    ignore_filler: bool,
}

impl RelayFilter {
    pub fn new(source: ChannelId, target: ChannelId, config: &RelayConfig) -> Self {
        Self {
            source,
            target,
            authors: IdFilter::allow_only(config.author_ids.clone()),
            ignore_filler: config.ignore_filler,
        }
    }

    /// The text to relay, or `None` when the message is not relayed.
    pub fn accept(&self, message: &IncomingMessage) -> Option<String> {
        if message.channel_id != self.source {
            return None;
        }
        let text = normalize_whitespace(&message.content);
        if text.is_empty() || self.source == self.target {
            return None;
        }
        if !self.authors.has_allow_list() {
            tracing::error!("relay.author_ids is empty; refusing to relay");
            return None;
        }
        if !self.authors.lists(&message.author_id) {
            return None;
        }
        if self.ignore_filler && is_filler(&text) {
            return None;
        }
        Some(text)
    }
}

/// Handle to the debounce worker. Dropping every handle flushes what is
/// buffered and stops the worker.
#[derive(Clone)]
pub struct RelayDebouncer {
    tx: mpsc::UnboundedSender<String>,
}

impl RelayDebouncer {
    pub fn spawn(
        platform: Arc<dyn ChatPlatform>,
        target: ChannelId,
        config: &RelayConfig,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = Worker {
            platform,
            target,
            debounce: Duration::from_millis(config.debounce_ms),
            ignore_filler: config.ignore_filler,
            max_message_len: config.max_message_len,
        };
        (Self { tx }, tokio::spawn(worker.run(rx)))
    }

    pub fn push(&self, text: String) {
        if self.tx.send(text).is_err() {
            tracing::warn!("relay worker stopped, dropping text");
        }
    }
}

struct Worker {
    platform: Arc<dyn ChatPlatform>,
    target: ChannelId,
    debounce: Duration,
    ignore_filler: bool,
    max_message_len: usize,
}

impl Worker {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<String>) {
        let mut buffer: Vec<String> = Vec::new();
        let mut deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                received = rx.recv() => match received {
                    Some(text) => {
                        buffer.push(text);
                        if self.debounce.is_zero() {
                            self.flush(&mut buffer).await;
                        } else {
                            deadline = Some(Instant::now() + self.debounce);
                        }
                    }
                    None => {
                        self.flush(&mut buffer).await;
                        return;
                    }
                },
                () = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    deadline = None;
                    self.flush(&mut buffer).await;
                }
            }
        }
    }

    async fn flush(&self, buffer: &mut Vec<String>) {
        let payload = buffer.join(" ");
        buffer.clear();
        let payload = payload.trim();
        if payload.is_empty() || (self.ignore_filler && is_filler(payload)) {
            return;
        }
        for part in split_message(payload, self.max_message_len) {
            if let Err(e) = self.platform.send_message(&self.target, &part).await {
                tracing::error!(channel = %self.target, error = %e, "relay failed");
                return;
            }
        }
        tracing::debug!(channel = %self.target, chars = payload.len(), "relayed");
    }
}
