//! In-process named broadcast channels.
//!
//! Behaves like the browser `BroadcastChannel`: every channel object opened
//! under a name sees what the others post, never its own messages. Delivery
//! is best effort. A consumer that falls more than `capacity` messages
//! behind loses the oldest ones.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("channel {0} closed")]
    Closed(String),
}

#[derive(Debug, Clone)]
struct Posted {
    origin: u64,
    message: Arc<Value>,
}

struct HubInner {
    capacity: usize,
    next_origin: AtomicU64,
    channels: Mutex<HashMap<String, broadcast::Sender<Posted>>>,
}

/// Registry of named channels. Cloning shares the registry.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

impl Hub {
    pub fn new(capacity: usize) -> Hub {
        Hub {
            inner: Arc::new(HubInner {
                capacity: capacity.max(1),
                next_origin: AtomicU64::new(0),
                channels: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Opens a new channel object on `name`, split into its sending and
    /// receiving halves.
    pub fn open(&self, name: &str) -> (ChannelProducer, ChannelConsumer) {
        let sender = {
            let mut channels = match self.inner.channels.lock() {
                Ok(channels) => channels,
                Err(poisoned) => poisoned.into_inner(),
            };
            channels
                .entry(name.to_owned())
                .or_insert_with(|| broadcast::channel(self.inner.capacity).0)
                .clone()
        };
        let origin = self.inner.next_origin.fetch_add(1, Ordering::Relaxed);
        let name: Arc<str> = Arc::from(name);
        debug!(channel = %name, origin, "channel opened");

        let consumer = ChannelConsumer {
            name: Arc::clone(&name),
            origin,
            receiver: sender.subscribe(),
        };
        let producer = ChannelProducer {
            name,
            origin,
            sender,
        };
        (producer, consumer)
    }
}

#[derive(Clone)]
pub struct ChannelProducer {
    name: Arc<str>,
    origin: u64,
    sender: broadcast::Sender<Posted>,
}

impl ChannelProducer {
    /// Fire and forget. A post with nobody listening is dropped.
    pub fn produce(&self, message: Value) {
        let posted = Posted {
            origin: self.origin,
            message: Arc::new(message),
        };
        match self.sender.send(posted) {
            Ok(receivers) => trace!(channel = %self.name, receivers, "message posted"),
            Err(_) => debug!(channel = %self.name, "message posted with no listeners"),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

pub struct ChannelConsumer {
    name: Arc<str>,
    origin: u64,
    receiver: broadcast::Receiver<Posted>,
}

impl ChannelConsumer {
    /// Waits for the next message posted by another channel object. The
    /// message is shared with every other consumer on the channel.
    pub async fn consume_one(&mut self) -> Result<Arc<Value>, ChannelError> {
        loop {
            match self.receiver.recv().await {
                Ok(posted) if posted.origin == self.origin => continue,
                Ok(posted) => return Ok(posted.message),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(channel = %self.name, skipped, "consumer lagged, messages dropped");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(ChannelError::Closed(self.name.to_string()))
                }
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}
