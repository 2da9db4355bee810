use std::sync::Arc;

use bridge_bus::{ChannelConsumer, ChannelProducer, Hub};
use bridge_common::{Envelope, Reply, Response};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace};

use crate::registry::Registry;

/// Answers bridge requests on a channel. Owns its registry, and through it
/// the asset cache; both are dropped when the responder detaches.
pub struct Responder {
    registry: Arc<Registry>,
}

impl Responder {
    pub fn new(registry: Registry) -> Self {
        Responder {
            registry: Arc::new(registry),
        }
    }

    /// Opens `channel` on `hub` and starts answering in the background.
    pub fn attach(self, hub: &Hub, channel: &str) -> ResponderHandle {
        let (producer, consumer) = hub.open(channel);
        info!(channel, "responder attached");
        ResponderHandle {
            task: tokio::spawn(self.run(producer, consumer)),
        }
    }

    pub async fn run(self, producer: ChannelProducer, mut consumer: ChannelConsumer) {
        loop {
            match consumer.consume_one().await {
                Ok(message) => self.dispatch(message, &producer),
                Err(e) => {
                    error!("responder stopped: {e}");
                    return;
                }
            }
        }
    }

    fn dispatch(&self, message: Arc<Value>, producer: &ChannelProducer) {
        let envelope = match Envelope::peek(&message) {
            Some(envelope) => envelope,
            None => {
                trace!("ignoring message without envelope");
                return;
            }
        };
        if envelope.is_reply() {
            trace!(request_id = %envelope.request_id, "ignoring response");
            return;
        }
        debug!(request_id = %envelope.request_id, action = %envelope.action, "request received");

        let registry = Arc::clone(&self.registry);
        let producer = producer.clone();
        tokio::spawn(async move {
            let action = envelope.action.clone();
            let handled = {
                let envelope = envelope.clone();
                tokio::spawn(async move { registry.handle(&envelope, &message).await }).await
            };
            // A panicking handler still owes the requester an answer.
            let reply = handled
                .unwrap_or_else(|e| Reply::error(format!("Handler for {action} failed: {e}")));
            debug!(request_id = %envelope.request_id, reply = reply.action(), "responding");
            producer.produce(
                Response {
                    request_id: envelope.request_id,
                    reply,
                }
                .to_message(),
            );
        });
    }
}

pub struct ResponderHandle {
    task: JoinHandle<()>,
}

impl ResponderHandle {
    /// Stops answering. Requests already being handled are abandoned.
    pub fn detach(self) {}
}

impl Drop for ResponderHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
