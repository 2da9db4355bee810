//! Correlation of outstanding requests with the responses that answer them.
//!
//! A single actor task owns the pending table. Callers, the channel pump and
//! per-request timers talk to it through [`SyncMessage`]s, so the table is
//! never shared.

use std::collections::HashMap;

use bridge_bus::ChannelProducer;
use bridge_common::{Reply, RequestId};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use crate::RequestError;

pub type ReplyResult = Result<Reply, RequestError>;

#[derive(Debug)]
pub enum SyncMessage {
    Request {
        request_id: RequestId,
        message: Value,
        reply_tx: oneshot::Sender<ReplyResult>,
    },
    Response(RequestId, ReplyResult),
    Timeout(RequestId, String),
}

/// Outstanding request ids and the one-shot handles waiting on them.
#[derive(Debug)]
pub struct PendingTable<T> {
    entries: HashMap<RequestId, oneshot::Sender<T>>,
}

impl<T> Default for PendingTable<T> {
    fn default() -> Self {
        PendingTable {
            entries: HashMap::new(),
        }
    }
}

impl<T> PendingTable<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `request_id`. An id already in flight is refused and the
    /// handle handed back.
    pub fn insert(
        &mut self,
        request_id: RequestId,
        handle: oneshot::Sender<T>,
    ) -> Result<(), oneshot::Sender<T>> {
        if self.entries.contains_key(&request_id) {
            return Err(handle);
        }
        self.entries.insert(request_id, handle);
        Ok(())
    }

    /// Completes and removes the entry. Returns false if `request_id` was
    /// not pending.
    pub fn resolve(&mut self, request_id: &RequestId, value: T) -> bool {
        match self.entries.remove(request_id) {
            Some(handle) => {
                if handle.send(value).is_err() {
                    debug!(%request_id, "caller went away before completion");
                }
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, request_id: &RequestId) -> bool {
        self.entries.contains_key(request_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub async fn run(mut sync_rx: mpsc::Receiver<SyncMessage>, producer: ChannelProducer) {
    let mut pending = PendingTable::<ReplyResult>::new();

    while let Some(msg) = sync_rx.recv().await {
        match msg {
            SyncMessage::Request {
                request_id,
                message,
                reply_tx,
            } => {
                if let Err(reply_tx) = pending.insert(request_id.clone(), reply_tx) {
                    warn!(%request_id, "request id already in flight");
                    let _ = reply_tx.send(Err(RequestError::DuplicateId(request_id)));
                    continue;
                }
                trace!(%request_id, pending = pending.len(), "request posted");
                producer.produce(message);
            }
            SyncMessage::Response(request_id, result) => {
                if !pending.resolve(&request_id, result) {
                    trace!(%request_id, "response for another requester");
                }
            }
            SyncMessage::Timeout(request_id, action) => {
                if pending.resolve(&request_id, Err(RequestError::Timeout(action.clone()))) {
                    warn!(%request_id, %action, "request timed out");
                }
            }
        }
    }
    debug!(abandoned = pending.len(), "correlation loop finished");
}
