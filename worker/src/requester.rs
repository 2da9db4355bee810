use std::time::Duration;

use bridge_bus::{ChannelConsumer, Hub};
use bridge_common::{
    BridgeConfig, Bundle, Envelope, Operation, Reply, Request, RequestId, Response,
};
use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::sync::{self, SyncMessage};
use crate::RequestError;

const SYNC_QUEUE: usize = 64;

/// Worker-side handle on the bridge. Each call is correlated independently,
/// so calls may be issued concurrently from one requester.
pub struct Requester {
    sync_tx: mpsc::Sender<SyncMessage>,
    timeout: Duration,
    tasks: [JoinHandle<()>; 2],
}

impl Requester {
    pub fn attach(hub: &Hub, channel: &str, timeout: Duration) -> Requester {
        let (producer, consumer) = hub.open(channel);
        let (sync_tx, sync_rx) = mpsc::channel::<SyncMessage>(SYNC_QUEUE);

        let actor = tokio::spawn(sync::run(sync_rx, producer));
        let pump = tokio::spawn(pump(consumer, sync_tx.clone()));
        info!(channel, timeout_ms = timeout.as_millis() as u64, "requester attached");

        Requester {
            sync_tx,
            timeout,
            tasks: [actor, pump],
        }
    }

    pub fn from_config(hub: &Hub, config: &BridgeConfig) -> Requester {
        Self::attach(hub, &config.channel, config.request_timeout)
    }

    /// Sends `operation` and waits for its answer. Error replies come back
    /// as [`RequestError::Remote`] with the host's message.
    pub async fn request(&self, operation: Operation) -> Result<Reply, RequestError> {
        let request = Request::new(operation);
        let message = request.to_message();
        self.send(request.request_id, request.operation.action(), message)
            .await
    }

    /// Sends `action` with arbitrary `fields`, for actions this build has no
    /// typed [`Operation`] for.
    pub async fn request_raw(
        &self,
        action: &str,
        mut fields: Map<String, Value>,
    ) -> Result<Reply, RequestError> {
        let request_id = RequestId::generate();
        fields.insert("action".to_owned(), Value::String(action.to_owned()));
        fields.insert(
            "request_id".to_owned(),
            Value::String(request_id.0.clone()),
        );
        self.send(request_id, action, Value::Object(fields)).await
    }

    async fn send(
        &self,
        request_id: RequestId,
        action: &str,
        message: Value,
    ) -> Result<Reply, RequestError> {
        let (reply_tx, reply_rx) = oneshot::channel();

        debug!(%request_id, action, "sending request");
        self.sync_tx
            .send(SyncMessage::Request {
                request_id: request_id.clone(),
                message,
                reply_tx,
            })
            .await
            .map_err(|_| RequestError::Closed)?;

        // Left running if the caller stops waiting, so the entry still
        // leaves the table once the timeout passes.
        let timer_tx = self.sync_tx.clone();
        let timeout = self.timeout;
        let action = action.to_owned();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            // the actor is gone only if the requester was dropped
            let _ = timer_tx.send(SyncMessage::Timeout(request_id, action)).await;
        });

        let reply = reply_rx.await;
        timer.abort();
        match reply {
            Ok(Ok(Reply::Error { error })) => Err(RequestError::Remote(error)),
            Ok(result) => result,
            Err(_) => Err(RequestError::Closed),
        }
    }

    pub async fn bundle(&self, bundle: Bundle) -> Result<String, RequestError> {
        self.request(bundle.operation())
            .await?
            .into_bundle_text(bundle)
            .map_err(|other| RequestError::UnexpectedReply(other.action()))
    }

    pub async fn get_localstorage(&self, key: &str) -> Result<Option<String>, RequestError> {
        let operation = Operation::GetLocalstorage {
            key: Some(key.to_owned()),
        };
        match self.request(operation).await? {
            Reply::LocalstorageValue { value } => Ok(value),
            other => Err(RequestError::UnexpectedReply(other.action())),
        }
    }

    pub async fn set_localstorage(&self, key: &str, value: &str) -> Result<bool, RequestError> {
        let operation = Operation::SetLocalstorage {
            key: key.to_owned(),
            value: value.to_owned(),
        };
        match self.request(operation).await? {
            Reply::LocalstorageSet { success } => Ok(success),
            other => Err(RequestError::UnexpectedReply(other.action())),
        }
    }

    pub async fn remove_localstorage(&self, key: &str) -> Result<bool, RequestError> {
        let operation = Operation::RemoveLocalstorage {
            key: key.to_owned(),
        };
        match self.request(operation).await? {
            Reply::LocalstorageRemoved { success } => Ok(success),
            other => Err(RequestError::UnexpectedReply(other.action())),
        }
    }

    pub async fn get_localstorage_keys(&self) -> Result<Vec<String>, RequestError> {
        match self.request(Operation::GetLocalstorageKeys).await? {
            Reply::LocalstorageKeys { keys } => Ok(keys),
            other => Err(RequestError::UnexpectedReply(other.action())),
        }
    }

    pub async fn ping(&self) -> Result<(), RequestError> {
        match self.request(Operation::Ping).await? {
            Reply::Pong => Ok(()),
            other => Err(RequestError::UnexpectedReply(other.action())),
        }
    }
}

impl Drop for Requester {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Forwards responses from the channel to the correlation actor.
async fn pump(mut consumer: ChannelConsumer, sync_tx: mpsc::Sender<SyncMessage>) {
    loop {
        let message = match consumer.consume_one().await {
            Ok(message) => message,
            Err(e) => {
                error!("requester stopped listening: {e}");
                return;
            }
        };
        let envelope = match Envelope::peek(&message) {
            Some(envelope) if envelope.is_reply() => envelope,
            _ => continue,
        };
        let result = match Response::decode(&envelope, &message) {
            Ok(response) => Ok(response.reply),
            Err(e) => {
                warn!(request_id = %envelope.request_id, "malformed response: {e}");
                Err(RequestError::Malformed(e.to_string()))
            }
        };
        if sync_tx
            .send(SyncMessage::Response(envelope.request_id, result))
            .await
            .is_err()
        {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_common::RequestId;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tokio::time::timeout;

    /// Reads the next request a requester posted.
    async fn next_request(consumer: &mut ChannelConsumer) -> Arc<Value> {
        timeout(Duration::from_secs(1), consumer.consume_one())
            .await
            .expect("request in time")
            .unwrap()
    }

    fn request_id(message: &Value) -> RequestId {
        RequestId::from(message["request_id"].as_str().unwrap())
    }

    #[tokio::test]
    async fn no_responder_times_out() {
        let hub = Hub::new(16);
        let requester = Requester::attach(&hub, "c", Duration::from_millis(50));

        let err = requester.ping().await.unwrap_err();
        assert!(matches!(err, RequestError::Timeout(ref action) if action == "ping"));
        assert_eq!(err.to_string(), "Timeout waiting for response to ping");
    }

    /// Issues two reads and answers them in the given order, each with a
    /// value derived from its own key.
    async fn two_reads_answered(reverse: bool) {
        let hub = Hub::new(16);
        let requester = Requester::attach(&hub, "c", Duration::from_secs(5));
        let (host_tx, mut host_rx) = hub.open("c");

        let calls = async {
            tokio::join!(
                requester.get_localstorage("a"),
                requester.get_localstorage("b")
            )
        };
        let host = async {
            let mut requests = vec![
                next_request(&mut host_rx).await,
                next_request(&mut host_rx).await,
            ];
            if reverse {
                requests.reverse();
            }
            for message in requests {
                let response = Response {
                    request_id: request_id(&message),
                    reply: Reply::LocalstorageValue {
                        value: message["key"].as_str().map(|k| format!("value-of-{k}")),
                    },
                };
                host_tx.produce(response.to_message());
            }
        };

        let ((a, b), ()) = tokio::join!(calls, host);
        assert_eq!(a.unwrap().as_deref(), Some("value-of-a"));
        assert_eq!(b.unwrap().as_deref(), Some("value-of-b"));
    }

    #[tokio::test]
    async fn responses_resolve_in_order() {
        two_reads_answered(false).await;
    }

    #[tokio::test]
    async fn responses_resolve_out_of_order() {
        two_reads_answered(true).await;
    }

    #[tokio::test]
    async fn error_reply_carries_message_verbatim() {
        let hub = Hub::new(16);
        let requester = Requester::attach(&hub, "c", Duration::from_secs(5));
        let (host_tx, mut host_rx) = hub.open("c");

        let host = async {
            let message = next_request(&mut host_rx).await;
            assert_eq!(message["action"], json!("get_dmn_moddle_bundle"));
            host_tx.produce(json!({
                "action": "error",
                "request_id": message["request_id"],
                "error": "Failed to fetch dmn-moddle bundle: HTTP 500",
            }));
        };

        let (result, ()) = tokio::join!(requester.bundle(Bundle::DmnModdle), host);
        match result.unwrap_err() {
            RequestError::Remote(message) => {
                assert_eq!(message, "Failed to fetch dmn-moddle bundle: HTTP 500")
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn wrong_reply_kind_is_rejected() {
        let hub = Hub::new(16);
        let requester = Requester::attach(&hub, "c", Duration::from_secs(5));
        let (host_tx, mut host_rx) = hub.open("c");

        let host = async {
            let message = next_request(&mut host_rx).await;
            host_tx.produce(json!({"action": "pong", "request_id": message["request_id"]}));
        };

        let (result, ()) = tokio::join!(requester.get_localstorage_keys(), host);
        assert!(matches!(result, Err(RequestError::UnexpectedReply("pong"))));
    }

    #[tokio::test]
    async fn malformed_reply_fails_the_call() {
        let hub = Hub::new(16);
        let requester = Requester::attach(&hub, "c", Duration::from_secs(5));
        let (host_tx, mut host_rx) = hub.open("c");

        let host = async {
            let message = next_request(&mut host_rx).await;
            host_tx.produce(json!({
                "action": "localstorage_keys",
                "request_id": message["request_id"],
                "keys": "not-a-list",
            }));
        };

        let (result, ()) = tokio::join!(requester.get_localstorage_keys(), host);
        assert!(matches!(result, Err(RequestError::Malformed(_))));
    }

    #[tokio::test]
    async fn foreign_responses_are_ignored() {
        let hub = Hub::new(16);
        let requester = Requester::attach(&hub, "c", Duration::from_secs(5));
        let (host_tx, mut host_rx) = hub.open("c");

        let host = async {
            let message = next_request(&mut host_rx).await;
            host_tx.produce(json!({"action": "pong", "request_id": "someone-else"}));
            host_tx.produce(json!({"note": "unrelated"}));
            host_tx.produce(json!({"action": "pong", "request_id": message["request_id"]}));
        };

        let (result, ()) = tokio::join!(requester.ping(), host);
        result.unwrap();
    }

    #[tokio::test]
    async fn answered_calls_leave_no_timers_behind() {
        let hub = Hub::new(16);
        let requester = Requester::attach(&hub, "c", Duration::from_secs(30));
        let (host_tx, mut host_rx) = hub.open("c");
        let metrics = tokio::runtime::Handle::current().metrics();
        let before = metrics.num_alive_tasks();

        let calls = async {
            for _ in 0..50 {
                requester.ping().await.unwrap();
            }
        };
        let host = async {
            for _ in 0..50 {
                let message = next_request(&mut host_rx).await;
                host_tx.produce(json!({"action": "pong", "request_id": message["request_id"]}));
            }
        };
        tokio::join!(calls, host);

        // aborted timers are reaped once the runtime polls them
        timeout(Duration::from_secs(1), async {
            while metrics.num_alive_tasks() > before {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("timer tasks still alive after their calls resolved");
    }
}
