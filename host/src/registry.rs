//! Operation registry: one typed handler per [`OperationKind`].

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use bridge_common::{Envelope, Operation, OperationKind, Reply, Request};
use serde_json::Value;
use tracing::{debug, warn};

use crate::assets::AssetCache;
use crate::store::KeyValueStore;
use crate::HostError;

#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, operation: Operation) -> Result<Reply, HostError>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F> Handler for FnHandler<F>
where
    F: Fn(Operation) -> Result<Reply, HostError> + Send + Sync,
{
    async fn handle(&self, operation: Operation) -> Result<Reply, HostError> {
        (self.0)(operation)
    }
}

#[derive(Default)]
pub struct Registry {
    handlers: BTreeMap<OperationKind, Arc<dyn Handler>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every operation the bridge defines, served from `assets` and `store`.
    pub fn standard(assets: Arc<AssetCache>, store: Arc<dyn KeyValueStore>) -> Self {
        let bundles: Arc<dyn Handler> = Arc::new(BundleHandler { assets });
        let storage: Arc<dyn Handler> = Arc::new(StoreHandler { store });

        let mut registry = Registry::new();
        for kind in OperationKind::ALL {
            match kind {
                OperationKind::GetBpmnModdleBundle
                | OperationKind::GetDmnModdleBundle
                | OperationKind::GetBpmnJsDifferBundle => {
                    registry.register(kind, Arc::clone(&bundles));
                }
                OperationKind::GetLocalstorage
                | OperationKind::SetLocalstorage
                | OperationKind::RemoveLocalstorage
                | OperationKind::GetLocalstorageKeys => {
                    registry.register(kind, Arc::clone(&storage));
                }
                OperationKind::Ping => {
                    registry.register_fn(kind, |_| Ok(Reply::Pong));
                }
            }
        }
        registry
    }

    pub fn register(&mut self, kind: OperationKind, handler: Arc<dyn Handler>) -> &mut Self {
        if self.handlers.insert(kind, handler).is_some() {
            debug!(action = kind.as_str(), "handler replaced");
        }
        self
    }

    pub fn register_fn<F>(&mut self, kind: OperationKind, f: F) -> &mut Self
    where
        F: Fn(Operation) -> Result<Reply, HostError> + Send + Sync + 'static,
    {
        self.register(kind, Arc::new(FnHandler(f)))
    }

    /// Operation kinds with no handler.
    pub fn missing(&self) -> Vec<OperationKind> {
        OperationKind::ALL
            .into_iter()
            .filter(|kind| !self.handlers.contains_key(kind))
            .collect()
    }

    /// Decodes and runs one request. Every failure comes back as an error
    /// reply so the requester always hears back.
    pub async fn handle(&self, envelope: &Envelope, message: &Value) -> Reply {
        match self.try_handle(envelope, message).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(
                    request_id = %envelope.request_id,
                    action = %envelope.action,
                    error = %e,
                    "request failed"
                );
                Reply::error(e.to_string())
            }
        }
    }

    async fn try_handle(&self, envelope: &Envelope, message: &Value) -> Result<Reply, HostError> {
        let request = Request::decode(envelope, message)?;
        let kind = request.operation.kind();
        let handler = self
            .handlers
            .get(&kind)
            .ok_or(HostError::NoHandler(kind.as_str()))?;
        handler.handle(request.operation).await
    }
}

struct BundleHandler {
    assets: Arc<AssetCache>,
}

#[async_trait]
impl Handler for BundleHandler {
    async fn handle(&self, operation: Operation) -> Result<Reply, HostError> {
        let bundle = operation
            .kind()
            .bundle()
            .ok_or(HostError::Misrouted(operation.action()))?;
        let text = self.assets.get(bundle).await?;
        Ok(Reply::bundle(bundle, text.to_string()))
    }
}

struct StoreHandler {
    store: Arc<dyn KeyValueStore>,
}

#[async_trait]
impl Handler for StoreHandler {
    async fn handle(&self, operation: Operation) -> Result<Reply, HostError> {
        match operation {
            Operation::GetLocalstorage { key } => Ok(Reply::LocalstorageValue {
                value: key.and_then(|key| self.store.get(&key)),
            }),
            Operation::SetLocalstorage { key, value } => {
                self.store.set(&key, &value)?;
                Ok(Reply::LocalstorageSet { success: true })
            }
            Operation::RemoveLocalstorage { key } => {
                self.store.remove(&key)?;
                Ok(Reply::LocalstorageRemoved { success: true })
            }
            Operation::GetLocalstorageKeys => Ok(Reply::LocalstorageKeys {
                keys: self.store.keys(),
            }),
            other => Err(HostError::Misrouted(other.action())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::tests::CountingProvider;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn standard() -> (Registry, Arc<CountingProvider>) {
        let provider = Arc::new(CountingProvider::new());
        let assets = Arc::new(AssetCache::new(provider.clone()));
        (Registry::standard(assets, Arc::new(MemoryStore::new())), provider)
    }

    async fn call(registry: &Registry, message: Value) -> Reply {
        let envelope = Envelope::peek(&message).unwrap();
        registry.handle(&envelope, &message).await
    }

    #[test]
    fn standard_registry_covers_every_operation() {
        let (registry, _) = standard();
        assert!(registry.missing().is_empty());
        assert_eq!(Registry::new().missing().len(), OperationKind::ALL.len());
    }

    #[tokio::test]
    async fn store_operations() {
        let (registry, _) = standard();

        let reply = call(&registry, json!({"action": "set_localstorage", "request_id": "1", "key": "a", "value": "1"})).await;
        assert_eq!(reply, Reply::LocalstorageSet { success: true });

        let reply = call(&registry, json!({"action": "get_localstorage", "request_id": "2", "key": "a"})).await;
        assert_eq!(reply, Reply::LocalstorageValue { value: Some("1".into()) });

        let reply = call(&registry, json!({"action": "get_localstorage_keys", "request_id": "3"})).await;
        assert_eq!(reply, Reply::LocalstorageKeys { keys: vec!["a".into()] });

        let reply = call(&registry, json!({"action": "remove_localstorage", "request_id": "4", "key": "a"})).await;
        assert_eq!(reply, Reply::LocalstorageRemoved { success: true });

        let reply = call(&registry, json!({"action": "get_localstorage", "request_id": "5", "key": "a"})).await;
        assert_eq!(reply, Reply::LocalstorageValue { value: None });
    }

    #[tokio::test]
    async fn bundles_are_memoized() {
        let (registry, provider) = standard();
        let message = json!({"action": "get_bpmn_moddle_bundle", "request_id": "1"});

        let first = call(&registry, message.clone()).await;
        let second = call(&registry, message).await;

        assert_eq!(first, second);
        assert_eq!(
            first,
            Reply::BpmnModdleBundle { bundle: "self.BpmnModdle = {};".into() }
        );
        assert_eq!(provider.count(), 1);
    }

    #[tokio::test]
    async fn unknown_action_names_it() {
        let (registry, _) = standard();
        let reply = call(&registry, json!({"action": "drop_tables", "request_id": "1"})).await;
        assert_eq!(reply, Reply::error("Unknown action: drop_tables"));
    }

    #[tokio::test]
    async fn unregistered_kind_is_an_error_reply() {
        let registry = Registry::new();
        let reply = call(&registry, json!({"action": "ping", "request_id": "1"})).await;
        assert_eq!(reply, Reply::error("No handler registered for action: ping"));
    }

    #[tokio::test]
    async fn custom_handlers_can_be_registered() {
        let mut registry = Registry::new();
        registry.register_fn(OperationKind::GetLocalstorage, |_| {
            Ok(Reply::LocalstorageValue { value: Some("fixed".into()) })
        });
        let reply = call(&registry, json!({"action": "get_localstorage", "request_id": "1", "key": "x"})).await;
        assert_eq!(reply, Reply::LocalstorageValue { value: Some("fixed".into()) });
    }

    #[tokio::test]
    async fn fetch_failure_becomes_error_reply() {
        let provider = Arc::new(CountingProvider {
            fail: true,
            ..CountingProvider::new()
        });
        let assets = Arc::new(AssetCache::new(provider));
        let registry = Registry::standard(assets, Arc::new(MemoryStore::new()));

        let reply = call(&registry, json!({"action": "get_dmn_moddle_bundle", "request_id": "1"})).await;
        assert_eq!(reply, Reply::error("Bundle dmn-moddle not found"));
    }
}
