//! Host side of the bridge: answers worker requests with resources only the
//! main context can reach.

pub mod assets;
pub mod cockpit;
pub mod registry;
pub mod responder;
pub mod store;

use bridge_common::DecodeError;

pub use assets::{AssetCache, AssetError, AssetProvider, HttpAssetProvider};
pub use cockpit::capture_cockpit_env;
pub use registry::{Handler, Registry};
pub use responder::{Responder, ResponderHandle};
pub use store::{FileStore, KeyValueStore, MemoryStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Asset(#[from] AssetError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("No handler registered for action: {0}")]
    NoHandler(&'static str),
    #[error("Handler received {0} request it does not serve")]
    Misrouted(&'static str),
}
