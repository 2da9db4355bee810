//! Worker side of the bridge: main-context resources as async calls.

pub mod bundles;
pub mod env;
pub mod requester;
pub mod sync;

use bridge_common::RequestId;

pub use bundles::{BundleLoader, LoadedBundle};
pub use env::{EnvLoader, Environment};
pub use requester::Requester;
pub use sync::PendingTable;

#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    /// The host answered with an error; the message is passed through as is.
    #[error("{0}")]
    Remote(String),
    #[error("Timeout waiting for response to {0}")]
    Timeout(String),
    #[error("bridge requester is closed")]
    Closed,
    #[error("unexpected {0} response")]
    UnexpectedReply(&'static str),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("request id {0} is already in flight")]
    DuplicateId(RequestId),
    #[error("Failed to get {0} bundle from host")]
    EmptyBundle(&'static str),
    #[error("No 'env' key found in storage")]
    MissingEnv,
    #[error("invalid env JSON: {0}")]
    InvalidEnv(#[source] serde_json::Error),
}
