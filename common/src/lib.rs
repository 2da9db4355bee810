use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod config;
pub mod protocol;

pub use config::{BridgeConfig, ConfigError};
pub use protocol::{
    Bundle, DecodeError, Envelope, Operation, OperationKind, Reply, Request, Response,
};

/// Well-known channel shared by every host and worker in one context.
pub const CHANNEL_NAME: &str = "operaton-bridge";

/// Store key under which the cockpit environment is kept.
pub const ENV_KEY: &str = "env";

#[derive(Eq, Hash, PartialEq, Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub String);

impl RequestId {
    /// Random v4 ids keep requesters on a shared channel from colliding.
    pub fn generate() -> Self {
        RequestId(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        RequestId(id.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_distinct() {
        let a = RequestId::generate();
        let b = RequestId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
    }

    #[test]
    fn request_id_serializes_as_plain_string() {
        let id = RequestId::from("abc");
        assert_eq!(serde_json::to_value(&id).unwrap(), serde_json::json!("abc"));
    }
}
