//! Environment handed over by the embedding cockpit window.
//!
//! The cockpit posts `{ engineApi: "/engine-rest", csrfToken: "..." }` style
//! records to the notebook's main context. They are stored under the `env`
//! key where workers pick them up through the bridge.

use bridge_common::ENV_KEY;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::store::{KeyValueStore, StoreError};

/// Maps cockpit keys to `OPERATON_*` variables. Only the first `Api` and
/// `Token` in a key gain an underscore. API paths are made absolute against
/// `origin`.
pub fn cockpit_env(origin: &str, data: &Map<String, Value>) -> Map<String, Value> {
    data.iter()
        .map(|(key, value)| {
            let name = format!(
                "OPERATON_{}",
                key.replacen("Api", "_API", 1)
                    .replacen("Token", "_TOKEN", 1)
                    .to_uppercase()
            );
            let value = if key.ends_with("Api") {
                let path = match value {
                    Value::String(path) => path.clone(),
                    other => other.to_string(),
                };
                Value::String(format!("{origin}{path}"))
            } else {
                value.clone()
            };
            (name, value)
        })
        .collect()
}

/// Stores the cockpit environment if the message came from our own origin.
/// Returns whether anything was stored.
pub fn capture_cockpit_env(
    location: &str,
    origin: &str,
    data: &Value,
    store: &dyn KeyValueStore,
) -> Result<bool, StoreError> {
    if !location.starts_with(origin) {
        debug!(origin, "ignoring cockpit message from foreign origin");
        return Ok(false);
    }
    let data = match data.as_object() {
        Some(data) => data,
        None => return Ok(false),
    };
    let env = cockpit_env(origin, data);
    store.set(ENV_KEY, &Value::Object(env).to_string())?;
    info!(variables = data.len(), "cockpit environment captured");
    Ok(true)
}
