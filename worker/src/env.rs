//! Cockpit environment as seen from a worker.

use std::collections::BTreeMap;

use bridge_common::ENV_KEY;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::info;

use crate::{RequestError, Requester};

pub const ENGINE_API: &str = "OPERATON_ENGINE_API";
pub const CSRF_TOKEN: &str = "OPERATON_CSRF_TOKEN";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    vars: BTreeMap<String, String>,
}

impl Environment {
    /// Parses the JSON object stored under `env`. Non-string values keep
    /// their JSON text.
    pub fn parse(text: &str) -> Result<Environment, RequestError> {
        let object: serde_json::Map<String, Value> =
            serde_json::from_str(text).map_err(RequestError::InvalidEnv)?;
        let vars = object
            .into_iter()
            .map(|(key, value)| {
                let value = match value {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                (key, value)
            })
            .collect();
        Ok(Environment { vars })
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    /// Engine REST base URL without a trailing slash.
    pub fn engine_api(&self) -> Option<&str> {
        self.get(ENGINE_API).map(|url| url.trim_end_matches('/'))
    }

    pub fn csrf_token(&self) -> &str {
        self.get(CSRF_TOKEN).unwrap_or("")
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

/// Loads the environment through the bridge once; later calls reuse it.
/// A failed load is retried on the next call.
#[derive(Default)]
pub struct EnvLoader {
    env: OnceCell<Environment>,
}

impl EnvLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn load(&self, requester: &Requester) -> Result<&Environment, RequestError> {
        self.env
            .get_or_try_init(|| async {
                let text = requester
                    .get_localstorage(ENV_KEY)
                    .await?
                    .ok_or(RequestError::MissingEnv)?;
                let env = Environment::parse(&text)?;
                info!(variables = env.len(), "environment loaded");
                Ok(env)
            })
            .await
    }

    pub fn get(&self) -> Option<&Environment> {
        self.env.get()
    }
}
