//! Wire schema for the bridge channel.
//!
//! Every message is a flat JSON object carrying at least `action` and
//! `request_id`. Requests and responses are told apart by their `action`:
//! request actions are the [`OperationKind`] names, response actions are the
//! [`Reply`] variant names.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::RequestId;

/// Named UMD bundles the host can hand to workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bundle {
    BpmnModdle,
    DmnModdle,
    BpmnJsDiffer,
}

impl Bundle {
    pub const ALL: [Bundle; 3] = [Bundle::BpmnModdle, Bundle::DmnModdle, Bundle::BpmnJsDiffer];

    pub fn name(self) -> &'static str {
        match self {
            Bundle::BpmnModdle => "bpmn-moddle",
            Bundle::DmnModdle => "dmn-moddle",
            Bundle::BpmnJsDiffer => "bpmn-js-differ",
        }
    }

    /// File the static site publishes the bundle under.
    pub fn file_name(self) -> &'static str {
        match self {
            Bundle::BpmnModdle => "bpmn-moddle.umd.js",
            Bundle::DmnModdle => "dmn-moddle.umd.js",
            Bundle::BpmnJsDiffer => "bpmn-js-differ.umd.js",
        }
    }

    /// Global the bundle defines once evaluated.
    pub fn global(self) -> &'static str {
        match self {
            Bundle::BpmnModdle => "BpmnModdle",
            Bundle::DmnModdle => "DmnModdle",
            Bundle::BpmnJsDiffer => "bpmnDiff",
        }
    }

    pub fn operation(self) -> Operation {
        match self {
            Bundle::BpmnModdle => Operation::GetBpmnModdleBundle,
            Bundle::DmnModdle => Operation::GetDmnModdleBundle,
            Bundle::BpmnJsDiffer => Operation::GetBpmnJsDifferBundle,
        }
    }

    pub fn from_name(name: &str) -> Option<Bundle> {
        Bundle::ALL.into_iter().find(|b| b.name() == name)
    }
}

/// A typed request body, tagged on the wire by `action`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Operation {
    GetBpmnModdleBundle,
    GetDmnModdleBundle,
    GetBpmnJsDifferBundle,
    GetLocalstorage {
        #[serde(default, deserialize_with = "lenient_key")]
        key: Option<String>,
    },
    SetLocalstorage {
        key: String,
        value: String,
    },
    RemoveLocalstorage {
        key: String,
    },
    GetLocalstorageKeys,
    Ping,
}

// A missing or non-string key reads as absent instead of failing the request.
fn lenient_key<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(key) => Some(key),
        _ => None,
    })
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::GetBpmnModdleBundle => OperationKind::GetBpmnModdleBundle,
            Operation::GetDmnModdleBundle => OperationKind::GetDmnModdleBundle,
            Operation::GetBpmnJsDifferBundle => OperationKind::GetBpmnJsDifferBundle,
            Operation::GetLocalstorage { .. } => OperationKind::GetLocalstorage,
            Operation::SetLocalstorage { .. } => OperationKind::SetLocalstorage,
            Operation::RemoveLocalstorage { .. } => OperationKind::RemoveLocalstorage,
            Operation::GetLocalstorageKeys => OperationKind::GetLocalstorageKeys,
            Operation::Ping => OperationKind::Ping,
        }
    }

    pub fn action(&self) -> &'static str {
        self.kind().as_str()
    }
}

/// Fieldless mirror of [`Operation`], used as the handler registry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OperationKind {
    GetBpmnModdleBundle,
    GetDmnModdleBundle,
    GetBpmnJsDifferBundle,
    GetLocalstorage,
    SetLocalstorage,
    RemoveLocalstorage,
    GetLocalstorageKeys,
    Ping,
}

impl OperationKind {
    pub const ALL: [OperationKind; 8] = [
        OperationKind::GetBpmnModdleBundle,
        OperationKind::GetDmnModdleBundle,
        OperationKind::GetBpmnJsDifferBundle,
        OperationKind::GetLocalstorage,
        OperationKind::SetLocalstorage,
        OperationKind::RemoveLocalstorage,
        OperationKind::GetLocalstorageKeys,
        OperationKind::Ping,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::GetBpmnModdleBundle => "get_bpmn_moddle_bundle",
            OperationKind::GetDmnModdleBundle => "get_dmn_moddle_bundle",
            OperationKind::GetBpmnJsDifferBundle => "get_bpmn_js_differ_bundle",
            OperationKind::GetLocalstorage => "get_localstorage",
            OperationKind::SetLocalstorage => "set_localstorage",
            OperationKind::RemoveLocalstorage => "remove_localstorage",
            OperationKind::GetLocalstorageKeys => "get_localstorage_keys",
            OperationKind::Ping => "ping",
        }
    }

    pub fn from_action(action: &str) -> Option<OperationKind> {
        OperationKind::ALL.into_iter().find(|k| k.as_str() == action)
    }

    /// The bundle this operation fetches, if it is an asset operation.
    pub fn bundle(self) -> Option<Bundle> {
        match self {
            OperationKind::GetBpmnModdleBundle => Some(Bundle::BpmnModdle),
            OperationKind::GetDmnModdleBundle => Some(Bundle::DmnModdle),
            OperationKind::GetBpmnJsDifferBundle => Some(Bundle::BpmnJsDiffer),
            _ => None,
        }
    }
}

/// A typed response body. `Error` is the generic failure marker shared by
/// every operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Reply {
    BpmnModdleBundle { bundle: String },
    DmnModdleBundle { bundle: String },
    BpmnJsDifferBundle { bundle: String },
    LocalstorageValue { value: Option<String> },
    LocalstorageSet { success: bool },
    LocalstorageRemoved { success: bool },
    LocalstorageKeys { keys: Vec<String> },
    Pong,
    Error { error: String },
}

impl Reply {
    pub const ACTIONS: [&'static str; 9] = [
        "bpmn_moddle_bundle",
        "dmn_moddle_bundle",
        "bpmn_js_differ_bundle",
        "localstorage_value",
        "localstorage_set",
        "localstorage_removed",
        "localstorage_keys",
        "pong",
        "error",
    ];

    pub fn is_reply_action(action: &str) -> bool {
        Reply::ACTIONS.contains(&action)
    }

    pub fn bundle(bundle: Bundle, text: String) -> Reply {
        match bundle {
            Bundle::BpmnModdle => Reply::BpmnModdleBundle { bundle: text },
            Bundle::DmnModdle => Reply::DmnModdleBundle { bundle: text },
            Bundle::BpmnJsDiffer => Reply::BpmnJsDifferBundle { bundle: text },
        }
    }

    pub fn error(message: impl Into<String>) -> Reply {
        Reply::Error {
            error: message.into(),
        }
    }

    /// Bundle text carried by this reply if it answers a fetch of `bundle`.
    pub fn into_bundle_text(self, bundle: Bundle) -> Result<String, Reply> {
        match (bundle, self) {
            (Bundle::BpmnModdle, Reply::BpmnModdleBundle { bundle })
            | (Bundle::DmnModdle, Reply::DmnModdleBundle { bundle })
            | (Bundle::BpmnJsDiffer, Reply::BpmnJsDifferBundle { bundle }) => Ok(bundle),
            (_, other) => Err(other),
        }
    }

    pub fn action(&self) -> &'static str {
        match self {
            Reply::BpmnModdleBundle { .. } => Reply::ACTIONS[0],
            Reply::DmnModdleBundle { .. } => Reply::ACTIONS[1],
            Reply::BpmnJsDifferBundle { .. } => Reply::ACTIONS[2],
            Reply::LocalstorageValue { .. } => Reply::ACTIONS[3],
            Reply::LocalstorageSet { .. } => Reply::ACTIONS[4],
            Reply::LocalstorageRemoved { .. } => Reply::ACTIONS[5],
            Reply::LocalstorageKeys { .. } => Reply::ACTIONS[6],
            Reply::Pong => Reply::ACTIONS[7],
            Reply::Error { .. } => Reply::ACTIONS[8],
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Unknown action: {0}")]
    UnknownAction(String),
    #[error("Invalid {action} message: {source}")]
    Invalid {
        action: String,
        #[source]
        source: serde_json::Error,
    },
}

/// The minimal fields every bridge message carries. Anything without them is
/// foreign traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub action: String,
    pub request_id: RequestId,
}

impl Envelope {
    pub fn peek(message: &Value) -> Option<Envelope> {
        let object = message.as_object()?;
        let action = object.get("action")?.as_str()?;
        let request_id = object.get("request_id")?.as_str()?;
        Some(Envelope {
            action: action.to_owned(),
            request_id: RequestId::from(request_id),
        })
    }

    /// Whether the action names a response kind. Hosts drop such messages
    /// unanswered, so a request sent under a response name (`pong`,
    /// `error`, ...) gets no `Unknown action` error and its caller only
    /// fails on timeout. Answering them would have hosts replying to each
    /// other's responses.
    pub fn is_reply(&self) -> bool {
        Reply::is_reply_action(&self.action)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub request_id: RequestId,
    pub operation: Operation,
}

impl Request {
    pub fn new(operation: Operation) -> Self {
        Request {
            request_id: RequestId::generate(),
            operation,
        }
    }

    /// Decodes a request whose envelope has already been checked.
    pub fn decode(envelope: &Envelope, message: &Value) -> Result<Request, DecodeError> {
        if OperationKind::from_action(&envelope.action).is_none() {
            return Err(DecodeError::UnknownAction(envelope.action.clone()));
        }
        let operation = Operation::deserialize(message).map_err(|source| DecodeError::Invalid {
            action: envelope.action.clone(),
            source,
        })?;
        Ok(Request {
            request_id: envelope.request_id.clone(),
            operation,
        })
    }

    pub fn to_message(&self) -> Value {
        flatten(&self.request_id, &self.operation)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub request_id: RequestId,
    pub reply: Reply,
}

impl Response {
    pub fn decode(envelope: &Envelope, message: &Value) -> Result<Response, DecodeError> {
        if !envelope.is_reply() {
            return Err(DecodeError::UnknownAction(envelope.action.clone()));
        }
        let reply = Reply::deserialize(message).map_err(|source| DecodeError::Invalid {
            action: envelope.action.clone(),
            source,
        })?;
        Ok(Response {
            request_id: envelope.request_id.clone(),
            reply,
        })
    }

    pub fn to_message(&self) -> Value {
        flatten(&self.request_id, &self.reply)
    }
}

fn flatten<T: Serialize>(request_id: &RequestId, body: &T) -> Value {
    let mut object = match serde_json::to_value(body) {
        Ok(Value::Object(object)) => object,
        // Internally tagged enums always serialize to objects.
        _ => Map::new(),
    };
    object.insert(
        "request_id".to_owned(),
        Value::String(request_id.0.clone()),
    );
    Value::Object(object)
}
