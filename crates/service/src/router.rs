//! Request Router: turns a `{action, collection, data?, id?}` body into a
//! Collection Store call.

use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::collection::{CollectionStore, Item};
use crate::errors::ServiceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Read,
    Write,
    Delete,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Read => "read",
            Action::Write => "write",
            Action::Delete => "delete",
        }
    }
}

impl FromStr for Action {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(Action::Read),
            "write" => Ok(Action::Write),
            "delete" => Ok(Action::Delete),
            other => Err(ServiceError::UnsupportedAction(other.to_string())),
        }
    }
}

/// Inbound request body. `action` stays a string so an unknown value is
/// reported as an unsupported action rather than a parse failure.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseRequest {
    pub action: String,
    pub collection: String,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub id: Option<String>,
}

impl DatabaseRequest {
    pub fn from_slice(body: &[u8]) -> Result<Self, ServiceError> {
        serde_json::from_slice(body).map_err(|e| ServiceError::validation(format!("invalid request body: {e}")))
    }

    pub fn into_command(self) -> Result<Command, ServiceError> {
        let id = self.id.filter(|id| !id.is_empty());
        match self.action.parse::<Action>()? {
            Action::Read => Ok(Command::Read { collection: self.collection }),
            Action::Write => {
                let data = match self.data {
                    Some(Value::Object(map)) => map,
                    Some(_) => return Err(ServiceError::validation("`data` must be a JSON object")),
                    None => return Err(ServiceError::validation("`data` is required for write")),
                };
                Ok(Command::Write { collection: self.collection, data, id })
            }
            Action::Delete => {
                let id = id.ok_or_else(|| ServiceError::validation("`id` is required for delete"))?;
                Ok(Command::Delete { collection: self.collection, id })
            }
        }
    }
}

/// A validated request, ready for dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Read { collection: String },
    Write { collection: String, data: Map<String, Value>, id: Option<String> },
    Delete { collection: String, id: String },
}

/// Failure body: `{error, code, data: []}`.
#[derive(Debug, Serialize)]
pub struct ErrorPayload {
    pub error: String,
    pub code: &'static str,
    pub data: Vec<Item>,
}

impl From<&ServiceError> for ErrorPayload {
    fn from(e: &ServiceError) -> Self {
        Self { error: e.to_string(), code: e.kind(), data: Vec::new() }
    }
}

#[derive(Clone)]
pub struct RequestRouter {
    store: Arc<CollectionStore>,
}

impl RequestRouter {
    pub fn new(store: Arc<CollectionStore>) -> Self {
        Self { store }
    }

    /// Validate and run a request; the result is the full collection.
    pub async fn dispatch(&self, request: DatabaseRequest) -> Result<Vec<Item>, ServiceError> {
        let command = request.into_command()?;
        self.execute(command).await
    }

    pub async fn execute(&self, command: Command) -> Result<Vec<Item>, ServiceError> {
        debug!(?command, "dispatching");
        match command {
            Command::Read { collection } => self.store.read(&collection).await,
            Command::Write { collection, data, id } => self.store.write(&collection, data, id).await,
            Command::Delete { collection, id } => self.store.delete(&collection, &id).await,
        }
    }

    /// Parse a raw body and dispatch it. The recognised action travels with
    /// the result so callers can label metrics even for rejected bodies.
    pub async fn handle_body(&self, body: &[u8]) -> Handled {
        let request = match DatabaseRequest::from_slice(body) {
            Ok(request) => request,
            Err(e) => return Handled { action: None, result: Err(e) },
        };
        let action = request.action.parse::<Action>().ok();
        Handled { action, result: self.dispatch(request).await }
    }
}

/// Outcome of [`RequestRouter::handle_body`]. `action` is `None` when the
/// body did not parse or named an unknown action.
#[derive(Debug)]
pub struct Handled {
    pub action: Option<Action>,
    pub result: Result<Vec<Item>, ServiceError>,
}
