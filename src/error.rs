use serde_json::Value;
use thiserror::Error;

use crate::record::PrimaryKey;
use crate::schema::Action;

/// Code reported when a remote failure carries none.
pub const UNKNOWN_CODE: &str = "UNKNOWN";

pub type Result<T> = std::result::Result<T, Error>;

/// A failure reported by the remote side of an [`Adapter`](crate::Adapter).
#[derive(Debug, Clone, PartialEq, Error)]
#[error("remote error{}: {message}", .status.map(|s| format!(" ({s})")).unwrap_or_default())]
pub struct RemoteError {
    pub status: Option<u16>,
    pub message: String,
    /// Raw response body, when the remote returned one.
    pub body: Option<Value>,
}

impl RemoteError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
            body: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Error code extracted from the body.
    ///
    /// Looks at `errors[0].extensions.code` first, then `extensions.code`,
    /// and falls back to [`UNKNOWN_CODE`].
    pub fn code(&self) -> String {
        let Some(body) = &self.body else {
            return UNKNOWN_CODE.to_string();
        };

        body.pointer("/errors/0/extensions/code")
            .or_else(|| body.pointer("/extensions/code"))
            .and_then(Value::as_str)
            .unwrap_or(UNKNOWN_CODE)
            .to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error("transport error: {0}")]
    Transport(#[from] RemoteError),

    #[error("write rejected for {id}: {source}")]
    Write { id: PrimaryKey, source: RemoteError },

    #[error("materialization aborted at page {page}: {source}")]
    PartialMaterialization { page: u32, source: RemoteError },

    #[error("cannot materialize the full collection while a filter or search is active")]
    Filtered,

    #[error("collection {0} has no primary key")]
    MissingPrimaryKey(String),

    #[error("{action} not permitted on {collection}")]
    Forbidden { action: Action, collection: String },

    #[error("no collection selected")]
    NoCollection,
}

impl Error {
    /// Remote error code, if this error came from the remote.
    pub fn code(&self) -> Option<String> {
        match self {
            Error::Transport(e)
            | Error::Write { source: e, .. }
            | Error::PartialMaterialization { source: e, .. } => Some(e.code()),
            _ => None,
        }
    }
}
