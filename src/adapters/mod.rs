#[cfg(feature = "memory")]
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::RemoteError,
    query::Query,
    record::{PrimaryKey, Record},
};

/// -----------------------------
/// Adapter contract
/// -----------------------------

/// The remote side of a tree view: a query executor plus partial writes.
///
/// Implementations own transport concerns (auth, retries, timeouts). The
/// core only ever awaits these calls and never holds state across them.
#[async_trait]
pub trait Adapter: Send + Sync + 'static {
    /* ---------------- READS ---------------- */

    /// One page of records. `query.limit` is bounded except for a scoped
    /// children lookup.
    async fn fetch_page(&self, collection: &str, query: &Query)
    -> Result<Vec<Record>, RemoteError>;

    /// Number of records matching `query.filter`, `query.search` and
    /// `query.filter_system`. Paging is ignored.
    async fn fetch_count(&self, collection: &str, query: &Query) -> Result<u64, RemoteError>;

    /// Saved versions of items in `collection`.
    async fn fetch_versions(&self, collection: &str) -> Result<Vec<Version>, RemoteError>;

    /* ---------------- WRITES ---------------- */

    async fn patch_record(
        &self,
        collection: &str,
        id: &PrimaryKey,
        changes: Record,
    ) -> Result<(), RemoteError>;

    async fn delete_record(&self, collection: &str, id: &PrimaryKey) -> Result<(), RemoteError>;
}

/// Saved version metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Version {
    pub key: String,
    #[serde(default)]
    pub name: Option<String>,
    pub item: PrimaryKey,
    #[serde(default)]
    pub hash: Option<String>,
}

/// -----------------------------
/// Notifications
/// -----------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// i18n key of the title, e.g. `errors.FORBIDDEN`.
    pub title: String,
    pub severity: Severity,
    pub code: String,
    pub dialog: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
}

impl Notification {
    pub fn from_remote(error: &RemoteError) -> Self {
        let code = error.code();
        Self {
            title: format!("errors.{}", code),
            severity: Severity::Error,
            code,
            dialog: true,
            raw: Some(serde_json::json!({
                "status": error.status,
                "message": error.message,
                "body": error.body,
            })),
        }
    }
}

/// Fire-and-forget user notification channel.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Drops every notification after logging it.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: Notification) {
        tracing::warn!(code = %notification.code, title = %notification.title, "notification");
    }
}
