#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use stemma::{
    Adapter, MemoryAdapter, Notification, Notifier, PrimaryKey, Query, Record, RemoteError,
    Version,
    schema::{CollectionInfo, FieldInfo, StaticSchema},
};

pub const PAGES: &str = "pages";

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Page(Query),
    Count(Query),
    Versions,
    Patch(PrimaryKey, Record),
    Delete(PrimaryKey),
}

#[derive(Default)]
struct Script {
    page_delays: HashMap<u32, Duration>,
    failing_pages: HashSet<u32>,
    failing_patches: HashSet<PrimaryKey>,
    fail_reads: bool,
    fail_deletes: bool,
    fail_versions: bool,
}

/// Wraps a [`MemoryAdapter`] with scripted delays and failures and records
/// every call in order.
#[derive(Clone, Default)]
pub struct ScriptedAdapter {
    inner: MemoryAdapter,
    script: Arc<Mutex<Script>>,
    calls: Arc<Mutex<Vec<Call>>>,
    completed: Arc<Mutex<Vec<u32>>>,
}

impl ScriptedAdapter {
    pub fn new(inner: MemoryAdapter) -> Self {
        Self {
            inner,
            ..Default::default()
        }
    }

    pub fn inner(&self) -> &MemoryAdapter {
        &self.inner
    }

    pub fn delay_page(&self, page: u32, delay: Duration) {
        self.script.lock().unwrap().page_delays.insert(page, delay);
    }

    pub fn fail_page(&self, page: u32) {
        self.script.lock().unwrap().failing_pages.insert(page);
    }

    pub fn fail_patch(&self, id: impl Into<PrimaryKey>) {
        self.script.lock().unwrap().failing_patches.insert(id.into());
    }

    pub fn fail_reads(&self, fail: bool) {
        self.script.lock().unwrap().fail_reads = fail;
    }

    pub fn fail_deletes(&self) {
        self.script.lock().unwrap().fail_deletes = true;
    }

    pub fn fail_versions(&self) {
        self.script.lock().unwrap().fail_versions = true;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
        self.completed.lock().unwrap().clear();
    }

    pub fn page_queries(&self) -> Vec<Query> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Page(q) => Some(q),
                _ => None,
            })
            .collect()
    }

    pub fn patches(&self) -> Vec<(PrimaryKey, Record)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Patch(id, changes) => Some((id, changes)),
                _ => None,
            })
            .collect()
    }

    /// Page numbers in the order their responses completed.
    pub fn completed_pages(&self) -> Vec<u32> {
        self.completed.lock().unwrap().clone()
    }

    fn log(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

pub fn rejected(code: &str) -> RemoteError {
    RemoteError::new("rejected")
        .with_status(403)
        .with_body(json!({ "errors": [{ "message": "rejected", "extensions": { "code": code } }] }))
}

#[async_trait]
impl Adapter for ScriptedAdapter {
    async fn fetch_page(&self, collection: &str, query: &Query) -> Result<Vec<Record>, RemoteError> {
        self.log(Call::Page(query.clone()));
        let (delay, fail) = {
            let script = self.script.lock().unwrap();
            (
                script.page_delays.get(&query.page).copied(),
                script.fail_reads || script.failing_pages.contains(&query.page),
            )
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(RemoteError::new("service unavailable").with_status(503));
        }

        let records = self.inner.fetch_page(collection, query).await?;
        self.completed.lock().unwrap().push(query.page);
        Ok(records)
    }

    async fn fetch_count(&self, collection: &str, query: &Query) -> Result<u64, RemoteError> {
        self.log(Call::Count(query.clone()));
        if self.script.lock().unwrap().fail_reads {
            return Err(RemoteError::new("service unavailable").with_status(503));
        }
        self.inner.fetch_count(collection, query).await
    }

    async fn fetch_versions(&self, collection: &str) -> Result<Vec<Version>, RemoteError> {
        self.log(Call::Versions);
        if self.script.lock().unwrap().fail_versions {
            return Err(rejected("FORBIDDEN"));
        }
        self.inner.fetch_versions(collection).await
    }

    async fn patch_record(
        &self,
        collection: &str,
        id: &PrimaryKey,
        changes: Record,
    ) -> Result<(), RemoteError> {
        self.log(Call::Patch(id.clone(), changes.clone()));
        if self.script.lock().unwrap().failing_patches.contains(id) {
            return Err(rejected("INVALID_PAYLOAD"));
        }
        self.inner.patch_record(collection, id, changes).await
    }

    async fn delete_record(&self, collection: &str, id: &PrimaryKey) -> Result<(), RemoteError> {
        self.log(Call::Delete(id.clone()));
        if self.script.lock().unwrap().fail_deletes {
            return Err(rejected("FORBIDDEN"));
        }
        self.inner.delete_record(collection, id).await
    }
}

/// Collects notifications for assertions.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        self.sent.lock().unwrap().push(notification);
    }
}

pub fn schema() -> StaticSchema {
    StaticSchema::new().with_collection(
        PAGES,
        CollectionInfo {
            primary_key: "id".into(),
            fields: vec![
                FieldInfo::stored("id"),
                FieldInfo::stored("title"),
                FieldInfo::stored("type"),
                FieldInfo::stored("slug"),
                FieldInfo::stored("parent").related_to(PAGES),
                FieldInfo::stored("sort").hidden(),
                FieldInfo::stored("cover").related_to("directus_files"),
                FieldInfo::alias("children").related_to(PAGES),
            ],
            sort_field: Some("sort".into()),
        },
    )
}

/// A page; the first sixty are posts.
pub fn page(id: i64, parent: Option<i64>) -> Record {
    Record::new()
        .with("id", id)
        .with("title", format!("Page {}", id))
        .with("type", if id <= 60 { "post" } else { "page" })
        .with("slug", format!("page-{}", id))
        .with("parent", parent.map(Value::from).unwrap_or(Value::Null))
        .with("sort", id)
}

/// `count` root pages, ids starting at 1.
pub async fn flat_pages(count: i64) -> ScriptedAdapter {
    let memory = MemoryAdapter::new();
    memory
        .insert_collection(PAGES, "id", (1..=count).map(|id| page(id, None)).collect())
        .await;
    ScriptedAdapter::new(memory)
}

/// 1 and 4 are roots, 2 is under 1, 3 under 2, 5 under 4.
pub async fn small_tree() -> ScriptedAdapter {
    let memory = MemoryAdapter::new();
    memory
        .insert_collection(
            PAGES,
            "id",
            vec![
                page(1, None),
                page(2, Some(1)),
                page(3, Some(2)),
                page(4, None),
                page(5, Some(4)),
            ],
        )
        .await;
    ScriptedAdapter::new(memory)
}

pub fn ids(records: &[Record]) -> Vec<i64> {
    records
        .iter()
        .filter_map(|r| r.get("id").and_then(Value::as_i64))
        .collect()
}
