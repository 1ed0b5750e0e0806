// src/adapters/memory.rs
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::{
    Adapter, Version,
    error::RemoteError,
    query::{Limit, Query, compare_values},
    record::{PrimaryKey, Record},
};

#[derive(Debug, Clone, Default)]
struct MemoryCollection {
    primary_key: String,
    records: Vec<Record>,
    versions: Vec<Version>,
}

#[derive(Clone, Default)]
struct MemoryStore {
    collections: Arc<Mutex<HashMap<String, MemoryCollection>>>,
}

/// In-memory [`Adapter`]: evaluates filters, search, sort and paging over
/// records held in process.
#[derive(Clone, Default)]
pub struct MemoryAdapter {
    store: MemoryStore,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a collection.
    pub async fn insert_collection(
        &self,
        name: impl Into<String>,
        primary_key: impl Into<String>,
        records: Vec<Record>,
    ) {
        let mut collections = self.store.collections.lock().await;
        collections.insert(
            name.into(),
            MemoryCollection {
                primary_key: primary_key.into(),
                records,
                versions: Vec::new(),
            },
        );
    }

    pub async fn insert_versions(&self, collection: &str, versions: Vec<Version>) {
        let mut collections = self.store.collections.lock().await;
        if let Some(c) = collections.get_mut(collection) {
            c.versions.extend(versions);
        }
    }

    /// Current contents of a collection in insertion order.
    pub async fn records(&self, collection: &str) -> Vec<Record> {
        let collections = self.store.collections.lock().await;
        collections
            .get(collection)
            .map(|c| c.records.clone())
            .unwrap_or_default()
    }

    fn not_found(what: &str) -> RemoteError {
        RemoteError::new(format!("{} not found", what))
            .with_status(404)
            .with_body(json!({
                "errors": [{ "message": format!("{} not found", what), "extensions": { "code": "NOT_FOUND" } }]
            }))
    }

    fn matching<'a>(collection: &'a MemoryCollection, query: &Query) -> Vec<&'a Record> {
        collection
            .records
            .iter()
            .filter(|r| query.filter.as_ref().is_none_or(|f| f.matches(r)))
            .filter(|r| query.filter_system.as_ref().is_none_or(|f| f.matches(r)))
            .filter(|r| {
                query
                    .search
                    .as_deref()
                    .is_none_or(|term| matches_search(r, term))
            })
            .collect()
    }
}

fn matches_search(record: &Record, term: &str) -> bool {
    let needle = term.to_lowercase();
    record.fields().any(|(_, value)| match value {
        Value::String(s) => s.to_lowercase().contains(&needle),
        Value::Number(n) => n.to_string() == needle,
        _ => false,
    })
}

/// Keep only the requested first-level fields. `*` or an empty list keeps all.
fn project(record: &Record, fields: &[String]) -> Record {
    if fields.is_empty() || fields.iter().any(|f| f == "*") {
        return record.clone();
    }

    let mut projected = Record::new();
    for field in fields {
        let root = field.split('.').next().unwrap_or(field);
        if let Some(value) = record.get(root) {
            projected.set(root, value.clone());
        }
    }
    projected
}

#[async_trait]
impl Adapter for MemoryAdapter {
    async fn fetch_page(
        &self,
        collection: &str,
        query: &Query,
    ) -> Result<Vec<Record>, RemoteError> {
        let collections = self.store.collections.lock().await;
        let stored = collections
            .get(collection)
            .ok_or_else(|| Self::not_found(collection))?;

        let mut matched = Self::matching(stored, query);
        matched.sort_by(|a, b| {
            query
                .sort
                .iter()
                .map(|s| {
                    let left = a.get(&s.field).unwrap_or(&Value::Null);
                    let right = b.get(&s.field).unwrap_or(&Value::Null);
                    let ord = compare_values(left, right);
                    if s.descending { ord.reverse() } else { ord }
                })
                .find(|o| o.is_ne())
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let window: Vec<&Record> = match query.limit {
            Limit::Unbounded => matched,
            Limit::Bounded(limit) => {
                let offset = (query.page.max(1) as usize - 1) * limit as usize;
                matched.into_iter().skip(offset).take(limit as usize).collect()
            }
        };

        Ok(window
            .into_iter()
            .map(|r| project(r, &query.fields))
            .collect())
    }

    async fn fetch_count(&self, collection: &str, query: &Query) -> Result<u64, RemoteError> {
        let collections = self.store.collections.lock().await;
        let stored = collections
            .get(collection)
            .ok_or_else(|| Self::not_found(collection))?;
        Ok(Self::matching(stored, query).len() as u64)
    }

    async fn fetch_versions(&self, collection: &str) -> Result<Vec<Version>, RemoteError> {
        let collections = self.store.collections.lock().await;
        collections
            .get(collection)
            .map(|c| c.versions.clone())
            .ok_or_else(|| Self::not_found(collection))
    }

    async fn patch_record(
        &self,
        collection: &str,
        id: &PrimaryKey,
        changes: Record,
    ) -> Result<(), RemoteError> {
        let mut collections = self.store.collections.lock().await;
        let stored = collections
            .get_mut(collection)
            .ok_or_else(|| Self::not_found(collection))?;

        let pk = stored.primary_key.clone();
        let record = stored
            .records
            .iter_mut()
            .find(|r| r.primary_key(&pk).as_ref() == Some(id))
            .ok_or_else(|| Self::not_found(&format!("{}/{}", collection, id)))?;

        record.merge(&changes);
        Ok(())
    }

    async fn delete_record(&self, collection: &str, id: &PrimaryKey) -> Result<(), RemoteError> {
        let mut collections = self.store.collections.lock().await;
        let stored = collections
            .get_mut(collection)
            .ok_or_else(|| Self::not_found(collection))?;

        let pk = stored.primary_key.clone();
        let before = stored.records.len();
        stored
            .records
            .retain(|r| r.primary_key(&pk).as_ref() != Some(id));

        if stored.records.len() == before {
            return Err(Self::not_found(&format!("{}/{}", collection, id)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{Filter, SortField};
    use pretty_assertions::assert_eq;

    fn page(id: i64, parent: Value, sort: i64, title: &str) -> Record {
        Record::new()
            .with("id", id)
            .with("parent", parent)
            .with("sort", sort)
            .with("title", title)
    }

    async fn setup() -> MemoryAdapter {
        let adapter = MemoryAdapter::new();
        adapter
            .insert_collection(
                "pages",
                "id",
                vec![
                    page(1, Value::Null, 2, "Home"),
                    page(2, json!(1), 1, "About"),
                    page(3, json!(1), 0, "Contact"),
                    page(4, Value::Null, 1, "Blog"),
                ],
            )
            .await;
        adapter
    }

    fn ids(records: &[Record]) -> Vec<i64> {
        records
            .iter()
            .filter_map(|r| r.get("id").and_then(Value::as_i64))
            .collect()
    }

    #[tokio::test]
    async fn test_fetch_page_sorts_and_pages() {
        let adapter = setup().await;
        let query = Query::new()
            .with_sort(vec![SortField::asc("sort"), SortField::asc("id")])
            .with_limit(Limit::Bounded(3));

        let first = adapter.fetch_page("pages", &query).await.unwrap();
        assert_eq!(ids(&first), vec![3, 2, 4]);

        let second = adapter
            .fetch_page("pages", &query.clone().with_page(2))
            .await
            .unwrap();
        assert_eq!(ids(&second), vec![1]);
    }

    #[tokio::test]
    async fn test_fetch_page_filter_search_and_projection() {
        let adapter = setup().await;
        let query = Query::new()
            .with_limit(Limit::Unbounded)
            .with_fields(vec!["id".into(), "parent.title".into()])
            .where_filter(Filter::eq("parent", 1))
            .with_search(Some("cont".into()));

        let found = adapter.fetch_page("pages", &query).await.unwrap();
        assert_eq!(found, vec![Record::new().with("id", 3).with("parent", 1)]);
        assert_eq!(adapter.fetch_count("pages", &query).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_patch_and_delete() {
        let adapter = setup().await;
        adapter
            .patch_record("pages", &PrimaryKey::from(2), Record::new().with("sort", 9))
            .await
            .unwrap();
        adapter
            .delete_record("pages", &PrimaryKey::from(4))
            .await
            .unwrap();

        let records = adapter.records("pages").await;
        assert_eq!(ids(&records), vec![1, 2, 3]);
        assert_eq!(records[1].get("sort"), Some(&json!(9)));

        let err = adapter
            .delete_record("pages", &PrimaryKey::from(4))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }
}
