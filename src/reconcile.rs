//! Applying a batch of drag-and-drop edits locally and remotely.
//!
//! Local state is updated first and never rolled back. Only records whose
//! sort value actually changed are written; a parent-only move stays local
//! until the next refresh.

use std::collections::BTreeMap;

use metrics::counter;
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    Adapter,
    adapters::{Notification, Notifier},
    error::{Error, RemoteError},
    query::loose_eq,
    record::{EditBatch, PrimaryKey, Record},
};

pub struct EditReconciler<'a> {
    pub primary_key: &'a str,
    pub parent_field: Option<&'a str>,
    pub sort_field: Option<&'a str>,
}

/// Result of applying a batch to the in-memory items.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconciled {
    pub items: Vec<Record>,
    /// Batch entries to write, in primary key order.
    pub changes: Vec<(PrimaryKey, Record)>,
}

#[derive(Debug, Default)]
pub struct WriteReport {
    pub written: Vec<PrimaryKey>,
    pub failed: Vec<(PrimaryKey, RemoteError)>,
}

impl WriteReport {
    pub fn is_ok(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn first_error(&self) -> Option<Error> {
        self.failed.first().map(|(id, source)| Error::Write {
            id: id.clone(),
            source: source.clone(),
        })
    }
}

impl EditReconciler<'_> {
    /// Apply `batch` to a copy of `items`.
    ///
    /// The parent field is taken from the batch when the entry has it (an
    /// explicit null makes the record a root). A record counts as changed
    /// only when its entry carries a sort value different from the current
    /// one.
    pub fn apply(&self, items: &[Record], batch: &EditBatch) -> Reconciled {
        let mut changed: BTreeMap<PrimaryKey, Record> = BTreeMap::new();
        let mut updated = items.to_vec();

        for item in updated.iter_mut() {
            let Some(pk) = item.primary_key(self.primary_key) else {
                continue;
            };
            let Some(edit) = batch.get(&pk) else {
                continue;
            };

            if let Some(parent) = self.parent_field {
                if let Some(value) = edit.get(parent) {
                    item.set(parent, value.clone());
                }
            }

            if let Some(sort) = self.sort_field {
                if let Some(value) = edit.get(sort) {
                    let current = item.get(sort).unwrap_or(&Value::Null);
                    if !loose_eq(value, current) {
                        debug!(id = %pk, from = %current, to = %value, "sort value changed");
                        changed.insert(pk.clone(), edit.clone());
                    }
                    item.set(sort, value.clone());
                }
            }
        }

        Reconciled {
            items: updated,
            changes: changed.into_iter().collect(),
        }
    }

    /// Write `changes` one after another. A failed write does not stop the
    /// rest; all failures are reported once, with the first failure's code.
    pub async fn push(
        &self,
        adapter: &dyn Adapter,
        notifier: &dyn Notifier,
        collection: &str,
        changes: Vec<(PrimaryKey, Record)>,
    ) -> WriteReport {
        let mut report = WriteReport::default();

        for (id, payload) in changes {
            match adapter.patch_record(collection, &id, payload).await {
                Ok(()) => report.written.push(id),
                Err(err) => {
                    warn!(collection, id = %id, error = %err, "patch rejected");
                    counter!("stemma.write.failures", "collection" => collection.to_string())
                        .increment(1);
                    report.failed.push((id, err));
                }
            }
        }

        if let Some((_, first)) = report.failed.first() {
            notifier.notify(Notification::from_remote(first));
        }

        report
    }
}
