//! Layout configuration and runtime knobs.
//!
//! [`LayoutConfig`] is the persisted, user-editable state of a tree view.
//! Unset keys read as documented defaults; writes go through
//! [`LayoutConfig::with`], which replaces a single key and keeps the rest.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::{
    query::{Limit, SortField},
    record::PrimaryKey,
};

pub const DEFAULT_PAGE_TITLE: &str = "title";
pub const DEFAULT_PAGE_TYPE: &str = "type";

/// Runtime configuration of the synchronization core.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Page size used when materializing the whole collection.
    pub materialize_page_size: u32,
    /// Page size when the layout has none stored.
    pub default_limit: u32,
    /// Number of display fields picked when the layout has none stored.
    pub default_field_count: usize,
    /// Collection whose relations mark a field as a file field.
    pub files_collection: String,
    /// Drop fetch results that complete after a newer fetch was applied.
    pub discard_stale_responses: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            materialize_page_size: 100,
            default_limit: 25,
            default_field_count: 4,
            files_collection: "directus_files".to_string(),
            discard_stale_responses: true,
        }
    }
}

/// Display and hierarchy options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutOptions {
    #[serde(rename = "parent", alias = "parentField", skip_serializing_if = "Option::is_none")]
    pub parent_field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children_field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_slug: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_visibility: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_additional: Option<String>,
}

/// Query state of the view.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort: Option<Vec<SortField>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<Limit>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parents: Option<Vec<PrimaryKey>>,
}

/// A single-key write.
#[derive(Debug, Clone, PartialEq)]
pub enum LayoutSetting {
    ParentField(Option<String>),
    ChildrenField(Option<String>),
    PageTitle(Option<String>),
    PageType(Option<String>),
    PageSlug(Option<String>),
    PageHost(Option<String>),
    PageVisibility(Option<String>),
    PageAdditional(Option<String>),
    Sort(Vec<SortField>),
    Limit(Limit),
    Page(u32),
    Fields(Vec<String>),
    Parents(Vec<PrimaryKey>),
}

impl LayoutSetting {
    /// Settings that change what is fetched, as opposed to presentation only.
    pub fn affects_query(&self) -> bool {
        !matches!(self, LayoutSetting::Sort(_))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LayoutConfig {
    #[serde(default)]
    pub options: LayoutOptions,
    #[serde(default)]
    pub query: LayoutQuery,
}

impl LayoutConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of `self` with exactly one key replaced.
    pub fn with(&self, setting: LayoutSetting) -> Self {
        let mut next = self.clone();
        let options = &mut next.options;
        let query = &mut next.query;
        match setting {
            LayoutSetting::ParentField(v) => options.parent_field = v,
            LayoutSetting::ChildrenField(v) => options.children_field = v,
            LayoutSetting::PageTitle(v) => options.page_title = v,
            LayoutSetting::PageType(v) => options.page_type = v,
            LayoutSetting::PageSlug(v) => options.page_slug = v,
            LayoutSetting::PageHost(v) => options.page_host = v,
            LayoutSetting::PageVisibility(v) => options.page_visibility = v,
            LayoutSetting::PageAdditional(v) => options.page_additional = v,
            LayoutSetting::Sort(v) => query.sort = Some(v),
            LayoutSetting::Limit(v) => query.limit = Some(v),
            LayoutSetting::Page(v) => query.page = Some(v.max(1)),
            LayoutSetting::Fields(v) => query.fields = Some(v),
            LayoutSetting::Parents(v) => query.parents = Some(v),
        }
        next
    }

    pub fn parent_field(&self) -> Option<&str> {
        self.options.parent_field.as_deref()
    }

    pub fn children_field(&self) -> Option<&str> {
        self.options.children_field.as_deref()
    }

    pub fn page_title(&self) -> &str {
        self.options
            .page_title
            .as_deref()
            .unwrap_or(DEFAULT_PAGE_TITLE)
    }

    pub fn page_type(&self) -> &str {
        self.options.page_type.as_deref().unwrap_or(DEFAULT_PAGE_TYPE)
    }

    pub fn page_slug(&self) -> Option<&str> {
        self.options.page_slug.as_deref()
    }

    pub fn page_host(&self) -> Option<&str> {
        self.options.page_host.as_deref()
    }

    pub fn page_visibility(&self) -> Option<&str> {
        self.options.page_visibility.as_deref()
    }

    pub fn page_additional(&self) -> Option<&str> {
        self.options.page_additional.as_deref()
    }

    /// Stored sort, or ascending by `primary_key`.
    pub fn sort(&self, primary_key: Option<&str>) -> Vec<SortField> {
        match &self.query.sort {
            Some(sort) => sort.clone(),
            None => primary_key.map(SortField::asc).into_iter().collect(),
        }
    }

    pub fn limit(&self, default: u32) -> Limit {
        self.query.limit.unwrap_or(Limit::Bounded(default))
    }

    pub fn page(&self) -> u32 {
        self.query.page.unwrap_or(1)
    }

    /// Stored display fields, or `default` when none are stored.
    pub fn fields(&self, default: impl FnOnce() -> Vec<String>) -> Vec<String> {
        match &self.query.fields {
            Some(fields) => fields.clone(),
            None => default(),
        }
    }

    pub fn parents(&self) -> &[PrimaryKey] {
        self.query.parents.as_deref().unwrap_or(&[])
    }
}

/// Shared, observable layout configuration.
///
/// Every write publishes the new value to all subscribers.
#[derive(Debug, Clone)]
pub struct ConfigHandle {
    tx: Arc<watch::Sender<LayoutConfig>>,
}

impl ConfigHandle {
    pub fn new(initial: LayoutConfig) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    pub fn read(&self) -> LayoutConfig {
        self.tx.borrow().clone()
    }

    pub fn write(&self, setting: LayoutSetting) -> LayoutConfig {
        let mut written = LayoutConfig::default();
        self.tx.send_modify(|current| {
            *current = current.with(setting);
            written = current.clone();
        });
        written
    }

    pub fn replace(&self, config: LayoutConfig) {
        self.tx.send_replace(config);
    }

    pub fn subscribe(&self) -> watch::Receiver<LayoutConfig> {
        self.tx.subscribe()
    }
}

impl Default for ConfigHandle {
    fn default() -> Self {
        Self::new(LayoutConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let config = LayoutConfig::new();
        assert_eq!(config.page_title(), "title");
        assert_eq!(config.page_type(), "type");
        assert_eq!(config.page_slug(), None);
        assert_eq!(config.limit(25), Limit::Bounded(25));
        assert_eq!(config.page(), 1);
        assert_eq!(config.sort(Some("id")), vec![SortField::asc("id")]);
        assert!(config.parents().is_empty());
    }

    #[test]
    fn test_with_preserves_siblings() {
        let config = LayoutConfig::new()
            .with(LayoutSetting::ParentField(Some("parent".into())))
            .with(LayoutSetting::PageSlug(Some("slug".into())))
            .with(LayoutSetting::PageTitle(Some("{{ name }}".into())));

        assert_eq!(config.parent_field(), Some("parent"));
        assert_eq!(config.page_slug(), Some("slug"));
        assert_eq!(config.page_title(), "{{ name }}");
        assert_eq!(config.page_type(), "type");
    }

    #[test]
    fn test_serde_uses_persisted_keys() {
        let config = LayoutConfig::new()
            .with(LayoutSetting::ParentField(Some("parent_page".into())))
            .with(LayoutSetting::Limit(Limit::Bounded(50)))
            .with(LayoutSetting::Sort(vec![SortField::desc("sort")]));

        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(
            value,
            json!({
                "options": { "parent": "parent_page" },
                "query": { "sort": ["-sort"], "limit": 50 }
            })
        );

        let back: LayoutConfig = serde_json::from_value(json!({
            "options": { "parentField": "parent_page" },
            "query": { "parents": [1, "a"] }
        }))
        .unwrap();
        assert_eq!(back.parent_field(), Some("parent_page"));
        assert_eq!(
            back.parents(),
            &[PrimaryKey::from(1), PrimaryKey::from("a")]
        );
    }

    #[tokio::test]
    async fn test_handle_publishes_writes() {
        let handle = ConfigHandle::default();
        let mut rx = handle.subscribe();

        handle.write(LayoutSetting::Page(3));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().page(), 3);
        assert_eq!(handle.read().page(), 3);
    }
}
