//! The tree view coordinator.
//!
//! [`TreeView`] owns the in-memory item set of one hierarchical view and
//! keeps it in step with the remote collection. Every derived value (fields,
//! filters, fetch plan) is recomputed from the current [`ViewInputs`],
//! [`LayoutConfig`] and schema when a fetch starts.
//!
//! State sits behind an async mutex that is released before every remote
//! call. Fetches carry a ticket; with stale-response discarding on, a result
//! that lands after a newer one was applied is dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::try_join;
use metrics::histogram;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{
    Adapter,
    adapters::{Notification, Notifier, Version},
    children::ChildrenLookup,
    config::{ConfigHandle, LayoutConfig, LayoutSetting, SyncConfig},
    count::ItemsCount,
    error::{Error, Result},
    materialize::Materializer,
    projection::{FieldProjection, SchemaAdjuster},
    query::{Filter, Limit, Query, SortField},
    reconcile::{EditReconciler, WriteReport},
    record::{EditBatch, FetchMode, ItemSet, PrimaryKey, Record},
    schema::{Action, AllowAll, FieldInfo, Permissions, SchemaService, default_display_fields},
    strategy::{FetchPlan, Pagination, StrategySelector, filter_started, is_filtered},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ViewStatus {
    #[default]
    Idle,
    Fetching,
    FetchingAll,
    Error,
}

/// Host-provided parameters of a view.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewInputs {
    pub collection: Option<String>,
    /// Effective filter (user filter combined with any preset filter).
    pub filter: Option<Filter>,
    /// The part of the filter the user set explicitly.
    pub filter_user: Option<Filter>,
    /// Always-applied restriction, e.g. row-level permissions.
    pub filter_system: Option<Filter>,
    pub search: Option<String>,
    /// The view is used as an item picker.
    pub select_mode: bool,
}

impl ViewInputs {
    pub fn for_collection(collection: impl Into<String>) -> Self {
        Self {
            collection: Some(collection.into()),
            ..Default::default()
        }
    }

    pub fn is_filtered(&self) -> bool {
        is_filtered(self.filter_user.as_ref(), self.search.as_deref())
    }
}

/// A column sort request from the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortChange {
    pub by: String,
    pub desc: bool,
}

#[derive(Debug, Default)]
struct ViewState {
    inputs: ViewInputs,
    status: ViewStatus,
    error: Option<Error>,
    items: ItemSet,
    full_cache: Option<Vec<Record>>,
    item_count: Option<u64>,
    total_count: Option<u64>,
    selection: Vec<PrimaryKey>,
    versions: Vec<Version>,
    issued: u64,
    applied: u64,
    /// Page size and page of the applied items; no page size when the whole
    /// result is shown at once.
    per_page: Option<u32>,
    page: u32,
    last_refreshed: Option<DateTime<Utc>>,
}

impl ViewState {
    fn issue(&mut self, status: ViewStatus) -> u64 {
        self.issued += 1;
        self.status = status;
        self.issued
    }

    /// Settle a finished fetch. Returns false when its result must be dropped.
    fn settle(&mut self, ticket: u64, discard_stale: bool, pending: usize) -> bool {
        if discard_stale && ticket < self.applied {
            if pending == 0 && self.status != ViewStatus::Error {
                self.status = ViewStatus::Idle;
            }
            return false;
        }
        self.applied = self.applied.max(ticket);
        true
    }

    fn succeed(&mut self, pending: usize) {
        self.error = None;
        self.status = if pending > 0 {
            ViewStatus::Fetching
        } else {
            ViewStatus::Idle
        };
        self.last_refreshed = Some(Utc::now());
    }

    fn fail(&mut self, error: &Error) {
        self.status = ViewStatus::Error;
        self.error = Some(error.clone());
    }
}

/// Everything one fetch needs, computed under the state lock.
#[derive(Debug, Clone)]
struct FetchContext {
    collection: String,
    primary_key: String,
    plan: FetchPlan,
    items: Query,
    count: Query,
    total: Query,
    parent_field: Option<String>,
}

/// Counts a fetch as outstanding until it is dropped, whether it completed
/// or its future was cancelled.
struct InFlight<'a> {
    counter: &'a AtomicUsize,
}

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self { counter }
    }

    /// Leave and return how many other fetches are still outstanding.
    fn leave(self) -> usize {
        let counter = self.counter;
        drop(self);
        counter.load(Ordering::SeqCst)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

struct Fetched {
    mode: FetchMode,
    items: Vec<Record>,
    item_count: u64,
    total_count: u64,
}

pub struct TreeView {
    adapter: Arc<dyn Adapter>,
    schema: Arc<dyn SchemaService>,
    permissions: Arc<dyn Permissions>,
    notifier: Arc<dyn Notifier>,
    config: ConfigHandle,
    sync: SyncConfig,
    state: Mutex<ViewState>,
    in_flight: AtomicUsize,
}

impl TreeView {
    pub fn new(adapter: Arc<dyn Adapter>, schema: Arc<dyn SchemaService>, inputs: ViewInputs) -> Self {
        Self {
            adapter,
            schema,
            permissions: Arc::new(AllowAll),
            notifier: Arc::new(crate::adapters::LogNotifier),
            config: ConfigHandle::default(),
            sync: SyncConfig::default(),
            state: Mutex::new(ViewState {
                inputs,
                ..Default::default()
            }),
            in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_permissions(mut self, permissions: Arc<dyn Permissions>) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_config(mut self, config: ConfigHandle) -> Self {
        self.config = config;
        self
    }

    pub fn with_sync_config(mut self, sync: SyncConfig) -> Self {
        self.sync = sync;
        self
    }

    pub fn config(&self) -> &ConfigHandle {
        &self.config
    }

    /* ---------------- DERIVED ---------------- */

    fn primary_key(&self, collection: &str) -> Result<String> {
        self.schema
            .primary_key(collection)
            .map(|f| f.field)
            .ok_or_else(|| Error::MissingPrimaryKey(collection.to_string()))
    }

    fn display_fields(&self, collection: &str, config: &LayoutConfig) -> Vec<String> {
        config.fields(|| {
            default_display_fields(&self.schema.fields(collection), self.sync.default_field_count)
        })
    }

    fn projection(
        &self,
        collection: &str,
        primary_key: &str,
        sort_field: Option<&str>,
        config: &LayoutConfig,
    ) -> FieldProjection {
        let option_fields = [
            Some(config.page_type()),
            config.page_slug(),
            config.page_host(),
            config.page_visibility(),
        ]
        .into_iter()
        .flatten()
        .map(str::to_string)
        .collect();

        let templates = [Some(config.page_title()), config.page_additional()]
            .into_iter()
            .flatten()
            .map(str::to_string)
            .collect();

        FieldProjection {
            collection: collection.to_string(),
            primary_key: Some(primary_key.to_string()),
            display_fields: self.display_fields(collection, config),
            parent_field: config.parent_field().map(str::to_string),
            children_field: config.children_field().map(str::to_string),
            sort_field: sort_field.map(str::to_string),
            option_fields,
            templates,
        }
    }

    /// `And[scope?, host filter?]`. The scope keeps roots and the children of
    /// expanded parents.
    fn compose_filter(&self, collection: &str, inputs: &ViewInputs, config: &LayoutConfig) -> Option<Filter> {
        let mut parts = Vec::new();

        let parents = config.parents();
        if let Some(parent) = config.parent_field() {
            if !parents.is_empty() && self.schema.has_field(collection, parent) {
                parts.push(Filter::or(vec![
                    Filter::is_null(parent),
                    Filter::one_of(parent, parents.iter().map(PrimaryKey::to_value).collect()),
                ]));
            }
        }
        if let Some(filter) = &inputs.filter {
            parts.push(filter.clone());
        }

        if parts.is_empty() {
            None
        } else {
            Some(Filter::and(parts))
        }
    }

    fn context(&self, inputs: &ViewInputs, config: &LayoutConfig) -> Result<FetchContext> {
        let collection = inputs.collection.clone().ok_or(Error::NoCollection)?;
        let primary_key = self.primary_key(&collection)?;
        let sort_field = self.schema.sort_field(&collection);

        let plan = StrategySelector {
            sort_field: sort_field.as_deref(),
            primary_key: Some(primary_key.as_str()),
            default_limit: self.sync.default_limit,
        }
        .select(
            inputs.is_filtered(),
            inputs.select_mode,
            Pagination {
                limit: config.limit(self.sync.default_limit),
                page: config.page(),
            },
        );

        let fields = self
            .projection(&collection, &primary_key, sort_field.as_deref(), config)
            .resolve(&SchemaAdjuster::new(self.schema.as_ref()));
        let filter = self.compose_filter(&collection, inputs, config);

        let count = Query::new()
            .with_filter(filter)
            .with_search(inputs.search.clone())
            .with_system_filter(inputs.filter_system.clone());
        let items = count
            .clone()
            .with_sort(plan.sort.clone())
            .with_fields(fields)
            .with_limit(plan.limit)
            .with_page(plan.page);
        let total = Query::new().with_system_filter(inputs.filter_system.clone());

        Ok(FetchContext {
            collection,
            primary_key,
            plan,
            items,
            count,
            total,
            parent_field: config.parent_field().map(str::to_string),
        })
    }

    /// Fields requested by every fetch, primary key first.
    pub async fn fields(&self) -> Result<Vec<String>> {
        let inputs = self.state.lock().await.inputs.clone();
        let ctx = self.context(&inputs, &self.config.read())?;
        Ok(ctx.items.fields)
    }

    /// The filter every base fetch is constrained by.
    pub async fn base_filter(&self) -> Option<Filter> {
        let inputs = self.state.lock().await.inputs.clone();
        let collection = inputs.collection.as_deref()?;
        self.compose_filter(collection, &inputs, &self.config.read())
    }

    /* ---------------- FETCHING ---------------- */

    async fn run_fetch(&self, ctx: &FetchContext) -> Result<Fetched> {
        let adapter = self.adapter.as_ref();
        let collection = ctx.collection.as_str();

        match ctx.plan.mode {
            FetchMode::Paged => {
                let (items, item_count, total_count) = try_join!(
                    adapter.fetch_page(collection, &ctx.items),
                    adapter.fetch_count(collection, &ctx.count),
                    adapter.fetch_count(collection, &ctx.total),
                )?;
                Ok(Fetched {
                    mode: FetchMode::Paged,
                    items,
                    item_count,
                    total_count,
                })
            }
            FetchMode::Full => {
                let (item_count, total_count) = try_join!(
                    adapter.fetch_count(collection, &ctx.count),
                    adapter.fetch_count(collection, &ctx.total),
                )?;
                let items = Materializer::new(adapter, self.sync.materialize_page_size)
                    .materialize(collection, &ctx.items, item_count, &ctx.primary_key)
                    .await?;
                Ok(Fetched {
                    mode: FetchMode::Full,
                    items,
                    item_count,
                    total_count,
                })
            }
        }
    }

    /// Re-fetch the view with the current inputs and layout configuration.
    pub async fn refresh(&self) -> Result<()> {
        let (ticket, ctx) = {
            let mut state = self.state.lock().await;
            if state.inputs.collection.is_none() {
                debug!("no collection selected, skipping refresh");
                return Ok(());
            }
            let ctx = match self.context(&state.inputs, &self.config.read()) {
                Ok(ctx) => ctx,
                Err(err) => {
                    state.fail(&err);
                    return Err(err);
                }
            };
            (state.issue(ViewStatus::Fetching), ctx)
        };
        let in_flight = InFlight::enter(&self.in_flight);

        debug!(collection = %ctx.collection, ticket, mode = ?ctx.plan.mode, "fetching view");
        let start = Instant::now();
        let outcome = self.run_fetch(&ctx).await;
        let mode = match ctx.plan.mode {
            FetchMode::Paged => "paged",
            FetchMode::Full => "full",
        };
        histogram!("stemma.fetch.duration_ms",
            "collection" => ctx.collection.clone(),
            "mode" => mode
        )
        .record(start.elapsed().as_millis() as f64);

        let mut state = self.state.lock().await;
        let pending = in_flight.leave();
        if !state.settle(ticket, self.sync.discard_stale_responses, pending) {
            debug!(collection = %ctx.collection, ticket, "dropping stale response");
            return Ok(());
        }

        match outcome {
            Ok(fetched) => {
                debug!(
                    collection = %ctx.collection,
                    items = fetched.items.len(),
                    item_count = fetched.item_count,
                    total_count = fetched.total_count,
                    "view fetched"
                );
                if fetched.mode == FetchMode::Full {
                    state.full_cache = Some(fetched.items.clone());
                }
                state.items = ItemSet::new(fetched.mode, fetched.items);
                state.item_count = Some(fetched.item_count);
                state.total_count = Some(fetched.total_count);
                state.per_page = match fetched.mode {
                    FetchMode::Paged => ctx.plan.limit.bounded(),
                    FetchMode::Full => None,
                };
                state.page = ctx.plan.page;
                state.succeed(pending);
                Ok(())
            }
            Err(err) => {
                warn!(collection = %ctx.collection, error = %err, "view fetch failed");
                state.fail(&err);
                Err(err)
            }
        }
    }

    /// Replace the items with the whole (unfiltered) collection.
    ///
    /// Rejected with [`Error::Filtered`] while a filter or search is active;
    /// a no-op while the total count is unknown or zero.
    pub async fn load_all(&self) -> Result<()> {
        let (ticket, ctx, total) = {
            let mut state = self.state.lock().await;
            if state.inputs.is_filtered() {
                return Err(Error::Filtered);
            }
            let Some(total) = state.total_count.filter(|t| *t > 0) else {
                return Ok(());
            };
            let ctx = self.context(&state.inputs, &self.config.read())?;
            (state.issue(ViewStatus::FetchingAll), ctx, total)
        };
        let in_flight = InFlight::enter(&self.in_flight);

        info!(collection = %ctx.collection, total, "loading full collection");
        let outcome = Materializer::new(self.adapter.as_ref(), self.sync.materialize_page_size)
            .materialize(&ctx.collection, &ctx.items, total, &ctx.primary_key)
            .await;

        let mut state = self.state.lock().await;
        let pending = in_flight.leave();
        if !state.settle(ticket, self.sync.discard_stale_responses, pending) {
            debug!(collection = %ctx.collection, ticket, "dropping stale full load");
            return Ok(());
        }

        match outcome {
            Ok(items) => {
                state.full_cache = Some(items.clone());
                state.items = ItemSet::new(FetchMode::Full, items);
                state.per_page = None;
                state.page = 1;
                state.succeed(pending);
                Ok(())
            }
            Err(err) => {
                warn!(collection = %ctx.collection, error = %err, "full load failed");
                state.fail(&err);
                Err(err)
            }
        }
    }

    /// Direct children of `parent`, for lazy expansion. Does not touch the
    /// view's items.
    pub async fn fetch_children(&self, parent: &PrimaryKey) -> Result<Vec<Record>> {
        let inputs = self.state.lock().await.inputs.clone();
        let ctx = self.context(&inputs, &self.config.read())?;

        ChildrenLookup {
            adapter: self.adapter.as_ref(),
            collection: &ctx.collection,
            parent_field: ctx.parent_field.as_deref(),
            fields: &ctx.items.fields,
            sort: &ctx.plan.sort,
        }
        .fetch(parent)
        .await
    }

    /// Best-effort: failures are logged and the stored versions kept.
    pub async fn fetch_versions(&self) {
        let Some(collection) = self.state.lock().await.inputs.collection.clone() else {
            return;
        };

        match self.adapter.fetch_versions(&collection).await {
            Ok(versions) => {
                debug!(collection, count = versions.len(), "fetched versions");
                self.state.lock().await.versions = versions;
            }
            Err(err) => warn!(collection, error = %err, "could not fetch versions"),
        }
    }

    /// Fetch versions and the first view concurrently.
    pub async fn initialize(&self) -> Result<()> {
        let ((), refreshed) = futures::join!(self.fetch_versions(), self.refresh());
        refreshed
    }

    /* ---------------- WRITES ---------------- */

    /// Apply a drag-and-drop batch locally, then write the records whose
    /// sort value changed. The full-collection cache is invalidated.
    pub async fn save_edits(&self, batch: EditBatch) -> Result<WriteReport> {
        let (collection, primary_key, parent_field, sort_field, changes) = {
            let mut state = self.state.lock().await;
            let collection = state.inputs.collection.clone().ok_or(Error::NoCollection)?;
            let primary_key = self.primary_key(&collection)?;
            let parent_field = self.config.read().parent_field().map(str::to_string);
            let sort_field = self.schema.sort_field(&collection);

            let reconciled = EditReconciler {
                primary_key: &primary_key,
                parent_field: parent_field.as_deref(),
                sort_field: sort_field.as_deref(),
            }
            .apply(&state.items.items, &batch);

            state.items.items = reconciled.items;
            state.full_cache = None;
            (collection, primary_key, parent_field, sort_field, reconciled.changes)
        };

        let report = EditReconciler {
            primary_key: &primary_key,
            parent_field: parent_field.as_deref(),
            sort_field: sort_field.as_deref(),
        }
        .push(self.adapter.as_ref(), self.notifier.as_ref(), &collection, changes)
        .await;

        debug!(
            collection,
            written = report.written.len(),
            failed = report.failed.len(),
            "edits saved"
        );
        Ok(report)
    }

    pub async fn can_delete(&self) -> bool {
        let collection = self.state.lock().await.inputs.collection.clone();
        collection.is_some_and(|c| self.permissions.has_permission(&c, Action::Delete))
    }

    /// Remove `id` from the view at once, delete it remotely, then refresh
    /// whatever the outcome.
    pub async fn delete_item(&self, id: &PrimaryKey) -> Result<()> {
        let collection = {
            let mut state = self.state.lock().await;
            let collection = state.inputs.collection.clone().ok_or(Error::NoCollection)?;
            if !self.permissions.has_permission(&collection, Action::Delete) {
                return Err(Error::Forbidden {
                    action: Action::Delete,
                    collection,
                });
            }
            let primary_key = self.primary_key(&collection)?;

            let keep = |r: &Record| r.primary_key(&primary_key).as_ref() != Some(id);
            state.items.items.retain(keep);
            if let Some(cache) = state.full_cache.as_mut() {
                cache.retain(keep);
            }
            state.selection.retain(|s| s != id);
            collection
        };

        let deleted = match self.adapter.delete_record(&collection, id).await {
            Ok(()) => Ok(()),
            Err(source) => {
                warn!(collection, id = %id, error = %source, "delete rejected");
                self.notifier.notify(Notification::from_remote(&source));
                Err(Error::Write {
                    id: id.clone(),
                    source,
                })
            }
        };

        let refreshed = self.refresh().await;
        deleted.and(refreshed)
    }

    /* ---------------- LAYOUT ---------------- */

    /// Write one layout key; query-affecting keys trigger a refresh.
    pub async fn update_config(&self, setting: LayoutSetting) -> Result<()> {
        let refetch = setting.affects_query();
        self.config.write(setting);
        if refetch {
            self.refresh().await
        } else {
            Ok(())
        }
    }

    pub async fn set_parents(&self, parents: Vec<PrimaryKey>) -> Result<()> {
        self.update_config(LayoutSetting::Parents(parents)).await
    }

    pub async fn to_page(&self, page: u32) -> Result<()> {
        self.update_config(LayoutSetting::Page(page)).await
    }

    pub async fn set_limit(&self, limit: Limit) -> Result<()> {
        self.update_config(LayoutSetting::Limit(limit)).await
    }

    /// `None` clears the manual sort.
    pub fn on_sort_change(&self, change: Option<SortChange>) {
        let sort = match change {
            Some(SortChange { by, desc: true }) => vec![SortField::desc(by)],
            Some(SortChange { by, desc: false }) => vec![SortField::asc(by)],
            None => Vec::new(),
        };
        self.config.write(LayoutSetting::Sort(sort));
    }

    /// Restore the default layout configuration and re-fetch.
    pub async fn reset_preset_and_refresh(&self) -> Result<()> {
        self.config.replace(LayoutConfig::default());
        self.refresh().await
    }

    /// Replace the host inputs and re-fetch. Starting to filter clears the
    /// manual sort.
    pub async fn set_inputs(&self, inputs: ViewInputs) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            if filter_started(state.inputs.is_filtered(), inputs.is_filtered()) {
                debug!("filter started, clearing manual sort");
                self.config.write(LayoutSetting::Sort(Vec::new()));
            }
            if state.inputs.collection != inputs.collection {
                state.selection.clear();
                state.versions.clear();
                state.full_cache = None;
            }
            state.inputs = inputs;
        }
        self.refresh().await
    }

    /* ---------------- SELECTION ---------------- */

    pub async fn select_all(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        let collection = state.inputs.collection.clone().ok_or(Error::NoCollection)?;
        let primary_key = self.primary_key(&collection)?;
        state.selection = state.items.keys(&primary_key);
        Ok(())
    }

    pub async fn selection(&self) -> Vec<PrimaryKey> {
        self.state.lock().await.selection.clone()
    }

    pub async fn set_selection(&self, selection: Vec<PrimaryKey>) {
        self.state.lock().await.selection = selection;
    }

    /* ---------------- READS ---------------- */

    pub async fn status(&self) -> ViewStatus {
        self.state.lock().await.status
    }

    pub async fn error(&self) -> Option<Error> {
        self.state.lock().await.error.clone()
    }

    pub async fn items(&self) -> ItemSet {
        self.state.lock().await.items.clone()
    }

    /// The last full-collection result, until an edit invalidates it.
    pub async fn all_items(&self) -> Option<Vec<Record>> {
        self.state.lock().await.full_cache.clone()
    }

    pub async fn item_count(&self) -> Option<u64> {
        self.state.lock().await.item_count
    }

    pub async fn total_count(&self) -> Option<u64> {
        self.state.lock().await.total_count
    }

    pub async fn loading_all(&self) -> bool {
        self.state.lock().await.status == ViewStatus::FetchingAll
    }

    pub async fn is_filtered(&self) -> bool {
        self.state.lock().await.inputs.is_filtered()
    }

    pub async fn inputs(&self) -> ViewInputs {
        self.state.lock().await.inputs.clone()
    }

    pub async fn versions(&self) -> Vec<Version> {
        self.state.lock().await.versions.clone()
    }

    pub async fn last_refreshed(&self) -> Option<DateTime<Utc>> {
        self.state.lock().await.last_refreshed
    }

    /// Summary such as "1–25 of 60 items". `None` when either count is
    /// unavailable or zero.
    pub async fn showing_count(&self) -> Option<ItemsCount> {
        let state = self.state.lock().await;
        ItemsCount::paginated(
            state.item_count,
            state.total_count,
            state.page,
            state.per_page,
            state.inputs.filter_user.is_some(),
        )
    }

    /// `ceil(item_count / limit)`; one page when everything is shown.
    pub async fn total_pages(&self) -> u32 {
        let state = self.state.lock().await;
        let Some(count) = state.item_count.filter(|c| *c > 0) else {
            return 0;
        };
        match state.per_page {
            Some(limit) if limit > 0 => {
                u32::try_from(count.div_ceil(limit as u64)).unwrap_or(u32::MAX)
            }
            _ => 1,
        }
    }

    /// Fields that hold files: the `$thumbnail` virtual field and relations
    /// to the files collection.
    pub async fn file_fields(&self) -> Vec<FieldInfo> {
        let Some(collection) = self.state.lock().await.inputs.collection.clone() else {
            return Vec::new();
        };
        self.schema
            .fields(&collection)
            .into_iter()
            .filter(|f| {
                f.field == "$thumbnail"
                    || f.relation.as_deref() == Some(self.sync.files_collection.as_str())
            })
            .collect()
    }
}
