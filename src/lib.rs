//! Hierarchical tree views over a paged remote collection.
//!
//! A [`TreeView`] decides between fetching one page and materializing the
//! whole collection, keeps counts and selection, fetches children lazily and
//! reconciles drag-and-drop edits with minimal remote writes. The remote
//! side is any [`Adapter`]; [`adapters::memory::MemoryAdapter`] evaluates
//! queries in process.

pub mod adapters;
pub mod children;
pub mod config;
pub mod count;
pub mod error;
pub mod materialize;
pub mod projection;
pub mod query;
pub mod reconcile;
pub mod record;
pub mod schema;
pub mod strategy;
pub mod view;

pub use crate::adapters::{Adapter, LogNotifier, Notification, Notifier, Severity, Version};
pub use crate::config::{ConfigHandle, LayoutConfig, LayoutSetting, SyncConfig};
pub use crate::count::ItemsCount;
pub use crate::error::{Error, RemoteError, Result};
pub use crate::query::{Filter, FilterOp, Limit, Query, SortField};
pub use crate::reconcile::WriteReport;
pub use crate::record::{EditBatch, FetchMode, ItemSet, PrimaryKey, Record};
pub use crate::schema::{Action, FieldInfo, Permissions, SchemaService};
pub use crate::view::{SortChange, TreeView, ViewInputs, ViewStatus};

#[cfg(feature = "memory")]
pub use crate::adapters::memory::MemoryAdapter;
