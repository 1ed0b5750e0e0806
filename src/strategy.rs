//! Paged versus full-collection fetching.
//!
//! Manual reordering and free browsing of the tree need every record in
//! memory to place siblings and scope parents correctly. Filtered, searched
//! and item-picker views only ever show a page, so they stay on server-side
//! pagination.

use crate::{
    query::{Filter, Limit, SortField},
    record::FetchMode,
};

/// Last-resort sort key when neither a sort field nor a primary key is known.
pub const FALLBACK_SORT_FIELD: &str = "id";

/// True iff a user filter or a non-empty search term is active.
pub fn is_filtered(filter_user: Option<&Filter>, search: Option<&str>) -> bool {
    filter_user.is_some() || search.is_some_and(|s| !s.is_empty())
}

/// The view started filtering, so manual sort order no longer applies.
pub fn filter_started(was_filtered: bool, is_filtered: bool) -> bool {
    !was_filtered && is_filtered
}

/// Sort sent with every request: the collection's sort field, else its
/// primary key.
pub fn query_sort(sort_field: Option<&str>, primary_key: Option<&str>) -> Vec<SortField> {
    vec![SortField::asc(
        sort_field.or(primary_key).unwrap_or(FALLBACK_SORT_FIELD),
    )]
}

/// User pagination state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub limit: Limit,
    pub page: u32,
}

/// The outcome of strategy selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchPlan {
    pub mode: FetchMode,
    pub sort: Vec<SortField>,
    pub limit: Limit,
    pub page: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrategySelector<'a> {
    pub sort_field: Option<&'a str>,
    pub primary_key: Option<&'a str>,
    /// Page size used when the stored pagination limit is unbounded.
    pub default_limit: u32,
}

impl StrategySelector<'_> {
    pub fn select(&self, is_filtered: bool, select_mode: bool, pagination: Pagination) -> FetchPlan {
        let sort = query_sort(self.sort_field, self.primary_key);

        if is_filtered || select_mode {
            let limit = match pagination.limit {
                Limit::Unbounded => Limit::Bounded(self.default_limit),
                bounded => bounded,
            };
            FetchPlan {
                mode: FetchMode::Paged,
                sort,
                limit,
                page: pagination.page.max(1),
            }
        } else {
            FetchPlan {
                mode: FetchMode::Full,
                sort,
                limit: Limit::Unbounded,
                page: 1,
            }
        }
    }
}
