use tracing::debug;

use crate::{
    Adapter,
    error::Result,
    query::{Filter, Limit, Query, SortField},
    record::{PrimaryKey, Record},
};

/// Direct children of one parent, fetched on demand for lazy expansion.
pub struct ChildrenLookup<'a> {
    pub adapter: &'a dyn Adapter,
    pub collection: &'a str,
    pub parent_field: Option<&'a str>,
    pub fields: &'a [String],
    pub sort: &'a [SortField],
}

impl ChildrenLookup<'_> {
    /// The query for `parent`'s children: only the parent predicate, every
    /// child in one request.
    pub fn query(&self, parent: &PrimaryKey) -> Option<Query> {
        let parent_field = self.parent_field?;
        Some(
            Query::new()
                .with_sort(self.sort.to_vec())
                .with_fields(self.fields.to_vec())
                .with_limit(Limit::Unbounded)
                .with_page(1)
                .where_filter(Filter::eq(parent_field, parent.to_value())),
        )
    }

    /// Ordered direct children. Empty, without a request, when no parent
    /// field is configured.
    pub async fn fetch(&self, parent: &PrimaryKey) -> Result<Vec<Record>> {
        let Some(query) = self.query(parent) else {
            return Ok(Vec::new());
        };

        let children = self.adapter.fetch_page(self.collection, &query).await?;
        debug!(
            collection = self.collection,
            parent = %parent,
            count = children.len(),
            "fetched children"
        );
        Ok(children)
    }
}
