use std::collections::HashSet;
use std::time::Instant;

use futures::future::try_join_all;
use metrics::histogram;
use tracing::{debug, warn};

use crate::{
    Adapter,
    error::{Error, Result},
    query::{Limit, Query},
    record::Record,
};

/// Loads a whole collection by issuing every page request at once.
///
/// Pages are concatenated in page order, never in completion order. A single
/// failed page fails the whole load.
pub struct Materializer<'a> {
    adapter: &'a dyn Adapter,
    page_size: u32,
}

impl<'a> Materializer<'a> {
    pub fn new(adapter: &'a dyn Adapter, page_size: u32) -> Self {
        Self {
            adapter,
            page_size: page_size.max(1),
        }
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// `ceil(total / page_size)`.
    pub fn page_count(&self, total: u64) -> u32 {
        u32::try_from(total.div_ceil(self.page_size as u64)).unwrap_or(u32::MAX)
    }

    /// Fetch every record matching `query`, given the `total` a prior count
    /// returned. `query`'s limit and page are overridden per request.
    ///
    /// Records repeated across pages (the remote shifted between requests)
    /// are kept once, at their first position.
    pub async fn materialize(
        &self,
        collection: &str,
        query: &Query,
        total: u64,
        primary_key: &str,
    ) -> Result<Vec<Record>> {
        let pages = self.page_count(total);
        if pages == 0 {
            return Ok(Vec::new());
        }

        let start = Instant::now();
        debug!(collection, total, pages, "materializing collection");

        let requests: Vec<(u32, Query)> = (1..=pages)
            .map(|page| {
                let q = query
                    .clone()
                    .with_limit(Limit::Bounded(self.page_size))
                    .with_page(page);
                (page, q)
            })
            .collect();

        let responses = try_join_all(requests.iter().map(|(page, q)| async move {
            self.adapter
                .fetch_page(collection, q)
                .await
                .map_err(|source| Error::PartialMaterialization {
                    page: *page,
                    source,
                })
        }))
        .await?;

        let mut seen = HashSet::new();
        let mut items = Vec::new();
        let mut duplicates = 0usize;
        for record in responses.into_iter().flatten() {
            let Some(pk) = record.primary_key(primary_key) else {
                items.push(record);
                continue;
            };
            if seen.insert(pk) {
                items.push(record);
            } else {
                duplicates += 1;
            }
        }
        if duplicates > 0 {
            warn!(collection, duplicates, "dropped records repeated across pages");
        }

        histogram!("stemma.materialize.duration_ms",
            "collection" => collection.to_string()
        )
        .record(start.elapsed().as_millis() as f64);

        Ok(items)
    }
}
