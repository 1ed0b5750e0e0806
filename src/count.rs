use std::fmt::{self, Display};

/// The "showing N of M" summary of a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemsCount {
    pub from: u64,
    pub to: u64,
    /// Records matching the current filter.
    pub count: u64,
    /// Records in the collection regardless of the user filter.
    pub total: u64,
    pub filtered: bool,
}

impl ItemsCount {
    /// `None` when either count is unavailable or zero.
    ///
    /// `per_page` is `None` when every matching record is shown at once.
    pub fn paginated(
        item_count: Option<u64>,
        total_count: Option<u64>,
        page: u32,
        per_page: Option<u32>,
        filtered: bool,
    ) -> Option<Self> {
        let count = item_count.filter(|c| *c > 0)?;
        let total = total_count.filter(|t| *t > 0)?;

        let (from, to) = match per_page {
            Some(per_page) if per_page > 0 => {
                let per_page = per_page as u64;
                let page = page.max(1) as u64;
                let from = ((page - 1) * per_page + 1).min(count);
                let to = (page * per_page).min(count);
                (from, to)
            }
            _ => (1, count),
        };

        Some(Self {
            from,
            to,
            count,
            total,
            filtered,
        })
    }
}

impl Display for ItemsCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let noun = if self.filtered { "filtered items" } else { "items" };
        if self.count == 1 {
            let one = if self.filtered { "1 filtered item" } else { "1 item" };
            return write!(f, "{}", one);
        }
        if self.from == self.to {
            return write!(f, "{} of {} {}", self.from, self.count, noun);
        }
        write!(f, "{}–{} of {} {}", self.from, self.to, self.count, noun)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suppressed_when_counts_missing_or_zero() {
        for (items, total) in [(None, Some(10)), (Some(10), None), (Some(0), Some(10)), (Some(5), Some(0))] {
            for filtered in [false, true] {
                for page in [1, 2] {
                    assert_eq!(ItemsCount::paginated(items, total, page, Some(25), filtered), None);
                }
            }
        }
    }

    #[test]
    fn test_paged_window() {
        let count = ItemsCount::paginated(Some(60), Some(80), 3, Some(25), false).unwrap();
        assert_eq!((count.from, count.to), (51, 60));
        assert_eq!(count.to_string(), "51–60 of 60 items");

        let filtered = ItemsCount::paginated(Some(60), Some(80), 1, Some(25), true).unwrap();
        assert_eq!(filtered.to_string(), "1–25 of 60 filtered items");
    }

    #[test]
    fn test_full_view_shows_everything() {
        let count = ItemsCount::paginated(Some(250), Some(250), 4, None, false).unwrap();
        assert_eq!((count.from, count.to), (1, 250));
        assert_eq!(
            ItemsCount::paginated(Some(1), Some(3), 1, Some(25), true)
                .unwrap()
                .to_string(),
            "1 filtered item"
        );
    }
}
