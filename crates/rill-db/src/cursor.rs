use rill_query::FindOptions;
use serde::{Deserialize, Serialize};

/// Pagination summary recorded by `find`: total matching records, the page
/// that was served, and the page count under the current limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Cursor {
    pub records: usize,
    pub page: usize,
    pub pages: usize,
}

impl Cursor {
    pub(crate) fn compute(records: usize, options: &FindOptions) -> Self {
        let pages = match options.limit {
            Some(limit) if limit > 0 => records.div_ceil(limit).max(1),
            _ => 1,
        };
        Self {
            records,
            page: options.page.unwrap_or(0),
            pages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_count_rounds_up() {
        let options = FindOptions {
            limit: Some(10),
            ..FindOptions::default()
        };
        assert_eq!(Cursor::compute(25, &options).pages, 3);
        assert_eq!(Cursor::compute(30, &options).pages, 3);
        assert_eq!(Cursor::compute(0, &options).pages, 1);
    }

    #[test]
    fn no_limit_is_a_single_page() {
        assert_eq!(Cursor::compute(100, &FindOptions::default()).pages, 1);
    }
}
