//! Pagination descriptor shared by all list queries.

use serde::{Deserialize, Serialize};

/// Hard cap on page size so a query can never turn into an unbounded scan.
pub const MAX_PAGE_SIZE: i64 = 250;

/// Default page size when the caller passes a non-positive limit.
pub const DEFAULT_PAGE_SIZE: i64 = 20;

/// `(limit, offset, is_descending)` descriptor for list reads.
///
/// All list endpoints are stable-ordered with ties broken by primary key, so
/// repeated queries with the same descriptor against unchanged data return
/// the same sequence.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Pagination {
    pub limit: i64,
    pub offset: i64,
    pub is_descending: bool,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_SIZE,
            offset: 0,
            is_descending: false,
        }
    }
}

impl Pagination {
    pub fn new(limit: i64, offset: i64) -> Self {
        Self {
            limit,
            offset,
            is_descending: false,
        }
    }

    /// Flip the ordering to descending.
    pub fn descending(mut self) -> Self {
        self.is_descending = true;
        self
    }

    /// Clamp the descriptor into valid bounds before binding it into SQL.
    pub fn normalized(self) -> Self {
        Self {
            limit: if self.limit <= 0 {
                DEFAULT_PAGE_SIZE
            } else {
                self.limit.min(MAX_PAGE_SIZE)
            },
            offset: self.offset.max(0),
            is_descending: self.is_descending,
        }
    }

    /// SQL direction keyword for this descriptor.
    pub fn direction(&self) -> &'static str {
        if self.is_descending {
            "DESC"
        } else {
            "ASC"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalized_clamps_bounds() {
        let p = Pagination::new(-5, -10).normalized();
        assert_eq!(p.limit, DEFAULT_PAGE_SIZE);
        assert_eq!(p.offset, 0);

        let p = Pagination::new(100_000, 30).normalized();
        assert_eq!(p.limit, MAX_PAGE_SIZE);
        assert_eq!(p.offset, 30);
    }

    #[test]
    fn direction_keyword() {
        assert_eq!(Pagination::default().direction(), "ASC");
        assert_eq!(Pagination::default().descending().direction(), "DESC");
    }
}
