//! Pagination and filter envelopes

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Largest page a client may request
pub const MAX_PAGE_LIMIT: u64 = 100;

/// Position of a page within a listing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    /// Page number (1-indexed)
    pub page: u64,
    pub limit: u64,
    pub total: u64,
    pub total_pages: u64,
    pub has_next: bool,
    pub has_prev: bool,
}

impl Pagination {
    /// Page 0 is treated as page 1; the limit is clamped to
    /// `1..=MAX_PAGE_LIMIT`.
    pub fn new(page: u64, limit: u64, total: u64) -> Self {
        let page = page.max(1);
        let limit = limit.clamp(1, MAX_PAGE_LIMIT);
        let total_pages = total.div_ceil(limit);
        Self {
            page,
            limit,
            total,
            total_pages,
            has_next: page < total_pages,
            has_prev: page > 1,
        }
    }

    /// Items before this page. Saturates for pages far past the end.
    pub fn offset(&self) -> u64 {
        (self.page - 1).saturating_mul(self.limit)
    }
}

/// Which filters a listing applied and which it supports
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterInfo {
    pub applied: BTreeMap<String, String>,
    pub available: Vec<String>,
}

impl FilterInfo {
    pub fn new<S: Into<String>>(available: impl IntoIterator<Item = S>) -> Self {
        Self {
            applied: BTreeMap::new(),
            available: available.into_iter().map(Into::into).collect(),
        }
    }

    pub fn apply(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.applied.insert(name.into(), value.into());
    }
}

/// One page of a listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub pagination: Pagination,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<FilterInfo>,
}

impl<T> Page<T> {
    pub fn with_filters(mut self, filters: FilterInfo) -> Self {
        self.filters = Some(filters);
        self
    }
}

/// Cut one page out of an already ordered listing
pub fn paginate<T>(items: Vec<T>, page: u64, limit: u64) -> Page<T> {
    let pagination = Pagination::new(page, limit, items.len() as u64);
    let data = items
        .into_iter()
        .skip(usize::try_from(pagination.offset()).unwrap_or(usize::MAX))
        .take(pagination.limit as usize)
        .collect();
    Page {
        data,
        pagination,
        filters: None,
    }
}
