use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::ApiError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

/// Pagination + filter cursor for one list request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    /// 1-based page number.
    pub page: u32,
    pub page_size: u32,
    pub search: String,
    pub sort_by: Option<String>,
    pub sort_order: SortOrder,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: 10,
            search: String::new(),
            sort_by: None,
            sort_order: SortOrder::Asc,
        }
    }
}

impl ListQuery {
    /// A new search term always starts again from page 1.
    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = search.into();
        self.page = 1;
        self
    }

    pub fn with_page(mut self, page: u32) -> Self {
        self.page = page.max(1);
        self
    }

    /// A new page size always starts again from page 1.
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self.page = 1;
        self
    }

    pub fn with_sort(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort_by = Some(field.into());
        self.sort_order = order;
        self
    }

    /// Query-string parameters, in a stable order. Empty search is omitted.
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params = vec![
            ("page".to_string(), self.page.max(1).to_string()),
            ("page_size".to_string(), self.page_size.max(1).to_string()),
        ];
        let search = self.search.trim();
        if !search.is_empty() {
            params.push(("search".to_string(), search.to_string()));
        }
        if let Some(sort_by) = &self.sort_by {
            params.push(("sort_by".to_string(), sort_by.clone()));
            params.push(("sort_order".to_string(), self.sort_order.as_str().to_string()));
        }
        params
    }
}

/// One page of results as reported by the server.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Total matching items across all pages.
    pub total: u64,
}

/// Derived pagination summary shown next to a list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub current_page: u32,
    pub total_pages: u32,
    pub total_items: u64,
    pub page_size: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            current_page: 1,
            total_pages: 1,
            total_items: 0,
            page_size: 10,
        }
    }
}

impl Pagination {
    /// `total_pages = max(1, ceil(total_items / page_size))`, and the
    /// requested page clamped into `[1, total_pages]`.
    pub fn compute(total_items: u64, page_size: u32, requested_page: u32) -> Self {
        let page_size = page_size.max(1);
        let pages = total_items.div_ceil(u64::from(page_size)).max(1);
        let total_pages = u32::try_from(pages).unwrap_or(u32::MAX);
        Self {
            current_page: requested_page.clamp(1, total_pages),
            total_pages,
            total_items,
            page_size,
        }
    }

    pub fn has_next(&self) -> bool {
        self.current_page < self.total_pages
    }

    pub fn has_previous(&self) -> bool {
        self.current_page > 1
    }
}

/// Normalize a list response body into a [`Page`].
///
/// The canonical contract is the flat `{"count": N, "results": [...]}`
/// envelope. A bare JSON array is accepted with `total = len`. The doubly
/// nested `{"results": {"results": [...], "count": N}}` shape is a
/// compatibility shim for older endpoints and is unwrapped here so nothing
/// past this boundary ever sees it.
pub fn normalize_list<T: DeserializeOwned>(body: Value) -> Result<Page<T>, ApiError> {
    let (items, count) = match body {
        Value::Array(items) => (items, None),
        Value::Object(mut obj) => {
            let outer_count = obj.get("count").and_then(Value::as_u64);
            match obj.remove("results") {
                Some(Value::Array(items)) => (items, outer_count),
                Some(Value::Object(mut inner)) => {
                    debug!("list response uses nested results envelope");
                    let inner_count = inner.get("count").and_then(Value::as_u64);
                    match inner.remove("results") {
                        Some(Value::Array(items)) => (items, inner_count.or(outer_count)),
                        _ => {
                            return Err(ApiError::internal(
                                "list response: nested results is not an array",
                            ))
                        }
                    }
                }
                _ => return Err(ApiError::internal("list response: missing results array")),
            }
        }
        _ => return Err(ApiError::internal("list response: expected an object or array")),
    };

    let len = items.len() as u64;
    let items = items
        .into_iter()
        .map(serde_json::from_value)
        .collect::<Result<Vec<T>, _>>()
        .map_err(|e| ApiError::internal(format!("list response item: {e}")))?;

    Ok(Page {
        items,
        total: count.unwrap_or(len).max(len),
    })
}
