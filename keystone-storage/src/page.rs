use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Pagination parameters for a list operation.
///
/// Requests reach the dispatcher as a single JSON `data` map rather than as
/// query-string parameters (every action goes through one endpoint), so this
/// type is built from that map with [`Pageable::from_data`] rather than
/// extracted directly from the URL.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Pageable {
    #[serde(default)]
    pub page: u64,
    #[serde(default = "default_page_size")]
    pub size: u64,
    #[serde(default)]
    pub sort: Option<String>,
}

fn default_page_size() -> u64 {
    20
}

impl Default for Pageable {
    fn default() -> Self {
        Self {
            page: 0,
            size: default_page_size(),
            sort: None,
        }
    }
}

impl Pageable {
    /// Read `limit`/`offset` (preferred, per the wire contract) or
    /// `page`/`size` keys out of a request's `data` map, falling back to
    /// defaults for anything missing or malformed.
    pub fn from_data(data: &serde_json::Map<String, Value>) -> Self {
        if let Some(limit) = data.get("limit").and_then(Value::as_u64) {
            let offset = data.get("offset").and_then(Value::as_u64).unwrap_or(0);
            let size = limit.max(1);
            return Self {
                page: offset / size,
                size,
                sort: data.get("sort").and_then(Value::as_str).map(str::to_string),
            };
        }
        let page = data.get("page").and_then(Value::as_u64).unwrap_or(0);
        let size = data
            .get("size")
            .and_then(Value::as_u64)
            .unwrap_or_else(default_page_size)
            .max(1);
        Self {
            page,
            size,
            sort: data.get("sort").and_then(Value::as_str).map(str::to_string),
        }
    }

    pub fn offset(&self) -> u64 {
        self.page * self.size
    }

    pub fn limit(&self) -> u64 {
        self.size
    }
}

/// A page of results with pagination metadata.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub content: Vec<T>,
    pub page: u64,
    pub size: u64,
    pub total_elements: u64,
    pub total_pages: u64,
}

impl<T> Page<T> {
    pub fn new(content: Vec<T>, pageable: &Pageable, total_elements: u64) -> Self {
        let total_pages = if pageable.size == 0 {
            0
        } else {
            total_elements.div_ceil(pageable.size)
        };
        Self {
            content,
            page: pageable.page,
            size: pageable.size,
            total_elements,
            total_pages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_offset_takes_precedence_over_page_size() {
        let mut data = serde_json::Map::new();
        data.insert("limit".into(), Value::from(10));
        data.insert("offset".into(), Value::from(20));
        let p = Pageable::from_data(&data);
        assert_eq!(p.page, 2);
        assert_eq!(p.size, 10);
    }

    #[test]
    fn defaults_when_data_empty() {
        let p = Pageable::from_data(&serde_json::Map::new());
        assert_eq!(p.page, 0);
        assert_eq!(p.size, 20);
    }

    #[test]
    fn page_total_pages_rounds_up() {
        let p = Page::new(vec![1, 2, 3], &Pageable { page: 0, size: 2, sort: None }, 5);
        assert_eq!(p.total_pages, 3);
    }
}
