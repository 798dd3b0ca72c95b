//! Cache keys for backend queries.

use std::collections::BTreeMap;

use crate::cache::cache_key;

/// A paged list query against one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
  /// Equality filters, column -> value
  pub filters: BTreeMap<String, String>,
  /// Column to order by, optionally suffixed ".desc"
  pub order: Option<String>,
  /// Zero-based page number
  pub page: u32,
  pub page_size: u32,
}

impl Default for ListQuery {
  fn default() -> Self {
    Self {
      filters: BTreeMap::new(),
      order: None,
      page: 0,
      page_size: 50,
    }
  }
}

impl ListQuery {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn filter(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
    self.filters.insert(column.into(), value.into());
    self
  }

  pub fn order(mut self, column: impl Into<String>) -> Self {
    self.order = Some(column.into());
    self
  }

  pub fn page(mut self, page: u32) -> Self {
    self.page = page;
    self
  }

  pub fn offset(&self) -> u64 {
    self.page as u64 * self.page_size as u64
  }

  /// Cache key for this query against `table`.
  pub fn cache_key(&self, table: &str) -> String {
    let mut params: Vec<(String, String)> = self
      .filters
      .iter()
      .map(|(column, value)| (format!("f.{}", column), value.clone()))
      .collect();
    params.push(("page".to_string(), self.page.to_string()));
    params.push(("page_size".to_string(), self.page_size.to_string()));
    if let Some(order) = &self.order {
      params.push(("order".to_string(), order.clone()));
    }

    cache_key(&format!("{}_list", table), params)
  }
}

/// Cache key for a single row.
pub fn detail_key(table: &str, id: &str) -> String {
  cache_key(&format!("{}_detail", table), [("id", id)])
}
