//! Logical tables of the durable store and the shapes stored in them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::api::RequestData;

/// A cached item: the JSON object as last known.
pub type Item = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
  /// Paginated list responses keyed by full request URL
  List,
  /// Single items keyed by item URL
  Item,
  /// Requests waiting for replay, keyed by a strictly increasing timestamp
  Mutation,
  /// Application version that last wrote the store
  Version,
}

impl Table {
  /// Tables purged together when the schema version changes.
  pub const DATA: [Table; 3] = [Table::List, Table::Item, Table::Mutation];

  pub fn name(self) -> &'static str {
    match self {
      Table::List => "list_cache",
      Table::Item => "item_cache",
      Table::Mutation => "mutation_queue",
      Table::Version => "schema_version",
    }
  }
}

/// One cached page of a paginated listing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListPage {
  #[serde(default)]
  pub count: u64,
  #[serde(default)]
  pub next: Option<String>,
  #[serde(default)]
  pub previous: Option<String>,
  #[serde(default)]
  pub results: Vec<Item>,
  /// Any other top-level fields the server sent
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

impl ListPage {
  /// Right-biased merge of `patch` into every result with id `id`.
  /// Returns whether anything matched.
  pub fn merge_item(&mut self, id: &str, patch: &Item) -> bool {
    let mut matched = false;
    for result in &mut self.results {
      if value_id(result).as_deref() == Some(id) {
        merge_shallow(result, patch);
        matched = true;
      }
    }
    matched
  }

  /// Drop every result with id `id`. Returns whether anything was removed.
  pub fn remove_item(&mut self, id: &str) -> bool {
    let before = self.results.len();
    self
      .results
      .retain(|result| value_id(result).as_deref() != Some(id));
    let removed = before - self.results.len();
    self.count = self.count.saturating_sub(removed as u64);
    removed > 0
  }

  /// Put `item` at the top of the page.
  pub fn unshift(&mut self, item: Item) {
    self.results.insert(0, item);
    self.count += 1;
  }
}

/// A request queued for replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedMutation {
  pub key: String,
  pub request_data: RequestData,
}

/// Right-biased shallow merge: top-level keys of `patch` overwrite `base`.
pub fn merge_shallow(base: &mut Item, patch: &Item) {
  for (key, value) in patch {
    base.insert(key.clone(), value.clone());
  }
}

/// The `id` field of an item as a string, whether stored as string or number.
pub fn value_id(item: &Item) -> Option<String> {
  match item.get("id")? {
    Value::String(id) => Some(id.clone()),
    Value::Number(id) => Some(id.to_string()),
    _ => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn item(value: Value) -> Item {
    value.as_object().cloned().unwrap()
  }

  fn page() -> ListPage {
    serde_json::from_value(json!({
      "count": 2,
      "next": null,
      "previous": null,
      "results": [
        {"id": "A", "title": "Doc", "is_favorite": false},
        {"id": "B", "title": "Other"}
      ]
    }))
    .unwrap()
  }

  #[test]
  fn test_merge_item_is_right_biased() {
    let mut page = page();
    assert!(page.merge_item("A", &item(json!({"title": "New"}))));

    assert_eq!(
      Value::Object(page.results[0].clone()),
      json!({"id": "A", "title": "New", "is_favorite": false})
    );
    assert_eq!(page.results[1]["title"], "Other");
  }

  #[test]
  fn test_merge_item_without_match() {
    let mut page = page();
    assert!(!page.merge_item("Z", &item(json!({"title": "New"}))));
    assert_eq!(page, self::page());
  }

  #[test]
  fn test_remove_item_updates_count() {
    let mut page = page();
    assert!(page.remove_item("A"));
    assert_eq!(page.count, 1);
    assert_eq!(page.results.len(), 1);
    assert!(!page.remove_item("A"));
  }

  #[test]
  fn test_unshift_puts_item_first() {
    let mut page = page();
    page.unshift(item(json!({"id": "U"})));
    assert_eq!(page.count, 3);
    assert_eq!(page.results[0]["id"], "U");
  }

  #[test]
  fn test_unknown_fields_survive() {
    let value = json!({"count": 0, "results": [], "facets": {"x": 1}});
    let page: ListPage = serde_json::from_value(value).unwrap();
    let back = serde_json::to_value(&page).unwrap();
    assert_eq!(back["facets"], json!({"x": 1}));
  }

  #[test]
  fn test_numeric_ids() {
    assert_eq!(value_id(&item(json!({"id": 42}))).as_deref(), Some("42"));
    assert_eq!(value_id(&item(json!({"title": "no id"}))), None);
  }
}
