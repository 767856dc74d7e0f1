//! Locally synthesized documents for offline creation.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};

use crate::cache::{merge_shallow, Item};

/// Abilities granted to the creator of a document.
const OWNER_ABILITIES: &[&str] = &[
  "accesses_manage",
  "accesses_view",
  "ai_transform",
  "ai_translate",
  "attachment_upload",
  "children_create",
  "children_list",
  "collaboration_auth",
  "destroy",
  "favorite",
  "invite_owner",
  "link_configuration",
  "media_auth",
  "move",
  "partial_update",
  "restore",
  "retrieve",
  "update",
  "versions_destroy",
  "versions_list",
  "versions_retrieve",
];

/// A complete document record as the server would return it for a new
/// document owned by the current user.
pub fn default_document(id: &str, now: DateTime<Utc>) -> Item {
  let timestamp = now.to_rfc3339_opts(SecondsFormat::Millis, true);
  let abilities: serde_json::Map<String, Value> = OWNER_ABILITIES
    .iter()
    .map(|ability| (ability.to_string(), Value::Bool(true)))
    .collect();

  let document = json!({
    "id": id,
    "title": null,
    // Base64 encoded collaborative state, empty until the editor writes one
    "content": "",
    "creator": "",
    "excerpt": null,
    "is_favorite": false,
    "link_reach": "restricted",
    "link_role": "reader",
    "nb_accesses_direct": 1,
    "nb_accesses_ancestors": 1,
    "created_at": timestamp,
    "updated_at": timestamp,
    "abilities": abilities,
    "user_role": "owner",
    "user_roles": ["owner"],
    "depth": 1,
    "numchild": 0,
    "path": "",
  });

  match document {
    Value::Object(map) => map,
    _ => Item::new(),
  }
}

/// Default record with the client's fields merged over it. The generated id wins.
pub fn synthesize_document(id: &str, body: &Item, now: DateTime<Utc>) -> Item {
  let mut document = default_document(id, now);
  merge_shallow(&mut document, body);
  document.insert("id".to_string(), Value::String(id.to_string()));
  document
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;

  fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
  }

  #[test]
  fn test_default_document_is_owned() {
    let document = default_document("U", now());

    assert_eq!(document["id"], "U");
    assert_eq!(document["created_at"], "2024-05-01T12:00:00.000Z");
    assert_eq!(document["created_at"], document["updated_at"]);
    assert_eq!(document["user_roles"], json!(["owner"]));
    let abilities = document["abilities"].as_object().unwrap();
    assert_eq!(abilities.len(), OWNER_ABILITIES.len());
    assert!(abilities.values().all(|v| v == &Value::Bool(true)));
  }

  #[test]
  fn test_body_overrides_defaults_but_not_id() {
    let body = json!({"id": "other", "title": "x", "link_reach": "public"});
    let document = synthesize_document("U", body.as_object().unwrap(), now());

    assert_eq!(document["id"], "U");
    assert_eq!(document["title"], "x");
    assert_eq!(document["link_reach"], "public");
    assert_eq!(document["link_role"], "reader");
  }
}
