//! Route table for the intercepted document API.

use reqwest::Method;
use thiserror::Error;
use url::Url;

use crate::cache::Table;

/// What an intercepted route does, and therefore how it is cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteKind {
  /// Paginated collection read, cached per full URL.
  List,
  /// Single item read, cached per item URL.
  Item,
  Create,
  Update,
  Delete,
}

impl RouteKind {
  /// Table a read route is served from.
  pub fn table(self) -> Option<Table> {
    match self {
      RouteKind::List => Some(Table::List),
      RouteKind::Item => Some(Table::Item),
      RouteKind::Create | RouteKind::Update | RouteKind::Delete => None,
    }
  }

  pub fn is_mutation(self) -> bool {
    matches!(self, RouteKind::Create | RouteKind::Update | RouteKind::Delete)
  }
}

/// URL shape of a route, relative to the resource's collection path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathPattern {
  /// `{prefix}{resource}/`
  Collection,
  /// `{prefix}{resource}/{id}/`
  Member,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
  pub method: Method,
  pub pattern: PathPattern,
  pub kind: RouteKind,
}

/// Routes registered for one resource mounted under an API prefix.
#[derive(Debug, Clone)]
pub struct Router {
  collection_path: String,
  routes: Vec<Route>,
}

impl Router {
  /// Empty router for `{prefix}{resource}/`.
  pub fn new(prefix: &str, resource: &str) -> Self {
    let prefix = prefix.trim_matches('/');
    let resource = resource.trim_matches('/');
    let collection_path = if prefix.is_empty() {
      format!("/{}/", resource)
    } else {
      format!("/{}/{}/", prefix, resource)
    };

    Self {
      collection_path,
      routes: Vec::new(),
    }
  }

  /// The standard document routes: list, retrieve, create, partial update, destroy.
  pub fn documents(prefix: &str, resource: &str) -> Self {
    Self::new(prefix, resource)
      .register(Method::GET, PathPattern::Collection, RouteKind::List)
      .register(Method::GET, PathPattern::Member, RouteKind::Item)
      .register(Method::POST, PathPattern::Collection, RouteKind::Create)
      .register(Method::PATCH, PathPattern::Member, RouteKind::Update)
      .register(Method::DELETE, PathPattern::Member, RouteKind::Delete)
  }

  pub fn register(mut self, method: Method, pattern: PathPattern, kind: RouteKind) -> Self {
    self.routes.push(Route {
      method,
      pattern,
      kind,
    });
    self
  }

  pub fn collection_path(&self) -> &str {
    &self.collection_path
  }

  /// Find the route handling `method` on `url`, if any.
  pub fn route(&self, method: &Method, url: &Url) -> Option<&Route> {
    let pattern = self.pattern_of(url.path())?;
    self
      .routes
      .iter()
      .find(|route| route.method == *method && route.pattern == pattern)
  }

  fn pattern_of(&self, path: &str) -> Option<PathPattern> {
    let rest = path.strip_prefix(&self.collection_path)?;
    if rest.is_empty() {
      return Some(PathPattern::Collection);
    }
    let id = rest.strip_suffix('/')?;
    if id.is_empty() || id.contains('/') {
      None
    } else {
      Some(PathPattern::Member)
    }
  }
}

/// Item id taken from the last non-empty path segment of `url`.
pub fn item_id(url: &Url) -> Option<String> {
  url
    .path_segments()?
    .filter(|segment| !segment.is_empty())
    .last()
    .map(String::from)
}

/// Path of the collection an item URL belongs to.
pub fn collection_path_of(item_url: &Url) -> String {
  let path = item_url.path().trim_end_matches('/');
  match path.rfind('/') {
    Some(idx) => path[..=idx].to_string(),
    None => "/".to_string(),
  }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("{0:?} is not a valid item id")]
pub struct InvalidItemId(pub String);

/// URL of item `id` inside the collection addressed by `collection_url`.
///
/// The id is percent-encoded as one path segment, so it cannot climb out of
/// the collection or start a query.
pub fn member_url(collection_url: &Url, id: &str) -> Result<Url, InvalidItemId> {
  let invalid = || InvalidItemId(id.to_string());
  if matches!(id, "" | "." | "..") {
    return Err(invalid());
  }

  let mut member = collection_url.clone();
  member.set_query(None);
  member.set_fragment(None);
  member
    .path_segments_mut()
    .map_err(|_| invalid())?
    .pop_if_empty()
    .push(id)
    .push("");
  Ok(member)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
  }

  #[test]
  fn test_documents_router_dispatch() {
    let router = Router::documents("/api/v1.0/", "documents");

    let kind = |method: Method, u: &str| router.route(&method, &url(u)).map(|r| r.kind);

    assert_eq!(
      kind(Method::GET, "https://d.test/api/v1.0/documents/?page=2&ordering=-updated_at"),
      Some(RouteKind::List)
    );
    assert_eq!(
      kind(Method::GET, "https://d.test/api/v1.0/documents/A/"),
      Some(RouteKind::Item)
    );
    assert_eq!(
      kind(Method::POST, "https://d.test/api/v1.0/documents/"),
      Some(RouteKind::Create)
    );
    assert_eq!(
      kind(Method::PATCH, "https://d.test/api/v1.0/documents/A/"),
      Some(RouteKind::Update)
    );
    assert_eq!(
      kind(Method::DELETE, "https://d.test/api/v1.0/documents/A/"),
      Some(RouteKind::Delete)
    );
  }

  #[test]
  fn test_unregistered_paths_do_not_match() {
    let router = Router::documents("api/v1.0", "documents");

    assert!(router
      .route(&Method::GET, &url("https://d.test/api/v1.0/documents/A/accesses/"))
      .is_none());
    assert!(router
      .route(&Method::GET, &url("https://d.test/api/v1.0/users/me/"))
      .is_none());
    assert!(router
      .route(&Method::PUT, &url("https://d.test/api/v1.0/documents/A/"))
      .is_none());
  }

  #[test]
  fn test_item_id_and_collection() {
    let item = url("https://d.test/api/v1.0/documents/abc-123/");
    assert_eq!(item_id(&item).as_deref(), Some("abc-123"));
    assert_eq!(collection_path_of(&item), "/api/v1.0/documents/");
  }

  #[test]
  fn test_member_url_drops_query() {
    let collection = url("https://d.test/api/v1.0/documents/?page=1");
    let member = member_url(&collection, "U").unwrap();
    assert_eq!(member.as_str(), "https://d.test/api/v1.0/documents/U/");
  }

  #[test]
  fn test_member_url_keeps_id_inside_collection() {
    let collection = url("https://d.test/api/v1.0/documents/");

    let member = member_url(&collection, "../users/me").unwrap();
    assert_eq!(
      member.as_str(),
      "https://d.test/api/v1.0/documents/..%2Fusers%2Fme/"
    );
    let member = member_url(&collection, "a?b#c").unwrap();
    assert_eq!(member.as_str(), "https://d.test/api/v1.0/documents/a%3Fb%23c/");
    assert_eq!(collection_path_of(&member), "/api/v1.0/documents/");

    assert!(member_url(&collection, "..").is_err());
    assert!(member_url(&collection, "").is_err());
  }

  #[test]
  fn test_read_kinds_are_bound_to_tables() {
    assert_eq!(RouteKind::List.table(), Some(Table::List));
    assert_eq!(RouteKind::Item.table(), Some(Table::Item));
    assert_eq!(RouteKind::Update.table(), None);
    assert!(RouteKind::Delete.is_mutation());
    assert!(!RouteKind::Item.is_mutation());
  }
}
