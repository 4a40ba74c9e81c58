//! Remote content mirrored locally for offline reading.

use serde::{Deserialize, Serialize};

use crate::cache::{CachedItem, Cacheable};
use crate::db::Collection;

/// A news article.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsItem {
  pub id: String,
  pub title: String,
  #[serde(default)]
  pub summary: Option<String>,
  #[serde(default)]
  pub body: Option<String>,
  #[serde(default)]
  pub url: Option<String>,
  #[serde(default)]
  pub category: Option<String>,
  /// Epoch millis
  #[serde(default)]
  pub published_at: Option<i64>,
}

/// A community event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventItem {
  pub id: String,
  pub title: String,
  #[serde(default)]
  pub description: Option<String>,
  #[serde(default)]
  pub location: Option<String>,
  #[serde(default)]
  pub url: Option<String>,
  /// Epoch millis
  #[serde(default)]
  pub starts_at: Option<i64>,
  #[serde(default)]
  pub ends_at: Option<i64>,
}

impl Cacheable for NewsItem {
  fn cache_key(&self) -> &str {
    &self.id
  }

  fn collection() -> Collection {
    Collection::News
  }
}

impl Cacheable for EventItem {
  fn cache_key(&self) -> &str {
    &self.id
  }

  fn collection() -> Collection {
    Collection::Events
  }
}

impl CachedItem<NewsItem> {
  pub fn is_read(&self) -> bool {
    self.flag
  }
}

impl CachedItem<EventItem> {
  pub fn is_attending(&self) -> bool {
    self.flag
  }
}

/// Kind of content served by the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
  News,
  Events,
}

impl ContentKind {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::News => "news",
      Self::Events => "events",
    }
  }
}

impl std::fmt::Display for ContentKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

impl std::str::FromStr for ContentKind {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "news" => Ok(Self::News),
      "events" | "event" => Ok(Self::Events),
      other => Err(format!("unknown content kind: {}", other)),
    }
  }
}

/// Content as returned by the remote content source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ContentItem {
  News(NewsItem),
  Event(EventItem),
}

impl ContentItem {
  pub fn id(&self) -> &str {
    match self {
      Self::News(n) => &n.id,
      Self::Event(e) => &e.id,
    }
  }
}

/// Split a mixed fetch result into per-collection batches.
pub fn partition(items: Vec<ContentItem>) -> (Vec<NewsItem>, Vec<EventItem>) {
  let mut news = Vec::new();
  let mut events = Vec::new();
  for item in items {
    match item {
      ContentItem::News(n) => news.push(n),
      ContentItem::Event(e) => events.push(e),
    }
  }
  (news, events)
}
