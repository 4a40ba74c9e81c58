//! Serde types matching the remote HTTP API.
//!
//! Kept apart from the engine types so the wire format can drift without
//! touching the store.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::content::{ContentItem, ContentKind, EventItem, NewsItem};
use crate::queue::{ActionType, PendingAction, TargetType};

/// Body of `POST /actions`.
#[derive(Debug, Serialize)]
pub struct ApiActionRequest<'a> {
  /// Doubles as the idempotency key on the remote side
  pub id: &'a str,
  pub action_type: ActionType,
  pub target_id: &'a str,
  pub target_type: TargetType,
  pub payload: &'a Value,
  pub timestamp: i64,
}

impl<'a> From<&'a PendingAction> for ApiActionRequest<'a> {
  fn from(action: &'a PendingAction) -> Self {
    Self {
      id: &action.id,
      action_type: action.action_type,
      target_id: &action.target_id,
      target_type: action.target_type,
      payload: &action.payload,
      timestamp: action.timestamp,
    }
  }
}

/// `GET /content/{kind}` answers with either a bare array or `{"items": [...]}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ApiContentResponse {
  Bare(Vec<Value>),
  Wrapped { items: Vec<Value> },
}

impl ApiContentResponse {
  /// Decode every entry as `kind`. Entries are not required to carry a
  /// `kind` tag since the endpoint already scopes them.
  pub fn into_items(self, kind: ContentKind) -> serde_json::Result<Vec<ContentItem>> {
    let raw = match self {
      Self::Bare(items) | Self::Wrapped { items } => items,
    };

    raw
      .into_iter()
      .map(|value| {
        Ok(match kind {
          ContentKind::News => ContentItem::News(serde_json::from_value::<NewsItem>(value)?),
          ContentKind::Events => ContentItem::Event(serde_json::from_value::<EventItem>(value)?),
        })
      })
      .collect()
  }
}

/// Error body the remote may send with a 4xx/5xx.
#[derive(Debug, Deserialize, Default)]
pub struct ApiErrorBody {
  #[serde(default, alias = "error")]
  pub message: Option<String>,
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_content_response_shapes() {
    let bare: ApiContentResponse =
      serde_json::from_value(json!([{"id": "n1", "title": "One"}])).unwrap();
    let wrapped: ApiContentResponse =
      serde_json::from_value(json!({"items": [{"id": "n1", "title": "One"}]})).unwrap();

    for response in [bare, wrapped] {
      let items = response.into_items(ContentKind::News).unwrap();
      assert_eq!(items.len(), 1);
      assert_eq!(items[0].id(), "n1");
    }
  }

  #[test]
  fn test_events_decode_as_events() {
    let response: ApiContentResponse =
      serde_json::from_value(json!([{"id": "e1", "title": "Meetup", "starts_at": 5}])).unwrap();
    let items = response.into_items(ContentKind::Events).unwrap();
    assert!(matches!(&items[0], ContentItem::Event(e) if e.starts_at == Some(5)));
  }

  #[test]
  fn test_error_body_accepts_either_field() {
    let a: ApiErrorBody = serde_json::from_value(json!({"message": "bad"})).unwrap();
    let b: ApiErrorBody = serde_json::from_value(json!({"error": "bad"})).unwrap();
    assert_eq!(a.message.as_deref(), Some("bad"));
    assert_eq!(b.message.as_deref(), Some("bad"));
  }
}
