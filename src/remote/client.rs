use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use url::Url;

use crate::connectivity::Reachability;
use crate::content::{ContentItem, ContentKind};
use crate::error::{ApplyError, Error, RemoteError, Result};
use crate::queue::PendingAction;

use super::api_types::{ApiActionRequest, ApiContentResponse, ApiErrorBody};
use super::{Ack, ActionApplier, ContentSource, FetchParams};

/// HTTP client for the remote content and action endpoints
#[derive(Clone)]
pub struct HttpRemote {
  client: reqwest::Client,
  base: Url,
  token: Option<String>,
}

impl HttpRemote {
  pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> Result<Self> {
    let mut base = Url::parse(base_url)
      .map_err(|e| Error::InvalidInput(format!("invalid remote url {}: {}", base_url, e)))?;
    // Url::join replaces the last segment unless the path ends in '/'
    if !base.path().ends_with('/') {
      let path = format!("{}/", base.path());
      base.set_path(&path);
    }

    let client = reqwest::Client::builder()
      .timeout(timeout)
      .user_agent(concat!("offsync/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| Error::InvalidInput(format!("failed to build http client: {}", e)))?;

    Ok(Self {
      client,
      base,
      token,
    })
  }

  pub fn base_url(&self) -> &Url {
    &self.base
  }

  fn endpoint(&self, path: &str) -> std::result::Result<Url, RemoteError> {
    self
      .base
      .join(path)
      .map_err(|e| RemoteError::permanent(format!("bad endpoint {}: {}", path, e)))
  }

  fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
    match &self.token {
      Some(token) => request.bearer_auth(token),
      None => request,
    }
  }
}

/// Only a validation rejection is permanent. 5xx, timeouts, rate limiting
/// and auth failures (an expired token gets refreshed by the host) may clear
/// up without changing the request.
fn status_is_retryable(status: StatusCode) -> bool {
  status.is_server_error()
    || status == StatusCode::REQUEST_TIMEOUT
    || status == StatusCode::TOO_MANY_REQUESTS
    || status == StatusCode::UNAUTHORIZED
    || status == StatusCode::FORBIDDEN
}

/// A request that could not even be built will fail the same way again;
/// anything that went wrong on the wire may not.
fn transport_is_retryable(e: &reqwest::Error) -> bool {
  !e.is_builder()
}

/// Build a readable message from a failed response, preferring the remote's
/// own error text.
async fn failure_message(response: reqwest::Response) -> String {
  let status = response.status();
  let body = response.text().await.unwrap_or_default();
  let detail = serde_json::from_str::<ApiErrorBody>(&body)
    .ok()
    .and_then(|b| b.message)
    .unwrap_or(body);
  if detail.is_empty() {
    status.to_string()
  } else {
    format!("{}: {}", status, detail)
  }
}

#[async_trait]
impl ContentSource for HttpRemote {
  async fn fetch_content(
    &self,
    kind: ContentKind,
    params: &FetchParams,
  ) -> std::result::Result<Vec<ContentItem>, RemoteError> {
    let url = self.endpoint(&format!("content/{}", kind))?;
    tracing::debug!(%url, "fetching content");

    let response = self
      .authorized(self.client.get(url).query(params))
      .send()
      .await
      .map_err(|e| RemoteError {
        message: format!("failed to fetch {}: {}", kind, e),
        retryable: transport_is_retryable(&e),
      })?;

    let status = response.status();
    if !status.is_success() {
      let message = failure_message(response).await;
      return Err(RemoteError {
        message: format!("failed to fetch {}: {}", kind, message),
        retryable: status_is_retryable(status),
      });
    }

    let body: ApiContentResponse = response
      .json()
      .await
      .map_err(|e| RemoteError::permanent(format!("failed to parse {}: {}", kind, e)))?;

    body
      .into_items(kind)
      .map_err(|e| RemoteError::permanent(format!("failed to parse {}: {}", kind, e)))
  }
}

#[async_trait]
impl ActionApplier for HttpRemote {
  async fn apply_action(&self, action: &PendingAction) -> std::result::Result<Ack, ApplyError> {
    let url = self
      .endpoint("actions")
      .map_err(|e| ApplyError::Permanent(e.message))?;

    let response = self
      .authorized(self.client.post(url))
      .json(&ApiActionRequest::from(action))
      .send()
      .await
      .map_err(|e| {
        let message = format!("failed to send action {}: {}", action.id, e);
        if transport_is_retryable(&e) {
          ApplyError::Retryable(message)
        } else {
          ApplyError::Permanent(message)
        }
      })?;

    let status = response.status();
    if !status.is_success() {
      let message = format!("action {} rejected: {}", action.id, failure_message(response).await);
      return Err(if status_is_retryable(status) {
        ApplyError::Retryable(message)
      } else {
        ApplyError::Permanent(message)
      });
    }

    // The action is accepted at this point; an unreadable ack must not cause
    // a replay.
    let body = response.bytes().await.unwrap_or_default();
    if body.is_empty() {
      return Ok(Ack::default());
    }
    Ok(serde_json::from_slice(&body).unwrap_or_else(|e| {
      tracing::warn!(action_id = %action.id, error = %e, "unreadable ack body");
      Ack::default()
    }))
  }
}

#[async_trait]
impl Reachability for HttpRemote {
  async fn is_reachable(&self) -> bool {
    let Ok(url) = self.endpoint("health") else {
      return false;
    };
    match self.authorized(self.client.get(url)).send().await {
      Ok(response) => !response.status().is_server_error(),
      Err(e) => {
        tracing::debug!(error = %e, "health check failed");
        false
      }
    }
  }
}
