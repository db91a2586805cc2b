//! REST adapter for [`NotificationSource`].
//!
//! Endpoints, relative to the configured base URL:
//!
//! - `GET notifications?limit&offset`
//! - `POST notifications/{id}/read`
//! - `POST notifications/read-all`
//! - `POST notifications/{id}/archive`
//! - `DELETE notifications/{id}`

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use super::{NotificationSource, SourceError};
use crate::models::{NotificationId, NotificationPage};

/// HTTP client for the notification endpoints.
#[derive(Clone, Debug)]
pub struct RestNotificationSource {
    http: Client,
    base: Url,
    token: Option<String>,
}

impl RestNotificationSource {
    /// Create a client rooted at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::InvalidUrl`] when `base_url` does not parse or
    /// cannot carry path segments.
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self, SourceError> {
        let base = Url::parse(base_url)?;
        if base.cannot_be_a_base() {
            return Err(SourceError::InvalidUrl(url::ParseError::RelativeUrlWithCannotBeABaseBase));
        }
        Ok(Self {
            http: Client::new(),
            base,
            token,
        })
    }

    /// Build the URL for `segments` under `notifications/`, escaping each.
    pub(crate) fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().push("notifications").extend(segments);
        }
        url
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn check(resp: Response) -> Result<Response, SourceError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let message = resp.text().await.unwrap_or_default();
        Err(SourceError::Server {
            status: status.as_u16(),
            message,
        })
    }

    async fn parse<R: DeserializeOwned>(resp: Response) -> Result<R, SourceError> {
        let resp = Self::check(resp).await?;
        resp.json::<R>()
            .await
            .map_err(|err| SourceError::Decode(format!("response body: {err}")))
    }

    async fn post(&self, segments: &[&str]) -> Result<(), SourceError> {
        let url = self.endpoint(segments);
        debug!(%url, "confirming notification mutation");
        let resp = self.authed(self.http.post(url)).send().await?;
        Self::check(resp).await.map(drop)
    }
}

#[async_trait]
impl NotificationSource for RestNotificationSource {
    async fn fetch_page(&self, limit: u32, offset: u32) -> Result<NotificationPage, SourceError> {
        let mut url = self.endpoint(&[]);
        url.query_pairs_mut()
            .append_pair("limit", &limit.to_string())
            .append_pair("offset", &offset.to_string());
        let resp = self.authed(self.http.get(url)).send().await?;
        Self::parse(resp).await
    }

    async fn mark_as_read(&self, id: &NotificationId) -> Result<(), SourceError> {
        self.post(&[id.as_str(), "read"]).await
    }

    async fn mark_all_as_read(&self) -> Result<(), SourceError> {
        self.post(&["read-all"]).await
    }

    async fn archive(&self, id: &NotificationId) -> Result<(), SourceError> {
        self.post(&[id.as_str(), "archive"]).await
    }

    async fn delete(&self, id: &NotificationId) -> Result<(), SourceError> {
        let url = self.endpoint(&[id.as_str()]);
        let resp = self.authed(self.http.delete(url)).send().await?;
        Self::check(resp).await.map(drop)
    }
}
