//! Client for the remote collection service.
//!
//! [`CollectorApi`] is the seam between the middleware and the network.
//! [`HttpCollectorApi`] talks to the real service with `reqwest`; tests plug
//! in their own implementation.

use crate::error::ApiError;
use crate::event::Event;
use crate::profiles::{CompanyProfile, UserProfile};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, RequestBuilder};
use serde::Serialize;
use std::time::Duration;

/// Header carrying the application id on every call.
pub const APPLICATION_ID_HEADER: &str = "X-Moesif-Application-Id";

/// Header carrying the config version.
pub const CONFIG_ETAG_HEADER: &str = "X-Moesif-Config-ETag";

/// `User-Agent` sent with every call.
pub const USER_AGENT: &str = concat!("moesif-middleware-rs/", env!("CARGO_PKG_VERSION"));

/// Result type for collector calls.
pub type ApiResult<T> = Result<T, ApiError>;

/// A fetched `/config` document.
#[derive(Debug, Clone, Default)]
pub struct ConfigResponse {
    pub etag: Option<String>,
    pub body: Bytes,
}

/// Acknowledgement of a delivered batch.
#[derive(Debug, Clone, Default)]
pub struct BatchResponse {
    /// Config version the service currently serves.
    pub config_etag: Option<String>,
}

/// Operations of the collection service.
#[async_trait]
pub trait CollectorApi: Send + Sync + 'static {
    /// `GET /config`
    async fn get_config(&self) -> ApiResult<ConfigResponse>;

    /// `GET /governance-rules`
    async fn get_governance_rules(&self) -> ApiResult<Bytes>;

    /// `POST /events/batch`
    async fn send_events(&self, events: &[Event]) -> ApiResult<BatchResponse>;

    /// `POST /users`
    async fn update_user(&self, user: &UserProfile) -> ApiResult<()>;

    /// `POST /users/batch`
    async fn update_users_batch(&self, users: &[UserProfile]) -> ApiResult<()>;

    /// `POST /companies`
    async fn update_company(&self, company: &CompanyProfile) -> ApiResult<()>;

    /// `POST /companies/batch`
    async fn update_companies_batch(&self, companies: &[CompanyProfile]) -> ApiResult<()>;
}

/// [`CollectorApi`] over HTTPS.
#[derive(Clone)]
pub struct HttpCollectorApi {
    client: Client,
    base_uri: String,
    application_id: String,
}

impl HttpCollectorApi {
    /// Create a client for `base_uri` (e.g. `https://api.moesif.net/v1`).
    pub fn new(application_id: impl Into<String>, base_uri: impl Into<String>) -> ApiResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            base_uri: base_uri.into().trim_end_matches('/').to_string(),
            application_id: application_id.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_uri, path)
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.client
            .get(self.url(path))
            .header(APPLICATION_ID_HEADER, &self.application_id)
    }

    fn post<T: Serialize + ?Sized>(&self, path: &str, payload: &T) -> RequestBuilder {
        self.client
            .post(self.url(path))
            .header(APPLICATION_ID_HEADER, &self.application_id)
            .json(payload)
    }

    /// Send a request, turning non-success statuses into errors.
    async fn execute(&self, request: RequestBuilder, what: &'static str) -> ApiResult<reqwest::Response> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let err = ApiError::from_status(status, truncate(body, 512));
        if err.is_unauthorized() {
            tracing::warn!(%status, call = what, "Unauthorized access, please check your Moesif Application Id");
        }
        Err(err)
    }
}

impl std::fmt::Debug for HttpCollectorApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpCollectorApi")
            .field("base_uri", &self.base_uri)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl CollectorApi for HttpCollectorApi {
    async fn get_config(&self) -> ApiResult<ConfigResponse> {
        let response = self.execute(self.get("/config"), "get_config").await?;
        let etag = config_etag(response.headers());
        let body = response.bytes().await?;
        Ok(ConfigResponse { etag, body })
    }

    async fn get_governance_rules(&self) -> ApiResult<Bytes> {
        let response = self
            .execute(self.get("/governance-rules"), "get_governance_rules")
            .await?;
        Ok(response.bytes().await?)
    }

    async fn send_events(&self, events: &[Event]) -> ApiResult<BatchResponse> {
        let response = self
            .execute(self.post("/events/batch", events), "send_events")
            .await?;
        Ok(BatchResponse {
            config_etag: config_etag(response.headers()),
        })
    }

    async fn update_user(&self, user: &UserProfile) -> ApiResult<()> {
        self.execute(self.post("/users", user), "update_user").await?;
        Ok(())
    }

    async fn update_users_batch(&self, users: &[UserProfile]) -> ApiResult<()> {
        self.execute(self.post("/users/batch", users), "update_users_batch")
            .await?;
        Ok(())
    }

    async fn update_company(&self, company: &CompanyProfile) -> ApiResult<()> {
        self.execute(self.post("/companies", company), "update_company")
            .await?;
        Ok(())
    }

    async fn update_companies_batch(&self, companies: &[CompanyProfile]) -> ApiResult<()> {
        self.execute(self.post("/companies/batch", companies), "update_companies_batch")
            .await?;
        Ok(())
    }
}

fn config_etag(headers: &reqwest::header::HeaderMap) -> Option<String> {
    headers
        .get(CONFIG_ETAG_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

fn truncate(mut text: String, max: usize) -> String {
    if text.len() > max {
        let mut cut = max;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
    }
    text
}
