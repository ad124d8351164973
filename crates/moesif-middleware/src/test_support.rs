use crate::api::{ApiResult, BatchResponse, CollectorApi, ConfigResponse};
use crate::error::ApiError;
use crate::event::Event;
use crate::profiles::{CompanyProfile, UserProfile};
use async_trait::async_trait;
use bytes::Bytes;
use http::StatusCode;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

/// In-memory collector that records every call.
///
/// `/config` answers `etag-<n>` for the n-th call.
pub(crate) struct RecordingApi {
    pub config_calls: AtomicU64,
    pub failing: AtomicBool,
    pub config_body: Mutex<Bytes>,
    pub rules_body: Mutex<Bytes>,
    pub batch_etag: Mutex<Option<String>>,
    pub batches: Mutex<Vec<Vec<Event>>>,
    pub users: Mutex<Vec<UserProfile>>,
    pub companies: Mutex<Vec<CompanyProfile>>,
}

impl Default for RecordingApi {
    fn default() -> Self {
        Self {
            config_calls: AtomicU64::new(0),
            failing: AtomicBool::new(false),
            config_body: Mutex::new(Bytes::from_static(b"{}")),
            rules_body: Mutex::new(Bytes::from_static(b"[]")),
            batch_etag: Mutex::new(None),
            batches: Mutex::new(Vec::new()),
            users: Mutex::new(Vec::new()),
            companies: Mutex::new(Vec::new()),
        }
    }
}

impl RecordingApi {
    pub fn with_config(self, body: &str) -> Self {
        *self.config_body.lock().unwrap() = Bytes::from(body.to_string());
        self
    }

    pub fn with_rules(self, body: &str) -> Self {
        *self.rules_body.lock().unwrap() = Bytes::from(body.to_string());
        self
    }

    pub fn config_calls(&self) -> u64 {
        self.config_calls.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> Vec<Event> {
        self.batches.lock().unwrap().iter().flatten().cloned().collect()
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches.lock().unwrap().iter().map(Vec::len).collect()
    }

    fn check(&self) -> ApiResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(ApiError::from_status(StatusCode::SERVICE_UNAVAILABLE, "down".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CollectorApi for RecordingApi {
    async fn get_config(&self) -> ApiResult<ConfigResponse> {
        let n = self.config_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.check()?;
        Ok(ConfigResponse {
            etag: Some(format!("etag-{n}")),
            body: self.config_body.lock().unwrap().clone(),
        })
    }

    async fn get_governance_rules(&self) -> ApiResult<Bytes> {
        self.check()?;
        Ok(self.rules_body.lock().unwrap().clone())
    }

    async fn send_events(&self, events: &[Event]) -> ApiResult<BatchResponse> {
        self.check()?;
        self.batches.lock().unwrap().push(events.to_vec());
        Ok(BatchResponse {
            config_etag: self.batch_etag.lock().unwrap().clone(),
        })
    }

    async fn update_user(&self, user: &UserProfile) -> ApiResult<()> {
        self.check()?;
        self.users.lock().unwrap().push(user.clone());
        Ok(())
    }

    async fn update_users_batch(&self, users: &[UserProfile]) -> ApiResult<()> {
        self.check()?;
        self.users.lock().unwrap().extend_from_slice(users);
        Ok(())
    }

    async fn update_company(&self, company: &CompanyProfile) -> ApiResult<()> {
        self.check()?;
        self.companies.lock().unwrap().push(company.clone());
        Ok(())
    }

    async fn update_companies_batch(&self, companies: &[CompanyProfile]) -> ApiResult<()> {
        self.check()?;
        self.companies.lock().unwrap().extend_from_slice(companies);
        Ok(())
    }
}
