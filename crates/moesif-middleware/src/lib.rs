//! # moesif-middleware
//!
//! API monitoring middleware for tower-based HTTP servers.
//!
//! Each request passing through [`MoesifLayer`] is captured together with
//! its response, checked against governance rules fetched from the Moesif
//! collector, sampled, and queued for batched delivery. Delivery runs on
//! background tasks and never delays the response.
//!
//! ## Example
//!
//! ```ignore
//! use moesif_middleware::{MoesifConfig, MoesifMiddleware};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let moesif = MoesifMiddleware::new(MoesifConfig::from_env()?)?;
//!     let service = tower::ServiceBuilder::new()
//!         .layer(moesif.layer())
//!         .service(app);
//!
//!     // serve `service` ...
//!
//!     moesif.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod app_config;
pub mod body;
pub mod capture;
pub mod client_ip;
pub mod config;
pub mod config_cache;
pub mod error;
pub mod event;
pub mod governance;
pub mod hooks;
pub mod identity;
pub mod layer;
pub mod mapper;
pub mod middleware;
pub mod pipeline;
pub mod profiles;
pub mod regex_config;
pub mod sampling;

#[cfg(test)]
mod test_support;

pub use api::{CollectorApi, HttpCollectorApi};
pub use app_config::AppConfig;
pub use capture::{CapturedExchange, CapturedRequest, CapturedResponse, ReplayBody, TRANSACTION_ID_HEADER};
pub use config::MoesifConfig;
pub use config_cache::{ConfigSnapshot, ConfigState};
pub use error::{ApiError, BoxError, GovernanceError, HookError, HookResult, MoesifError, Result};
pub use event::{Direction, Event, EventRequest, EventResponse};
pub use governance::{GovernanceOutcome, GovernanceRule, GovernanceRules};
pub use hooks::{MoesifHooks, NoopHooks};
pub use layer::{MoesifLayer, MoesifService};
pub use mapper::Identity;
pub use middleware::MoesifMiddleware;
pub use pipeline::PipelineStats;
pub use profiles::{CompanyProfile, UserProfile};
