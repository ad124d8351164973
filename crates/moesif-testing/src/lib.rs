//! Testing utilities for the Moesif middleware
//!
//! [`MockCollector`] is a local HTTP server standing in for the Moesif
//! collection service. It answers scripted responses for `/config`,
//! `/governance-rules` and the ingestion endpoints, and records every call
//! so tests can inspect the event batches the middleware delivered.

pub mod expectation;
pub mod matcher;
pub mod server;

pub use expectation::{Expectation, MockResponse, Times};
pub use matcher::RequestMatcher;
pub use server::{ExpectationBuilder, MockCollector, RecordedRequest};
