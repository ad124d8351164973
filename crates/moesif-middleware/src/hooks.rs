//! User-supplied identity and metadata hooks.
//!
//! Every hook has a no-op default, so an implementation only overrides what
//! it needs:
//!
//! ```ignore
//! use moesif_middleware::{HookResult, MoesifHooks};
//!
//! struct TenantHooks;
//!
//! impl MoesifHooks for TenantHooks {
//!     fn identify_company(&self, req: &http::request::Parts) -> HookResult<Option<String>> {
//!         Ok(req.headers.get("x-tenant").and_then(|v| v.to_str().ok()).map(String::from))
//!     }
//! }
//! ```
//!
//! Hooks run on the request path. A hook that errors or panics is treated as
//! if it returned nothing; the request itself is never affected.

use crate::error::HookResult;
use crate::event::Event;
use http::request::Parts;
use serde_json::{Map, Value};
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Per-request extension points.
pub trait MoesifHooks: Send + Sync + 'static {
    /// Resolve the user id for a request.
    fn identify_user(&self, _req: &Parts) -> HookResult<Option<String>> {
        Ok(None)
    }

    /// Resolve the company id for a request.
    fn identify_company(&self, _req: &Parts) -> HookResult<Option<String>> {
        Ok(None)
    }

    /// Extra metadata attached to the event.
    fn get_metadata(&self, _req: &Parts) -> HookResult<Option<Map<String, Value>>> {
        Ok(None)
    }

    /// Session token attached to the event.
    fn get_session_token(&self, _req: &Parts) -> HookResult<Option<String>> {
        Ok(None)
    }

    /// Return `true` to keep this request out of telemetry.
    ///
    /// Governance still applies to skipped requests.
    fn skip(&self, _req: &Parts) -> HookResult<bool> {
        Ok(false)
    }

    /// Rewrite or redact an event before it is queued.
    fn mask_event(&self, event: Event) -> HookResult<Event> {
        Ok(event)
    }
}

/// Hooks that do nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

impl MoesifHooks for NoopHooks {}

/// Run a hook, turning an error or a panic into `None`.
///
/// Failures are logged at `warn` when `debug` is set, otherwise at `debug`.
pub(crate) fn isolate<T>(hook: &'static str, debug: bool, f: impl FnOnce() -> HookResult<T>) -> Option<T> {
    let failure = match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => return Some(value),
        Ok(Err(err)) => err.to_string(),
        Err(panic) => panic_message(panic.as_ref()),
    };

    if debug {
        tracing::warn!(hook, error = %failure, "Hook failed, ignoring its result");
    } else {
        tracing::debug!(hook, error = %failure, "Hook failed, ignoring its result");
    }
    None
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts() -> Parts {
        http::Request::builder()
            .uri("/users/42")
            .body(())
            .unwrap()
            .into_parts()
            .0
    }

    struct Failing;

    impl MoesifHooks for Failing {
        fn identify_user(&self, _req: &Parts) -> HookResult<Option<String>> {
            Err("no session".into())
        }

        fn identify_company(&self, _req: &Parts) -> HookResult<Option<String>> {
            panic!("company lookup exploded")
        }

        fn mask_event(&self, _event: Event) -> HookResult<Event> {
            Err("mask failed".into())
        }
    }

    #[test]
    fn noop_hooks_return_defaults() {
        let hooks = NoopHooks;
        let req = parts();
        assert_eq!(hooks.identify_user(&req).unwrap(), None);
        assert_eq!(hooks.get_session_token(&req).unwrap(), None);
        assert!(!hooks.skip(&req).unwrap());

        let event = Event::default();
        assert_eq!(hooks.mask_event(event.clone()).unwrap(), event);
    }

    #[test]
    fn hook_error_becomes_none() {
        let req = parts();
        let result = isolate("identify_user", true, || Failing.identify_user(&req));
        assert_eq!(result, None);
    }

    #[test]
    fn hook_panic_becomes_none() {
        let req = parts();
        let result = isolate("identify_company", false, || Failing.identify_company(&req));
        assert_eq!(result, None);
    }

    #[test]
    fn successful_hook_passes_through() {
        let req = parts();
        let result = isolate("identify_user", false, || {
            Ok(Some(req.uri.path().trim_start_matches("/users/").to_string()))
        });
        assert_eq!(result, Some(Some("42".to_string())));
    }
}
