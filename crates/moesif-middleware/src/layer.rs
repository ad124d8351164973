//! Tower integration.

use crate::capture::ReplayBody;
use crate::error::BoxError;
use crate::middleware::Inner;
use bytes::Bytes;
use http::{Request, Response};
use http_body::Body;
use http_body_util::Full;
use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};

/// Layer produced by [`MoesifMiddleware::layer`](crate::MoesifMiddleware::layer).
///
/// Every service it wraps shares the same event pipeline and config cache.
#[derive(Clone)]
pub struct MoesifLayer {
    moesif: Arc<Inner>,
}

impl MoesifLayer {
    pub(crate) fn new(moesif: Arc<Inner>) -> Self {
        Self { moesif }
    }
}

impl<S> Layer<S> for MoesifLayer {
    type Service = MoesifService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MoesifService {
            inner,
            moesif: self.moesif.clone(),
        }
    }
}

/// Service wrapper that captures each exchange and applies governance.
///
/// Request and response bodies are buffered so they can be recorded, so the
/// wrapped service sees a `Full<Bytes>` request and the caller receives a
/// [`ReplayBody`] that fails wherever the service's own body failed.
#[derive(Clone)]
pub struct MoesifService<S> {
    inner: S,
    moesif: Arc<Inner>,
}

impl<S, ReqB, ResB> Service<Request<ReqB>> for MoesifService<S>
where
    S: Service<Request<Full<Bytes>>, Response = Response<ResB>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    ReqB: Body + Send + 'static,
    ReqB::Data: Send,
    ReqB::Error: Display,
    ResB: Body + Send + 'static,
    ResB::Data: Send,
    ResB::Error: Into<BoxError>,
{
    type Response = Response<ReplayBody>;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqB>) -> Self::Future {
        // The readied service goes into the future; a fresh clone stays behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let moesif = self.moesif.clone();

        Box::pin(async move { moesif.handle(req, &mut inner).await })
    }
}
