//! Transport chain.
//!
//! Each stage implements [`Transport`] and wraps the next one. The client
//! composes them as
//!
//! ```text
//! layers (last registered outermost)
//!   -> HeaderTransport (base URL, context headers, injector, defaults)
//!     -> RetryTransport
//!       -> AttemptTimeout (optional)
//!         -> NetworkTransport (reqwest)
//! ```

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use reqwest::{header::HeaderMap, Url};

use crate::{
    policy::{Backoff, RetryPolicy, Verdict},
    response::Response,
    Body, CallContext, Error, Result,
};

/// Request type flowing through the transport chain. The URI may be relative
/// until the base URL stage resolves it.
pub type Request = http::Request<Bytes>;

/// Callback that adds computed headers (for example trace propagation) after
/// all other header stages.
pub type Injector = Arc<dyn Fn(&CallContext, &mut Request) + Send + Sync>;

pub trait Transport: Send + Sync {
    fn round_trip<'a>(
        &'a self,
        ctx: &'a CallContext,
        request: Request,
    ) -> BoxFuture<'a, Result<Response>>;
}

/// Wraps a composed chain in an extra stage.
pub trait Layer: Send + Sync {
    fn wrap(&self, inner: Arc<dyn Transport>) -> Result<Arc<dyn Transport>>;
}

impl<F> Layer for F
where
    F: Fn(Arc<dyn Transport>) -> Result<Arc<dyn Transport>> + Send + Sync,
{
    fn wrap(&self, inner: Arc<dyn Transport>) -> Result<Arc<dyn Transport>> {
        self(inner)
    }
}

/// Shallow copy of method, URI and version with a deep copy of the headers.
pub fn clone_request(request: &Request) -> Request {
    let mut cloned = http::Request::new(request.body().clone());
    *cloned.method_mut() = request.method().clone();
    *cloned.uri_mut() = request.uri().clone();
    *cloned.version_mut() = request.version();
    *cloned.headers_mut() = request.headers().clone();
    cloned
}

/// Resolves `reference` against `base` following URL reference resolution.
pub fn resolve_reference(base: &Url, reference: &str) -> Result<Url> {
    base.join(reference)
        .map_err(|err| Error::CreateRequest(format!("cannot resolve {reference:?}: {err}")))
}

/// Base URL resolution and header injection.
pub struct HeaderTransport {
    inner: Arc<dyn Transport>,
    base_url: Option<Url>,
    defaults: HeaderMap,
    inject: Option<Injector>,
}

impl fmt::Debug for HeaderTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // values may carry credentials
        let names: Vec<_> = self.defaults.keys().map(|name| name.as_str()).collect();
        f.debug_struct("HeaderTransport")
            .field("base_url", &self.base_url.as_ref().map(Url::as_str))
            .field("default_headers", &names)
            .field("inject", &self.inject.is_some())
            .finish()
    }
}

impl HeaderTransport {
    pub fn new(
        inner: Arc<dyn Transport>,
        base_url: Option<Url>,
        defaults: HeaderMap,
        inject: Option<Injector>,
    ) -> Self {
        Self {
            inner,
            base_url,
            defaults,
            inject,
        }
    }

    /// Applies, in order: base URL, context headers (override), injector,
    /// client defaults (only for absent names).
    pub fn prepare(&self, ctx: &CallContext, request: &Request) -> Result<Request> {
        let mut prepared = clone_request(request);

        if let Some(base) = &self.base_url {
            if prepared.uri().scheme().is_none() {
                let resolved = resolve_reference(base, &prepared.uri().to_string())?;
                *prepared.uri_mut() = resolved
                    .as_str()
                    .parse::<http::Uri>()
                    .map_err(|err| Error::CreateRequest(format!("invalid uri {resolved}: {err}")))?;
            }
        }

        if let Some(headers) = ctx.headers() {
            for name in headers.keys() {
                prepared.headers_mut().remove(name);
                for value in headers.get_all(name) {
                    prepared.headers_mut().append(name.clone(), value.clone());
                }
            }
        }

        if let Some(inject) = &self.inject {
            inject(ctx, &mut prepared);
        }

        for name in self.defaults.keys() {
            if prepared.headers().contains_key(name) {
                continue;
            }
            for value in self.defaults.get_all(name) {
                prepared.headers_mut().append(name.clone(), value.clone());
            }
        }

        Ok(prepared)
    }
}

impl Transport for HeaderTransport {
    fn round_trip<'a>(
        &'a self,
        ctx: &'a CallContext,
        request: Request,
    ) -> BoxFuture<'a, Result<Response>> {
        Box::pin(async move {
            let prepared = self.prepare(ctx, &request)?;
            self.inner.round_trip(ctx, prepared).await
        })
    }
}

/// Repeats attempts according to a [`RetryPolicy`].
///
/// Attempts run strictly one after another; each gets a fresh clone of the
/// original request.
pub struct RetryTransport {
    inner: Arc<dyn Transport>,
    policy: RetryPolicy,
    backoff: Backoff,
    max_retries: usize,
}

impl RetryTransport {
    pub fn new(
        inner: Arc<dyn Transport>,
        policy: RetryPolicy,
        backoff: Backoff,
        max_retries: usize,
    ) -> Self {
        Self {
            inner,
            policy,
            backoff,
            max_retries,
        }
    }
}

impl Transport for RetryTransport {
    fn round_trip<'a>(
        &'a self,
        ctx: &'a CallContext,
        request: Request,
    ) -> BoxFuture<'a, Result<Response>> {
        Box::pin(async move {
            let mut attempt = 0usize;
            loop {
                let outcome = self.inner.round_trip(ctx, clone_request(&request)).await;
                let (error, retry_after) = match self.policy.check(ctx, outcome).await {
                    Verdict::Finish(result) => return result,
                    Verdict::Retry { error, retry_after } => (error, retry_after),
                };

                if attempt >= self.max_retries {
                    return Err(Error::RetryExhausted {
                        attempts: attempt + 1,
                        source: Box::new(error),
                    });
                }

                let delay = self.backoff.delay(attempt, retry_after);
                tracing::debug!(
                    attempt = attempt + 1,
                    "retrying {} {} after {} ms",
                    request.method(),
                    request.uri(),
                    delay.as_millis()
                );
                ctx.sleep(delay).await?;
                attempt += 1;
            }
        })
    }
}

/// Terminal stage executing requests with `reqwest`.
#[derive(Clone, Debug, Default)]
pub struct NetworkTransport {
    http: reqwest::Client,
}

impl NetworkTransport {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

impl Transport for NetworkTransport {
    fn round_trip<'a>(
        &'a self,
        ctx: &'a CallContext,
        request: Request,
    ) -> BoxFuture<'a, Result<Response>> {
        Box::pin(async move {
            if request.uri().scheme().is_none() {
                return Err(Error::CreateRequest(format!(
                    "relative uri {} without a base url",
                    request.uri()
                )));
            }
            let request = reqwest::Request::try_from(request)
                .map_err(|err| Error::CreateRequest(err.to_string()))?;
            let response = ctx
                .run(self.http.execute(request))
                .await?
                .map_err(Error::Transport)?;
            Ok(into_response(response, ctx))
        })
    }
}

fn into_response(response: reqwest::Response, ctx: &CallContext) -> Response {
    let status = response.status();
    let version = response.version();
    let headers = response.headers().clone();
    let body = Body::from_stream(response.bytes_stream())
        .with_cancellation(ctx.cancellation_token().clone());

    let mut converted = Response::new(body);
    *converted.status_mut() = status;
    *converted.version_mut() = version;
    *converted.headers_mut() = headers;
    converted
}
