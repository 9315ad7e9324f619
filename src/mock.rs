//! In-process transport for tests.
//!
//! [`MockTransport`] answers every request with a swappable handler. Install
//! it as the base transport so the full chain (headers, retries, timeouts)
//! runs without a network.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use resilient_http::{mock::MockTransport, Client, ClientOptions};
//!
//! let mock = Arc::new(MockTransport::new());
//! let client = Client::builder(ClientOptions::plain().with_base_url("http://api.local"))
//!     .base_transport(mock.clone())
//!     .build()
//!     .expect("client must build");
//! mock.set_handler(|_req| Ok(MockTransport::text(200, "ok")));
//! # let _ = client;
//! ```

use std::fmt;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, PoisonError, RwLock,
};

use futures_util::future::BoxFuture;
use reqwest::StatusCode;

use crate::{
    response::Response,
    transport::{Request, Transport},
    Body, CallContext, Result,
};

type Handler = Arc<dyn Fn(&Request) -> Result<Response> + Send + Sync>;

pub struct MockTransport {
    handler: RwLock<Handler>,
    hits: AtomicUsize,
}

impl fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockTransport")
            .field("hits", &self.hits())
            .finish()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// Creates a transport answering `200` with a fixed JSON message.
    pub fn new() -> Self {
        Self {
            handler: RwLock::new(Arc::new(|_: &Request| {
                Ok(Self::text(200, r#"{"message": "using default mock handler"}"#))
            })),
            hits: AtomicUsize::new(0),
        }
    }

    /// Replaces the handler. Requests already running keep the old one.
    pub fn set_handler<F>(&self, handler: F)
    where
        F: Fn(&Request) -> Result<Response> + Send + Sync + 'static,
    {
        let mut slot = self.handler.write().unwrap_or_else(PoisonError::into_inner);
        *slot = Arc::new(handler);
    }

    /// Number of requests seen since construction.
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    /// Response with the given status and text body.
    pub fn text(status: u16, body: impl Into<Body>) -> Response {
        let mut response = Response::new(body.into());
        *response.status_mut() =
            StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        response
    }
}

impl Transport for MockTransport {
    fn round_trip<'a>(
        &'a self,
        _ctx: &'a CallContext,
        request: Request,
    ) -> BoxFuture<'a, Result<Response>> {
        self.hits.fetch_add(1, Ordering::SeqCst);
        let handler = self
            .handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        Box::pin(async move { handler(&request) })
    }
}
