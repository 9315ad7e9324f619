//! `resilient-http` is an async HTTP client that retries transient failures.
//!
//! Every call runs through a transport chain:
//! - [`HeaderTransport`] resolves relative URIs and merges headers
//! - [`RetryTransport`] repeats attempts as decided by [`RetryPolicy`]
//! - [`AttemptTimeout`] bounds each attempt
//! - [`NetworkTransport`] executes the request with `reqwest`
//!
//! Requests are described with the [`Endpoint`] trait and sent with
//! [`Client::send_with`] or [`Client::send_json`]. Per-call cancellation,
//! deadlines, retry rules and headers travel in a [`CallContext`].
//!
//! ```no_run
//! use resilient_http::{CallContext, Client, ClientOptions, PlainRequest};
//!
//! # async fn run() -> resilient_http::Result<()> {
//! let client = Client::new(ClientOptions::default().with_base_url("https://api.example.com/"))?;
//! let item: Option<serde_json::Value> = client
//!     .send_json(&CallContext::new(), &PlainRequest::get("items/1"))
//!     .await?;
//! # let _ = item;
//! # Ok(())
//! # }
//! ```

mod body;
mod cancel;
mod client;
mod context;
mod endpoint;
mod error;
mod options;
mod policy;
mod response;
mod timeout;
mod tls;
mod transport;

pub mod mock;

pub use body::Body;
pub use cancel::CancellationToken;
pub use client::{Client, ClientBuilder};
pub use context::CallContext;
pub use endpoint::{Endpoint, JsonBody, PlainRequest};
pub use error::{BoxError, ContextError, Error, ResponseError};
pub use options::{
    ClientOptions, ENV_BASE_URL, ENV_BASE_URL_GLOBAL, ENV_INSECURE_SKIP_VERIFY,
    ENV_RETRY_DISABLE, ENV_TIMEOUT_MS,
};
pub use policy::{is_retryable_error, is_retryable_status, Backoff, RetryOverride, RetryPolicy, Verdict};
pub use response::{
    error_response, limited_response, response_json, response_json_limited, unexpected_response,
    unexpected_response_limited, Response, DEFAULT_RESPONSE_ERR_LIMIT,
};
pub use timeout::AttemptTimeout;
pub use tls::TlsOptions;
pub use transport::{
    clone_request, resolve_reference, HeaderTransport, Injector, Layer, NetworkTransport,
    Request, RetryTransport, Transport,
};

pub type Result<T> = std::result::Result<T, Error>;
