use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::{BoxFuture, FutureExt};
use reqwest::{
    header::{self, HeaderMap, HeaderName, HeaderValue, IntoHeaderName},
    Method, Url,
};
use serde::de::DeserializeOwned;

use crate::{
    endpoint::{Endpoint, PlainRequest},
    policy::{Backoff, RetryOverride, RetryPolicy},
    response::{response_json_limited, Response},
    timeout::AttemptTimeout,
    transport::{
        resolve_reference, HeaderTransport, Injector, Layer, NetworkTransport, Request,
        RetryTransport, Transport,
    },
    CallContext, ClientOptions, Error, Result,
};

/// HTTP client running every call through a retrying transport chain.
///
/// Cloning is cheap; clones share the chain and its connection pool.
///
/// ```
/// use resilient_http::{Client, ClientOptions};
///
/// let client = Client::new(ClientOptions::plain().with_base_url("http://api.local/"))
///     .expect("valid options");
/// let shared = client.clone();
/// assert_eq!(shared.base_url(), client.base_url());
/// ```
#[derive(Clone)]
pub struct Client {
    chain: Arc<dyn Transport>,
    base_url: Option<Url>,
    timeout: Option<Duration>,
    response_error_limit: usize,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.base_url.as_ref().map(Url::as_str))
            .field("timeout", &self.timeout)
            .field("response_error_limit", &self.response_error_limit)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Builds a client from options alone.
    pub fn new(options: ClientOptions) -> Result<Self> {
        Self::builder(options).build()
    }

    /// Builds a client from default options and `RESILIENT_HTTP_*` variables.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use resilient_http::Client;
    ///
    /// let client = Client::from_env().expect("missing RESILIENT_HTTP_BASE_URL");
    /// ```
    pub fn from_env() -> Result<Self> {
        Self::new(ClientOptions::default())
    }

    pub fn builder(options: ClientOptions) -> ClientBuilder {
        ClientBuilder::new(options)
    }

    pub fn base_url(&self) -> Option<&Url> {
        self.base_url.as_ref()
    }

    /// Sends `endpoint` and hands the response to `handler`.
    ///
    /// The endpoint is validated before any I/O. Whatever the handler leaves
    /// unread is drained up to the response error limit once it returns, on
    /// success and failure alike. The drain stops at the call deadline or on
    /// cancellation; the handler's outcome is returned either way.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use futures_util::FutureExt;
    /// use resilient_http::{unexpected_response, CallContext, Client, PlainRequest};
    ///
    /// # async fn run(client: Client) -> resilient_http::Result<()> {
    /// let status = client
    ///     .send_with(&CallContext::new(), &PlainRequest::get("/health"), |response| {
    ///         async move {
    ///             unexpected_response(response).await?;
    ///             Ok(response.status())
    ///         }
    ///         .boxed()
    ///     })
    ///     .await?;
    /// # let _ = status;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn send_with<E, F, T>(&self, ctx: &CallContext, endpoint: &E, handler: F) -> Result<T>
    where
        E: Endpoint + ?Sized,
        F: for<'r> FnOnce(&'r mut Response) -> BoxFuture<'r, Result<T>>,
    {
        endpoint.validate().map_err(Error::Validation)?;
        let request = self.build_request(endpoint)?;

        let ctx = self.call_context(ctx);
        let mut response = ctx.run(self.chain.round_trip(&ctx, request)).await??;
        let outcome = ctx.run(handler(&mut response)).await;
        let rest = std::mem::take(response.body_mut());
        if ctx.run(rest.drain(Some(self.response_error_limit))).await.is_err() {
            tracing::debug!("response body left undrained at call deadline");
        }
        Ok(outcome??)
    }

    /// Sends `endpoint` and decodes a JSON response.
    ///
    /// Non-2xx statuses fail with [`Error::UnexpectedResponse`] carrying at
    /// most the configured response error limit of the body; no-content
    /// responses yield `None`.
    pub async fn send_json<E, T>(&self, ctx: &CallContext, endpoint: &E) -> Result<Option<T>>
    where
        E: Endpoint + ?Sized,
        T: DeserializeOwned + Send + 'static,
    {
        let limit = self.response_error_limit;
        self.send_with(ctx, endpoint, move |response| {
            response_json_limited::<T>(response, limit).boxed()
        })
        .await
    }

    /// Sends a method, path and optional body without defining an endpoint type.
    pub async fn request<F, T>(
        &self,
        ctx: &CallContext,
        method: Method,
        path: &str,
        body: Option<Bytes>,
        handler: F,
    ) -> Result<T>
    where
        F: for<'r> FnOnce(&'r mut Response) -> BoxFuture<'r, Result<T>>,
    {
        let mut endpoint = PlainRequest::new(method, path);
        if let Some(body) = body {
            endpoint = endpoint.body(body);
        }
        self.send_with(ctx, &endpoint, handler).await
    }

    /// Runs a prebuilt request through the chain and returns the raw response.
    ///
    /// A relative URI is resolved against the base URL. The caller owns the
    /// response body.
    pub async fn execute(&self, ctx: &CallContext, request: Request) -> Result<Response> {
        let ctx = self.call_context(ctx);
        ctx.run(self.chain.round_trip(&ctx, request)).await?
    }

    fn call_context(&self, ctx: &CallContext) -> CallContext {
        match self.timeout {
            Some(timeout) => ctx.clone().with_timeout(timeout),
            None => ctx.clone(),
        }
    }

    fn build_request<E: Endpoint + ?Sized>(&self, endpoint: &E) -> Result<Request> {
        let url = self.target_url(&endpoint.path(), endpoint.query())?;
        let uri = url
            .as_str()
            .parse::<http::Uri>()
            .map_err(|err| Error::CreateRequest(format!("invalid uri {url}: {err}")))?;

        let mut request = http::Request::builder()
            .method(endpoint.method())
            .uri(uri)
            .body(Bytes::new())
            .map_err(|err| Error::CreateRequest(err.to_string()))?;
        if let Some(headers) = endpoint.headers() {
            *request.headers_mut() = headers;
        }

        if let Some(raw) = endpoint.body() {
            *request.body_mut() = raw;
        } else if let Some(json) = endpoint.json_body() {
            *request.body_mut() = json.into_bytes().map_err(Error::Marshal)?;
            if !request.headers().contains_key(header::CONTENT_TYPE) {
                request.headers_mut().insert(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("application/json"),
                );
            }
        }

        Ok(request)
    }

    fn target_url(&self, path: &str, query: Option<Vec<(String, String)>>) -> Result<Url> {
        let mut url = match Url::parse(path) {
            Ok(absolute) if absolute.has_host() => absolute,
            _ => match &self.base_url {
                Some(base) => resolve_reference(base, path)?,
                None => {
                    return Err(Error::CreateRequest(format!(
                        "relative path {path:?} without a base url"
                    )))
                }
            },
        };

        if let Some(mut pairs) = query.filter(|pairs| !pairs.is_empty()) {
            pairs.sort_by(|a, b| a.0.cmp(&b.0));
            url.query_pairs_mut().clear().extend_pairs(pairs);
        }
        Ok(url)
    }
}

/// Validating constructor for [`Client`].
pub struct ClientBuilder {
    options: ClientOptions,
    headers: HeaderMap,
    retry: RetryOverride,
    inject: Option<Injector>,
    base_transport: Option<Arc<dyn Transport>>,
    http: Option<reqwest::Client>,
    layers: Vec<Box<dyn Layer>>,
}

impl fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("base_url", &self.options.base_url)
            .field("headers", &"<redacted>")
            .field("retry", &self.retry)
            .field("layers", &self.layers.len())
            .finish_non_exhaustive()
    }
}

impl ClientBuilder {
    pub fn new(options: ClientOptions) -> Self {
        Self {
            options,
            headers: HeaderMap::new(),
            retry: RetryOverride::default(),
            inject: None,
            base_transport: None,
            http: None,
            layers: Vec::new(),
        }
    }

    /// Adds a default header; replaces the same name from [`ClientOptions::headers`].
    pub fn default_header<K: IntoHeaderName>(mut self, name: K, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Status code rules used when a call carries no [`RetryOverride`].
    pub fn retry_defaults(mut self, retry: RetryOverride) -> Self {
        self.retry = retry;
        self
    }

    pub fn inject<F>(mut self, inject: F) -> Self
    where
        F: Fn(&CallContext, &mut Request) + Send + Sync + 'static,
    {
        self.inject = Some(Arc::new(inject));
        self
    }

    /// Replaces the network transport. Options that only configure `reqwest`
    /// (proxy, TLS, pool size) are then ignored.
    pub fn base_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.base_transport = Some(transport);
        self
    }

    /// Uses a preconfigured `reqwest` client for the network transport.
    pub fn http_client(mut self, http: reqwest::Client) -> Self {
        self.http = Some(http);
        self
    }

    /// Wraps the composed chain. The last registered layer runs first.
    pub fn layer(mut self, layer: impl Layer + 'static) -> Self {
        self.layers.push(Box::new(layer));
        self
    }

    pub fn build(self) -> Result<Client> {
        let Self {
            mut options,
            headers,
            retry,
            inject,
            base_transport,
            http,
            layers,
        } = self;

        options.apply_env();
        let base_url = validate(&options)?;
        let defaults = default_headers(&options, headers)?;

        let mut chain: Arc<dyn Transport> = match base_transport {
            Some(transport) => transport,
            None => {
                let http = match http {
                    Some(http) => http,
                    None => build_http(&options)?,
                };
                Arc::new(NetworkTransport::new(http))
            }
        };

        let attempt_timeout = options.attempt_timeout();
        if let Some(timeout) = attempt_timeout {
            chain = Arc::new(AttemptTimeout::new(chain, timeout));
        }
        if !options.disable_retry {
            let mut policy = RetryPolicy::new(retry, options.retry_log, options.response_error_limit);
            if let Some(timeout) = attempt_timeout {
                policy = policy.with_attempt_timeout(timeout);
            }
            chain = Arc::new(RetryTransport::new(
                chain,
                policy,
                Backoff::new(options.retry_wait_min(), options.retry_wait_max()),
                options.max_retries,
            ));
        }
        chain = Arc::new(HeaderTransport::new(chain, base_url.clone(), defaults, inject));
        for layer in &layers {
            chain = layer.wrap(chain)?;
        }

        Ok(Client {
            chain,
            base_url,
            timeout: options.timeout(),
            response_error_limit: options.response_error_limit,
        })
    }
}

fn validate(options: &ClientOptions) -> Result<Option<Url>> {
    let base_url = match options.base_url.as_deref().map(str::trim) {
        Some(raw) if !raw.is_empty() => Some(
            Url::parse(raw).map_err(|err| Error::Config(format!("invalid base url {raw:?}: {err}")))?,
        ),
        _ if options.disable_base_url_check => None,
        _ => return Err(Error::Config("base url is required".to_owned())),
    };

    if let Some(proxy) = &options.proxy {
        Url::parse(proxy).map_err(|err| Error::Config(format!("invalid proxy {proxy:?}: {err}")))?;
    }
    if options.retry_wait_min_ms > options.retry_wait_max_ms {
        return Err(Error::Config(format!(
            "retry_wait_min_ms ({}) exceeds retry_wait_max_ms ({})",
            options.retry_wait_min_ms, options.retry_wait_max_ms
        )));
    }
    if options.response_error_limit == 0 {
        return Err(Error::Config(
            "response_error_limit must be greater than zero".to_owned(),
        ));
    }

    Ok(base_url)
}

fn default_headers(options: &ClientOptions, extra: HeaderMap) -> Result<HeaderMap> {
    let mut headers = HeaderMap::with_capacity(options.headers.len() + extra.len());
    for (name, value) in &options.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|err| Error::Config(format!("invalid header name {name:?}: {err}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|err| Error::Config(format!("invalid value for header {name}: {err}")))?;
        headers.insert(name, value);
    }
    for name in extra.keys() {
        headers.remove(name);
        for value in extra.get_all(name) {
            headers.append(name.clone(), value.clone());
        }
    }
    Ok(headers)
}

fn build_http(options: &ClientOptions) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder().pool_max_idle_per_host(options.max_idle_connections);
    if let Some(proxy) = &options.proxy {
        let proxy = reqwest::Proxy::all(proxy)
            .map_err(|err| Error::Config(format!("invalid proxy {proxy:?}: {err}")))?;
        builder = builder.proxy(proxy);
    }
    if options.insecure_skip_verify {
        builder = builder.danger_accept_invalid_certs(true);
    }
    if options.http2 {
        builder = builder.http2_prior_knowledge();
    }
    if let Some(tls) = &options.tls {
        builder = tls.apply(builder)?;
    }
    builder
        .build()
        .map_err(|err| Error::Config(format!("cannot build http client: {err}")))
}
