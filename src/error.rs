use std::fmt;
use std::time::Duration;

/// Boxed error used for caller-provided failures (validation, handlers, body streams).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Error type returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The endpoint rejected itself before any I/O happened.
    #[error("request validation failed: {0}")]
    Validation(#[source] BoxError),
    /// JSON request body could not be encoded.
    #[error("failed to marshal request body: {0}")]
    Marshal(#[source] serde_json::Error),
    /// Method, URL or headers could not form a valid request.
    #[error("failed to create request: {0}")]
    CreateRequest(String),
    /// Network or request execution error from `reqwest`.
    #[error("transport error: {0}")]
    Transport(#[source] reqwest::Error),
    /// A single attempt exceeded the per-attempt timeout while the call was still live.
    #[error("attempt timed out after {timeout:?}")]
    AttemptTimeout { timeout: Duration },
    /// The call was cancelled or ran past its deadline.
    #[error(transparent)]
    Context(#[from] ContextError),
    /// Non-2xx status with a bounded body excerpt.
    #[error(transparent)]
    UnexpectedResponse(#[from] ResponseError),
    /// Status code listed as retryable by a [`RetryOverride`](crate::RetryOverride).
    #[error("force retried HTTP status {}: [{}]", .0.status, .0.body)]
    ForcedRetry(ResponseError),
    /// Every attempt failed; carries the last attempt's error.
    #[error("giving up after {attempts} attempt(s): {source}")]
    RetryExhausted {
        attempts: usize,
        #[source]
        source: Box<Error>,
    },
    /// Reading the response body failed.
    #[error("failed to read response body: {0}")]
    Body(#[source] BoxError),
    /// Response body was not valid JSON for the requested type.
    #[error("decode response body: {0}")]
    Decode(#[source] serde_json::Error),
    /// Error raised by a caller-supplied response handler.
    #[error("response handler failed: {0}")]
    Handler(#[source] BoxError),
    /// Invalid client configuration.
    #[error("invalid client configuration: {0}")]
    Config(String),
    /// TLS material could not be loaded.
    #[error("failed to load TLS material: {0}")]
    Tls(String),
}

impl Error {
    /// HTTP status carried by this error, looking through retry exhaustion.
    pub fn status(&self) -> Option<u16> {
        self.response_error().map(|err| err.status)
    }

    /// Value of the `X-Request-Id` response header, if the server sent one.
    pub fn request_id(&self) -> Option<&str> {
        self.response_error()
            .and_then(|err| err.request_id.as_deref())
    }

    /// Diagnostic body excerpt attached to a response error.
    pub fn body_excerpt(&self) -> Option<&str> {
        self.response_error().map(|err| err.body.as_str())
    }

    /// Whether the failure was a per-attempt timeout, a transport timeout or
    /// an exceeded call deadline.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::AttemptTimeout { .. } => true,
            Self::Context(ContextError::DeadlineExceeded) => true,
            Self::Transport(err) => err.is_timeout(),
            Self::RetryExhausted { source, .. } => source.is_timeout(),
            _ => false,
        }
    }

    /// Whether the call was cancelled by its caller.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Context(ContextError::Cancelled))
    }

    fn response_error(&self) -> Option<&ResponseError> {
        match self {
            Self::UnexpectedResponse(err) | Self::ForcedRetry(err) => Some(err),
            Self::RetryExhausted { source, .. } => source.response_error(),
            _ => None,
        }
    }
}

/// Terminal state of a [`CallContext`](crate::CallContext).
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    #[error("context canceled")]
    Cancelled,
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// Structured non-2xx response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResponseError {
    /// HTTP status code.
    pub status: u16,
    /// Bounded excerpt of the response body.
    pub body: String,
    /// Value of the `X-Request-Id` header.
    pub request_id: Option<String>,
}

impl fmt::Display for ResponseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.request_id {
            Some(id) => write!(
                f,
                "unexpected response [{}] with request id [{}]: {}",
                self.status, id, self.body
            ),
            None => write!(f, "unexpected response [{}]: {}", self.status, self.body),
        }
    }
}

impl std::error::Error for ResponseError {}
