//! Request-scoped execution context.
//!
//! A [`CallContext`] travels with one logical call through every attempt. It
//! carries the caller's cancellation token and deadline, an optional
//! [`RetryOverride`] and an optional header set that the transport chain
//! applies with override semantics.

use std::future::Future;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, IntoHeaderName};
use tokio::time::Instant;

use crate::{cancel::CancellationToken, error::ContextError, RetryOverride};

#[derive(Clone, Debug, Default)]
pub struct CallContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
    retry: Option<RetryOverride>,
    headers: Option<HeaderMap>,
}

impl CallContext {
    /// Creates a context with no deadline, no overrides and a fresh token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds the call to an external cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Sets an absolute deadline. An earlier existing deadline is kept.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
        self
    }

    /// Sets a deadline relative to now. An earlier existing deadline is kept.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Attaches retry rules that replace the client defaults for this call.
    pub fn with_retry(mut self, retry: RetryOverride) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Adds one header that overrides request and default values.
    pub fn with_header<K: IntoHeaderName>(mut self, name: K, value: HeaderValue) -> Self {
        self.headers
            .get_or_insert_with(HeaderMap::new)
            .insert(name, value);
        self
    }

    /// Merges a header set that overrides request and default values.
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        let target = self.headers.get_or_insert_with(HeaderMap::new);
        let mut last = None;
        for (name, value) in headers {
            if let Some(name) = name {
                target.remove(&name);
                last = Some(name);
            }
            if let Some(name) = &last {
                target.append(name.clone(), value);
            }
        }
        self
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn retry(&self) -> Option<&RetryOverride> {
        self.retry.as_ref()
    }

    pub fn headers(&self) -> Option<&HeaderMap> {
        self.headers.as_ref()
    }

    /// Returns the terminal state of the call, if any. Cancellation wins over
    /// an expired deadline.
    pub fn err(&self) -> Option<ContextError> {
        if self.cancel.is_cancelled() {
            return Some(ContextError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Drives `future` until it completes, the token is cancelled or the
    /// deadline passes, whichever happens first.
    pub async fn run<F: Future>(&self, future: F) -> Result<F::Output, ContextError> {
        if let Some(err) = self.err() {
            return Err(err);
        }

        let deadline = self.deadline;
        let expired = async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ContextError::Cancelled),
            _ = expired => Err(ContextError::DeadlineExceeded),
            output = future => Ok(output),
        }
    }

    /// Cancellable sleep used between retry attempts.
    pub async fn sleep(&self, duration: Duration) -> Result<(), ContextError> {
        self.run(tokio::time::sleep(duration)).await
    }
}
