//! Retry classification and backoff.

use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;

use reqwest::{header, StatusCode};
use tokio::time::Instant;

use crate::{
    response::{error_response, Response},
    CallContext, Error, Result,
};

/// Request-scoped retry rules.
///
/// Attached to a [`CallContext`], these replace the client's default status
/// code rules for every attempt of that call. Cancellation still wins.
#[derive(Clone, Debug, Default)]
pub struct RetryOverride {
    disable: bool,
    disabled_status_codes: BTreeSet<u16>,
    enabled_status_codes: BTreeSet<u16>,
    logger: Option<tracing::Span>,
}

impl RetryOverride {
    pub fn new() -> Self {
        Self::default()
    }

    /// Turns retries off for the call.
    pub fn disable(mut self) -> Self {
        self.disable = true;
        self
    }

    /// Status codes that are never retried. Checked before the enabled set.
    pub fn disabled_status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.disabled_status_codes.extend(codes);
        self
    }

    /// Status codes that are always retried.
    pub fn enabled_status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.enabled_status_codes.extend(codes);
        self
    }

    /// Emits retry warnings inside `span`, even when client-level retry
    /// logging is off.
    pub fn logger(mut self, span: tracing::Span) -> Self {
        self.logger = Some(span);
        self
    }

    pub fn is_disabled(&self) -> bool {
        self.disable
    }
}

/// Outcome of classifying one attempt.
#[derive(Debug)]
pub enum Verdict {
    /// Hand this result back to the caller.
    Finish(Result<Response>),
    /// Repeat the attempt after waiting.
    Retry {
        error: Error,
        retry_after: Option<Duration>,
    },
}

#[derive(Clone, Debug)]
pub struct RetryPolicy {
    defaults: RetryOverride,
    log_retries: bool,
    response_error_limit: usize,
    attempt_timeout: Option<Duration>,
}

impl RetryPolicy {
    pub fn new(defaults: RetryOverride, log_retries: bool, response_error_limit: usize) -> Self {
        Self {
            defaults,
            log_retries,
            response_error_limit,
            attempt_timeout: None,
        }
    }

    /// Bounds reading and draining a retried response's body.
    ///
    /// A body that stalls past `timeout` abandons the attempt with
    /// [`Error::AttemptTimeout`] and the call moves on to the next one.
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    /// Decides whether the attempt that produced `outcome` should be repeated.
    ///
    /// A retried response is drained here; a finished one is returned with its
    /// body intact.
    pub async fn check(&self, ctx: &CallContext, outcome: Result<Response>) -> Verdict {
        if let Some(err) = ctx.err() {
            return Verdict::Finish(Err(err.into()));
        }

        let rules = ctx.retry().unwrap_or(&self.defaults);
        if rules.disable {
            return Verdict::Finish(outcome);
        }

        let mut response = match outcome {
            Ok(response) => response,
            Err(err) if is_retryable_error(&err) => {
                self.log_retry(rules, &err);
                return Verdict::Retry {
                    error: err,
                    retry_after: None,
                };
            }
            Err(err) => return Verdict::Finish(Err(err)),
        };

        let status = response.status();
        if rules.disabled_status_codes.contains(&status.as_u16()) {
            return Verdict::Finish(Ok(response));
        }

        let forced = rules.enabled_status_codes.contains(&status.as_u16());
        if !forced && !is_retryable_status(status) {
            return Verdict::Finish(Ok(response));
        }

        let deadline = self.attempt_timeout.map(|timeout| Instant::now() + timeout);
        let limit = self.response_error_limit;
        let Some(excerpt) = bounded(deadline, error_response(&mut response, limit)).await else {
            return self.abandon(rules);
        };
        let error = if forced {
            Error::ForcedRetry(excerpt)
        } else {
            Error::UnexpectedResponse(excerpt)
        };

        self.log_retry(rules, &error);
        let retry_after = retry_after(&response);
        if bounded(deadline, response.into_body().drain(Some(limit)))
            .await
            .is_none()
        {
            tracing::debug!("gave up draining retried response");
        }

        Verdict::Retry { error, retry_after }
    }

    /// Retry verdict for an attempt whose error body stalled.
    fn abandon(&self, rules: &RetryOverride) -> Verdict {
        let error = Error::AttemptTimeout {
            timeout: self.attempt_timeout.unwrap_or_default(),
        };
        self.log_retry(rules, &error);
        Verdict::Retry {
            error,
            retry_after: None,
        }
    }

    fn log_retry(&self, rules: &RetryOverride, error: &Error) {
        let excerpt = error.body_excerpt().unwrap_or_default();
        match &rules.logger {
            Some(span) => span.in_scope(|| {
                tracing::warn!(error = %error, body = excerpt, "retrying request");
            }),
            None if self.log_retries => {
                tracing::warn!(error = %error, body = excerpt, "retrying request");
            }
            None => {}
        }
    }
}

async fn bounded<F: Future>(deadline: Option<Instant>, future: F) -> Option<F::Output> {
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, future).await.ok(),
        None => Some(future.await),
    }
}

/// Statuses worth repeating: 429 and every 5xx except 501.
pub fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || (status.is_server_error() && status != StatusCode::NOT_IMPLEMENTED)
}

/// Connectivity failures and attempt timeouts are retryable; malformed
/// requests, redirect loops and certificate rejections are not.
pub fn is_retryable_error(err: &Error) -> bool {
    match err {
        Error::AttemptTimeout { .. } | Error::Body(_) => true,
        Error::Transport(inner) => {
            !(inner.is_builder() || inner.is_redirect() || is_certificate_error(inner))
        }
        _ => false,
    }
}

fn is_certificate_error(err: &reqwest::Error) -> bool {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(current) = source {
        if current.to_string().to_ascii_lowercase().contains("certificate") {
            return true;
        }
        source = current.source();
    }
    false
}

fn retry_after(response: &Response) -> Option<Duration> {
    if !matches!(
        response.status(),
        StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE
    ) {
        return None;
    }
    response
        .headers()
        .get(header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Exponential wait bounded by `[min, max]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Backoff {
    min: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max: max.max(min),
        }
    }

    /// Delay before retry number `attempt` (zero-based). A server-provided
    /// `Retry-After` replaces the exponential value but stays within bounds.
    pub fn delay(&self, attempt: usize, retry_after: Option<Duration>) -> Duration {
        let wait = retry_after.unwrap_or_else(|| {
            let exp = attempt.min(31) as u32;
            self.min.saturating_mul(1u32 << exp)
        });
        wait.clamp(self.min, self.max)
    }
}
