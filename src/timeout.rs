use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;

use crate::{
    response::Response,
    transport::{Request, Transport},
    CallContext, Error, Result,
};

/// Bounds a single attempt independently of the call deadline.
///
/// An attempt that runs out of time while the call is still live fails with
/// [`Error::AttemptTimeout`], which the retry policy treats as retryable. When
/// the call itself is cancelled or expired, its context error is reported
/// instead.
pub struct AttemptTimeout {
    inner: Arc<dyn Transport>,
    timeout: Duration,
}

impl AttemptTimeout {
    pub fn new(inner: Arc<dyn Transport>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    fn classify(&self, ctx: &CallContext, err: Error) -> Error {
        if let Some(ctx_err) = ctx.err() {
            return ctx_err.into();
        }
        match err {
            Error::Transport(inner) if inner.is_timeout() => Error::AttemptTimeout {
                timeout: self.timeout,
            },
            other => other,
        }
    }
}

impl Transport for AttemptTimeout {
    fn round_trip<'a>(
        &'a self,
        ctx: &'a CallContext,
        request: Request,
    ) -> BoxFuture<'a, Result<Response>> {
        Box::pin(async move {
            match tokio::time::timeout(self.timeout, self.inner.round_trip(ctx, request)).await {
                Ok(Ok(response)) => Ok(response),
                Ok(Err(err)) => Err(self.classify(ctx, err)),
                Err(_elapsed) => {
                    tracing::debug!(timeout_ms = self.timeout.as_millis() as u64, "attempt timed out");
                    Err(match ctx.err() {
                        Some(ctx_err) => ctx_err.into(),
                        None => Error::AttemptTimeout {
                            timeout: self.timeout,
                        },
                    })
                }
            }
        })
    }
}
