use bytes::Bytes;
use reqwest::{header, StatusCode};
use serde::de::DeserializeOwned;

use crate::{Body, Error, ResponseError, Result};

/// Response type flowing through the transport chain.
pub type Response = http::Response<Body>;

/// Default ceiling for diagnostic body excerpts (1 MiB).
pub const DEFAULT_RESPONSE_ERR_LIMIT: usize = 1 << 20;

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Reads at most `limit` bytes of the body for diagnostics and puts them back
/// in front of the unread remainder.
pub async fn limited_response(response: &mut Response, limit: usize) -> Bytes {
    let body = std::mem::take(response.body_mut());
    let (excerpt, body) = body.snapshot(limit).await;
    *response.body_mut() = body;
    excerpt
}

/// Builds a [`ResponseError`] from the status, request id and a bounded body excerpt.
///
/// An excerpt cut inside a multi-byte character ends at the last complete
/// one, so it never exceeds `limit` bytes. Other invalid UTF-8 is replaced
/// lossily.
pub async fn error_response(response: &mut Response, limit: usize) -> ResponseError {
    let excerpt = limited_response(response, limit).await;
    ResponseError {
        status: response.status().as_u16(),
        body: excerpt_text(&excerpt),
        request_id: request_id(response),
    }
}

fn excerpt_text(excerpt: &[u8]) -> String {
    match std::str::from_utf8(excerpt) {
        Ok(text) => text.to_owned(),
        // incomplete trailing character
        Err(err) if err.error_len().is_none() => {
            String::from_utf8_lossy(&excerpt[..err.valid_up_to()]).into_owned()
        }
        Err(_) => String::from_utf8_lossy(excerpt).into_owned(),
    }
}

/// Fails with [`Error::UnexpectedResponse`] unless the status is 2xx.
pub async fn unexpected_response(response: &mut Response) -> Result<()> {
    unexpected_response_limited(response, DEFAULT_RESPONSE_ERR_LIMIT).await
}

pub async fn unexpected_response_limited(response: &mut Response, limit: usize) -> Result<()> {
    if response.status().is_success() {
        return Ok(());
    }
    Err(error_response(response, limit).await.into())
}

/// Checks the status and decodes a JSON body.
///
/// Returns `None` for no-content responses (204 or `Content-Length: 0`).
pub async fn response_json<T: DeserializeOwned>(response: &mut Response) -> Result<Option<T>> {
    response_json_limited(response, DEFAULT_RESPONSE_ERR_LIMIT).await
}

/// Like [`response_json`], with the error excerpt capped at `limit` bytes.
pub async fn response_json_limited<T: DeserializeOwned>(
    response: &mut Response,
    limit: usize,
) -> Result<Option<T>> {
    unexpected_response_limited(response, limit).await?;
    if is_no_content(response) {
        return Ok(None);
    }

    let body = std::mem::take(response.body_mut()).bytes().await?;
    if body.is_empty() {
        return Ok(None);
    }
    serde_json::from_slice(&body).map(Some).map_err(Error::Decode)
}

fn is_no_content(response: &Response) -> bool {
    if response.status() == StatusCode::NO_CONTENT {
        return true;
    }
    response
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.trim() == "0")
}

pub(crate) fn request_id(response: &Response) -> Option<String> {
    response
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
}
