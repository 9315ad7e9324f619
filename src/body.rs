//! Response body stream with bounded peeking.
//!
//! A [`Body`] is an ordered list of segments read one after another. Peeking
//! at a prefix for diagnostics pushes the consumed bytes back as a leading
//! segment, so the real consumer still observes the untouched byte sequence
//! exactly once.

use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures_util::stream::{BoxStream, Stream, StreamExt};

use crate::{
    cancel::CancellationToken,
    error::{BoxError, ContextError},
    Error, Result,
};

enum Segment {
    Buffered(Bytes),
    Streaming(BoxStream<'static, std::result::Result<Bytes, BoxError>>),
    Failed(Error),
}

/// Single-consumer body stream. Not meant to be shared across tasks.
#[derive(Default)]
pub struct Body {
    segments: VecDeque<Segment>,
    cancel: Option<CancellationToken>,
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Body")
            .field("segments", &self.segments.len())
            .field("cancellable", &self.cancel.is_some())
            .finish()
    }
}

impl Body {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        let mut body = Self::default();
        body.segments.push_back(Segment::Buffered(bytes.into()));
        body
    }

    pub fn from_stream<S, E>(stream: S) -> Self
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
        E: Into<BoxError>,
    {
        let mut body = Self::default();
        body.segments.push_back(Segment::Streaming(
            stream.map(|item| item.map_err(Into::into)).boxed(),
        ));
        body
    }

    /// Concatenates bodies; reading yields each one in order. The first
    /// cancellation token found is kept.
    pub fn chain(bodies: impl IntoIterator<Item = Body>) -> Self {
        let mut chained = Self::default();
        for body in bodies {
            chained.segments.extend(body.segments);
            if chained.cancel.is_none() {
                chained.cancel = body.cancel;
            }
        }
        chained
    }

    /// Aborts reads with [`ContextError::Cancelled`] once `token` fires.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Returns the next chunk, or `None` at the end of the last segment.
    pub async fn chunk(&mut self) -> Result<Option<Bytes>> {
        self.next().await.transpose()
    }

    /// Reads the remaining body into memory.
    pub async fn bytes(mut self) -> Result<Bytes> {
        let mut collected = BytesMut::new();
        while let Some(chunk) = self.chunk().await? {
            collected.extend_from_slice(&chunk);
        }
        Ok(collected.freeze())
    }

    /// Reads up to `limit` bytes and returns them with a body that yields
    /// `snapshot ++ remainder` when read to completion.
    ///
    /// A read error stops the snapshot early; the error is replayed by the
    /// reconstructed body right after the captured bytes.
    pub async fn snapshot(mut self, limit: usize) -> (Bytes, Body) {
        let mut captured = BytesMut::new();
        while captured.len() < limit {
            match self.chunk().await {
                Ok(Some(mut chunk)) => {
                    let room = limit - captured.len();
                    if chunk.len() > room {
                        let rest = chunk.split_off(room);
                        self.segments.push_front(Segment::Buffered(rest));
                    }
                    captured.extend_from_slice(&chunk);
                }
                Ok(None) => break,
                Err(err) => {
                    self.segments.push_front(Segment::Failed(err));
                    break;
                }
            }
        }

        let captured = captured.freeze();
        if !captured.is_empty() {
            self.segments.push_front(Segment::Buffered(captured.clone()));
        }
        (captured, self)
    }

    /// Reads and discards up to `limit` bytes (everything when `None`), then
    /// drops the body so the connection can be released.
    pub async fn drain(mut self, limit: Option<usize>) {
        let mut remaining = limit.unwrap_or(usize::MAX);
        while remaining > 0 {
            match self.chunk().await {
                Ok(Some(chunk)) => remaining = remaining.saturating_sub(chunk.len()),
                _ => break,
            }
        }
    }
}

impl Stream for Body {
    type Item = Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if this.cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
                return Poll::Ready(Some(Err(ContextError::Cancelled.into())));
            }

            let Some(segment) = this.segments.front_mut() else {
                return Poll::Ready(None);
            };

            match segment {
                Segment::Buffered(bytes) => {
                    let chunk = std::mem::take(bytes);
                    this.segments.pop_front();
                    if !chunk.is_empty() {
                        return Poll::Ready(Some(Ok(chunk)));
                    }
                }
                Segment::Streaming(stream) => match stream.poll_next_unpin(cx) {
                    Poll::Ready(Some(Ok(chunk))) => {
                        if !chunk.is_empty() {
                            return Poll::Ready(Some(Ok(chunk)));
                        }
                    }
                    Poll::Ready(Some(Err(err))) => return Poll::Ready(Some(Err(Error::Body(err)))),
                    // end of this segment, move to the next one
                    Poll::Ready(None) => {
                        this.segments.pop_front();
                    }
                    Poll::Pending => return Poll::Pending,
                },
                Segment::Failed(_) => {
                    if let Some(Segment::Failed(err)) = this.segments.pop_front() {
                        return Poll::Ready(Some(Err(err)));
                    }
                }
            }
        }
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Self::from_bytes(bytes)
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Self::from_bytes(bytes)
    }
}

impl From<&'static str> for Body {
    fn from(text: &'static str) -> Self {
        Self::from_bytes(text)
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Self::from_bytes(text)
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use bytes::Bytes;
    use futures_util::stream;
    use proptest::prelude::*;

    use super::Body;
    use crate::{cancel::CancellationToken, Error};

    const LOREM: &str = "Lorem ipsum dolor sit amet, consectetur adipiscing elit. \
        Sed do eiusmod tempor incididunt ut labore et dolore magna aliqua.";

    fn chunked(data: &'static [u8], size: usize) -> Body {
        let chunks: Vec<Result<Bytes, io::Error>> = data
            .chunks(size)
            .map(|chunk| Ok(Bytes::from_static(chunk)))
            .collect();
        Body::from_stream(stream::iter(chunks))
    }

    #[tokio::test]
    async fn snapshot_keeps_full_body_readable() {
        let (head, body) = chunked(LOREM.as_bytes(), 7).snapshot(5).await;
        assert_eq!(&head[..], b"Lorem");
        let all = body.bytes().await.expect("body must read");
        assert_eq!(&all[..], LOREM.as_bytes());
    }

    #[tokio::test]
    async fn snapshot_larger_than_body_returns_everything() {
        let (head, body) = Body::from("short").snapshot(1024).await;
        assert_eq!(&head[..], b"short");
        assert_eq!(&body.bytes().await.expect("body must read")[..], b"short");
    }

    #[tokio::test]
    async fn chain_reads_segments_in_order() {
        let body = Body::chain([Body::from("Hello"), chunked(b", World!", 3)]);
        assert_eq!(&body.bytes().await.expect("body must read")[..], b"Hello, World!");
    }

    #[tokio::test]
    async fn cancelled_token_aborts_reads() {
        let token = CancellationToken::new();
        let body = Body::chain([Body::from("Hello"), Body::from(" there")])
            .with_cancellation(token.clone());
        token.cancel();

        let err = body.bytes().await.expect_err("cancelled body must fail");
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn stream_error_aborts_with_bytes_kept_in_snapshot() {
        let items: Vec<Result<Bytes, io::Error>> = vec![
            Ok(Bytes::from_static(b"abc")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
            Ok(Bytes::from_static(b"never")),
        ];
        let (head, mut body) = Body::from_stream(stream::iter(items)).snapshot(64).await;
        assert_eq!(&head[..], b"abc");

        let first = body.chunk().await.expect("buffered prefix must read");
        assert_eq!(first.as_deref(), Some(&b"abc"[..]));
        let err = body.chunk().await.expect_err("error must be replayed");
        assert!(matches!(err, Error::Body(_)));
    }

    #[tokio::test]
    async fn drain_stops_at_limit() {
        // drain must return even though the stream would continue
        let endless = stream::repeat_with(|| Ok::<_, io::Error>(Bytes::from_static(b"xxxx")));
        Body::from_stream(endless).drain(Some(4096)).await;
    }

    proptest! {
        #[test]
        fn snapshot_then_read_yields_original(
            data in proptest::collection::vec(any::<u8>(), 0..4096),
            chunk in 1usize..512,
            limit_seed in any::<usize>(),
        ) {
            let limit = limit_seed % (data.len() + 1);
            let runtime = tokio::runtime::Builder::new_current_thread()
                .build()
                .expect("runtime must build");
            let chunks: Vec<Result<Bytes, io::Error>> = data
                .chunks(chunk)
                .map(|part| Ok(Bytes::copy_from_slice(part)))
                .collect();

            let (head, rest) = runtime.block_on(async {
                let (head, body) = Body::from_stream(stream::iter(chunks)).snapshot(limit).await;
                (head, body.bytes().await)
            });

            prop_assert_eq!(head.len(), limit);
            prop_assert_eq!(&head[..], &data[..limit]);
            prop_assert_eq!(rest.expect("body must read").to_vec(), data);
        }
    }
}
