use std::{io, mem};
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::{Bytes, BytesMut};
use futures::Stream;
use http_body::{Body, Frame, SizeHint};
use pin_project::{pin_project, pinned_drop};
use tokio::io::ReadBuf;

use crate::RangeBody;

const IO_BUFFER_SIZE: usize = 64 * 1024;

/// Reads `length` bytes of a seekable body starting at `start`. Implements [`Stream`].
#[derive(Debug)]
#[pin_project]
pub struct RangedStream<B> {
    state: StreamState,
    length: u64,
    #[pin]
    body: B,
}

impl<B: RangeBody + Send + 'static> RangedStream<B> {
    pub(crate) fn new(body: B, start: u64, length: u64) -> Self {
        RangedStream {
            state: StreamState::Seek { start },
            length,
            body,
        }
    }
}

#[derive(Debug)]
enum StreamState {
    Seek { start: u64 },
    Seeking { remaining: u64 },
    Reading { buffer: BytesMut, remaining: u64 },
}

impl<B: RangeBody> Stream for RangedStream<B> {
    type Item = io::Result<Bytes>;

    fn poll_next(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>
    ) -> Poll<Option<io::Result<Bytes>>> {
        let mut this = self.project();

        if let StreamState::Seek { start } = *this.state {
            match this.body.as_mut().start_seek(start) {
                Err(e) => { return Poll::Ready(Some(Err(e))); }
                Ok(()) => {
                    let remaining = *this.length;
                    *this.state = StreamState::Seeking { remaining };
                }
            }
        }

        if let StreamState::Seeking { remaining } = *this.state {
            match this.body.as_mut().poll_complete(cx) {
                Poll::Pending => { return Poll::Pending; }
                Poll::Ready(Err(e)) => { return Poll::Ready(Some(Err(e))); }
                Poll::Ready(Ok(())) => {
                    let buffer = allocate_buffer();
                    *this.state = StreamState::Reading { buffer, remaining };
                }
            }
        }

        let StreamState::Reading { buffer, remaining } = this.state else {
            unreachable!("seek states always advance to reading");
        };

        if *remaining == 0 {
            return Poll::Ready(None);
        }

        let uninit = buffer.spare_capacity_mut();

        // the smaller of the buffer size and the number of bytes remaining
        let nbytes = std::cmp::min(
            uninit.len(),
            usize::try_from(*remaining).unwrap_or(usize::MAX),
        );

        let mut read_buf = ReadBuf::uninit(&mut uninit[0..nbytes]);

        match ready!(this.body.as_mut().poll_read(cx, &mut read_buf)) {
            Err(e) => Poll::Ready(Some(Err(e))),
            Ok(()) => match read_buf.filled().len() {
                0 => Poll::Ready(None),
                n => {
                    // SAFETY: poll_read has filled the buffer with `n`
                    // additional bytes. `buffer.len` should always be
                    // 0 here, but include it for rigorous correctness
                    unsafe { buffer.set_len(buffer.len() + n); }

                    let chunk = mem::replace(buffer, allocate_buffer());

                    // n <= remaining because of the cmp::min above
                    *remaining -= n as u64;

                    Poll::Ready(Some(Ok(chunk.freeze())))
                }
            },
        }
    }
}

fn allocate_buffer() -> BytesMut {
    BytesMut::with_capacity(IO_BUFFER_SIZE)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Streaming,
    Complete,
    Failed,
}

/// Response body for a transfer. Implements [`Stream`] and [`Body`].
///
/// Relays a byte source to the client, stopping after `expected` bytes when
/// the length was announced. A source that ends short of the announced length
/// or fails mid-stream surfaces as a body error, which aborts the connection
/// instead of completing a truncated response.
#[pin_project(PinnedDrop)]
pub struct TransferStream<S> {
    #[pin]
    inner: S,
    expected: Option<u64>,
    sent: u64,
    outcome: Outcome,
}

impl<S> TransferStream<S>
where
    S: Stream<Item = io::Result<Bytes>>,
{
    pub fn new(inner: S, expected: Option<u64>) -> Self {
        TransferStream {
            inner,
            expected,
            sent: 0,
            outcome: Outcome::Streaming,
        }
    }

    /// Bytes relayed so far.
    pub fn sent(&self) -> u64 {
        self.sent
    }
}

impl<S> std::fmt::Debug for TransferStream<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferStream")
            .field("expected", &self.expected)
            .field("sent", &self.sent)
            .field("outcome", &self.outcome)
            .finish()
    }
}

impl<S> Stream for TransferStream<S>
where
    S: Stream<Item = io::Result<Bytes>>,
{
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();

        if *this.outcome != Outcome::Streaming {
            return Poll::Ready(None);
        }

        if let Some(expected) = *this.expected {
            if *this.sent >= expected {
                *this.outcome = Outcome::Complete;
                tracing::debug!(sent = *this.sent, "transfer complete");
                return Poll::Ready(None);
            }
        }

        match ready!(this.inner.poll_next(cx)) {
            Some(Ok(mut chunk)) => {
                if let Some(expected) = *this.expected {
                    let remaining = expected - *this.sent;
                    if chunk.len() as u64 > remaining {
                        chunk.truncate(remaining as usize);
                    }
                }
                *this.sent += chunk.len() as u64;
                Poll::Ready(Some(Ok(chunk)))
            }
            Some(Err(e)) => {
                *this.outcome = Outcome::Failed;
                tracing::warn!(sent = *this.sent, error = %e, "transfer failed, aborting response");
                Poll::Ready(Some(Err(e)))
            }
            None => match *this.expected {
                Some(expected) if *this.sent < expected => {
                    *this.outcome = Outcome::Failed;
                    tracing::warn!(sent = *this.sent, expected, "source ended before the announced length");
                    Poll::Ready(Some(Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("source ended after {} of {} bytes", *this.sent, expected),
                    ))))
                }
                _ => {
                    *this.outcome = Outcome::Complete;
                    tracing::debug!(sent = *this.sent, "transfer complete");
                    Poll::Ready(None)
                }
            },
        }
    }
}

#[pinned_drop]
impl<S> PinnedDrop for TransferStream<S> {
    fn drop(self: Pin<&mut Self>) {
        if self.outcome == Outcome::Streaming {
            tracing::debug!(sent = self.sent, expected = ?self.expected, "response dropped before transfer completed");
        }
    }
}

impl<S> Body for TransferStream<S>
where
    S: Stream<Item = io::Result<Bytes>>,
{
    type Data = Bytes;
    type Error = io::Error;

    fn size_hint(&self) -> SizeHint {
        match self.expected {
            Some(expected) => SizeHint::with_exact(expected),
            None => SizeHint::default(),
        }
    }

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>)
        -> Poll<Option<io::Result<Frame<Bytes>>>>
    {
        self.poll_next(cx).map(|item| item.map(|result| result.map(Frame::data)))
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use bytes::Bytes;
    use futures::{stream, StreamExt, TryStreamExt};

    use super::TransferStream;

    fn chunks(parts: &[&'static str]) -> impl futures::Stream<Item = io::Result<Bytes>> {
        stream::iter(parts.iter().map(|p| Ok(Bytes::from_static(p.as_bytes()))).collect::<Vec<_>>())
    }

    async fn collect(stream: TransferStream<impl futures::Stream<Item = io::Result<Bytes>>>) -> io::Result<String> {
        let parts: Vec<Bytes> = stream.try_collect().await?;
        Ok(parts.iter().map(|b| std::str::from_utf8(b).unwrap()).collect())
    }

    #[tokio::test]
    async fn test_relays_until_source_ends() {
        let stream = TransferStream::new(chunks(&["hello ", "world"]), None);
        assert_eq!("hello world", collect(stream).await.unwrap());
    }

    #[tokio::test]
    async fn test_exact_length() {
        let stream = TransferStream::new(chunks(&["hello ", "world"]), Some(11));
        assert_eq!("hello world", collect(stream).await.unwrap());
    }

    #[tokio::test]
    async fn test_truncates_to_announced_length() {
        let stream = TransferStream::new(chunks(&["hello ", "world", "!!!"]), Some(8));
        assert_eq!("hello wo", collect(stream).await.unwrap());
    }

    #[tokio::test]
    async fn test_short_source_is_an_error() {
        let stream = TransferStream::new(chunks(&["hello"]), Some(11));
        let err = collect(stream).await.unwrap_err();
        assert_eq!(io::ErrorKind::UnexpectedEof, err.kind());
    }

    #[tokio::test]
    async fn test_source_error_ends_stream() {
        let inner = stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(io::Error::other("upstream reset")),
            Ok(Bytes::from_static(b"never sent")),
        ]);
        let mut stream = TransferStream::new(inner, None);

        assert_eq!(Bytes::from_static(b"partial"), stream.next().await.unwrap().unwrap());
        assert!(stream.next().await.unwrap().is_err());
        assert!(stream.next().await.is_none());
        assert_eq!(7, stream.sent());
    }
}
