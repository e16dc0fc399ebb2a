//! # range-download
//!
//! Resumable file downloads over HTTP range requests for [`axum`][1].
//!
//! A [`RangeTransfer`] resolves an optional `Range` header against any
//! [`ByteSource`] and answers `200 OK`, `206 Partial Content` or
//! `416 Range Not Satisfiable`. Two sources are provided: [`LocalFile`],
//! which seeks into a file on disk, and [`RemoteSource`], which proxies an
//! upstream HTTP server by forwarding the resolved range.
//!
//! Any type implementing both [`AsyncRead`] and [`AsyncSeekStart`] can be
//! given a size with the [`KnownSize`] adapter and streamed with
//! [`RangedStream`].
//!
//! ```no_run
//! use range_download::config::Config;
//! use range_download::server::{self, AppState};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let state = AppState::new(Config::default())?;
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await?;
//!     axum::serve(listener, server::router(state)).await?;
//!     Ok(())
//! }
//! ```
//!
//! [1]: https://docs.rs/axum

pub mod config;
mod error;
mod file;
pub mod fixture;
mod headers;
pub mod logging;
mod range;
pub mod remote;
pub mod server;
mod stream;

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum_extra::TypedHeader;
use axum_extra::headers::{ContentRange, Range};
use bytes::Bytes;
use futures::Stream;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncSeek};

pub use error::{TransferError, TransferResult};
pub use file::{KnownSize, LocalFile};
pub use headers::build_response_headers;
pub use range::{
    range_header, resolve_range, ByteRangeSpec, RangeError, RangeRequest, ResolvedRange, Unsatisfiable,
};
pub use remote::{HeadProbe, RemoteSource};
pub use stream::{RangedStream, TransferStream};

/// [`AsyncSeek`] narrowed to only allow seeking from start.
pub trait AsyncSeekStart {
    /// Same semantics as [`AsyncSeek::start_seek`], always passing position as the `SeekFrom::Start` variant.
    fn start_seek(self: Pin<&mut Self>, position: u64) -> io::Result<()>;

    /// Same semantics as [`AsyncSeek::poll_complete`], returning `()` instead of the new stream position.
    fn poll_complete(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>>;
}

impl<T: AsyncSeek> AsyncSeekStart for T {
    fn start_seek(self: Pin<&mut Self>, position: u64) -> io::Result<()> {
        AsyncSeek::start_seek(self, io::SeekFrom::Start(position))
    }

    fn poll_complete(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        AsyncSeek::poll_complete(self, cx).map_ok(|_| ())
    }
}

/// An [`AsyncRead`] and [`AsyncSeekStart`] with a fixed known byte size.
pub trait RangeBody: AsyncRead + AsyncSeekStart {
    /// The total size of the underlying file.
    ///
    /// This should not change for the lifetime of the object once queried.
    /// Behaviour is not guaranteed if it does change.
    fn byte_size(&self) -> u64;
}

/// Something a download can be served from: a local file, an upstream URL.
pub trait ByteSource: Send + 'static {
    type Stream: Stream<Item = io::Result<Bytes>> + Send + 'static;

    /// Total size in bytes, if known before the transfer starts.
    fn total_size(&self) -> Option<u64>;

    /// Name advertised in `Content-Disposition`.
    fn file_name(&self) -> &str;

    /// Whether a client `Range` header may be honoured at all. When this is
    /// `false` the full body is sent with `200 OK`.
    fn supports_ranges(&self) -> bool {
        true
    }

    /// Starts reading the requested bytes. The returned [`Opened`] states
    /// what is actually served, which for [`RangeRequest::Forward`] is only
    /// known once the source has answered.
    fn open(
        self,
        request: RangeRequest,
    ) -> impl Future<Output = Result<Opened<Self::Stream>, TransferError>> + Send;
}

/// A byte source opened for reading.
#[derive(Debug)]
pub struct Opened<S> {
    pub stream: S,
    /// The range being served, or `None` for the whole body.
    pub range: Option<ResolvedRange>,
    /// Total body size, if known.
    pub total_size: Option<u64>,
}

impl<S> Opened<S> {
    pub fn full(stream: S, total_size: Option<u64>) -> Self {
        Opened { stream, range: None, total_size }
    }

    pub fn partial(stream: S, range: ResolvedRange, total_size: Option<u64>) -> Self {
        Opened { stream, range: Some(range), total_size }
    }
}

/// Error type indicating that the requested range was not satisfiable. Implements [`IntoResponse`].
///
/// Carries `Content-Range: bytes */{total}` when the body size is known.
#[derive(Debug, Clone, Error)]
#[error("range not satisfiable: {0:?}")]
pub struct RangeNotSatisfiable(pub Option<ContentRange>);

impl IntoResponse for RangeNotSatisfiable {
    fn into_response(self) -> Response {
        let status = StatusCode::RANGE_NOT_SATISFIABLE;
        let header = self.0.map(TypedHeader);
        (status, header, ()).into_response()
    }
}

/// The main transfer type: a byte source plus the client's `Range` header.
#[derive(Debug)]
pub struct RangeTransfer<S: ByteSource> {
    range: Result<Option<Range>, RangeError>,
    source: S,
}

impl<S: ByteSource> RangeTransfer<S> {
    /// Construct a transfer over any [`ByteSource`] and an optional [`Range`] header.
    pub fn new(range: Option<Range>, source: S) -> Self {
        RangeTransfer { range: Ok(range), source }
    }

    /// Construct a transfer from request headers. A `Range` header that does
    /// not decode is answered with `416 Range Not Satisfiable`.
    pub fn from_headers(headers: &HeaderMap, source: S) -> Self {
        RangeTransfer { range: range_header(headers), source }
    }

    /// Resolves the range and opens the source, returning headers and body
    /// as [`RangedResponse`]. Fails before anything is sent to the client:
    /// with [`TransferError::Unsatisfiable`] for a bad range, or with the
    /// source's error if it cannot be opened.
    pub async fn try_respond(self) -> Result<RangedResponse<S::Stream>, TransferError> {
        let total_size = self.source.total_size();

        let request = if !self.source.supports_ranges() {
            if !matches!(self.range, Ok(None)) {
                tracing::debug!("source cannot serve ranges, sending full body");
            }
            Ok(RangeRequest::Full)
        } else {
            self.range
                .as_ref()
                .map_err(|e| Unsatisfiable::Parse(e.clone()))
                .and_then(|header| resolve_range(header.as_ref(), total_size))
        };

        let request = request.map_err(|e| {
            tracing::debug!(error = %e, ?total_size, "range not satisfiable");
            RangeNotSatisfiable(total_size.map(ContentRange::unsatisfied_bytes))
        })?;

        let file_name = self.source.file_name().to_owned();
        tracing::debug!(%file_name, ?total_size, ?request, "starting transfer");

        let Opened { stream, range, total_size } = self.source.open(request).await?;

        Ok(match range {
            Some(range) => RangedResponse::Partial {
                stream: TransferStream::new(stream, Some(range.content_length())),
                range,
                total_size,
                file_name,
            },
            None => RangedResponse::Full {
                stream: TransferStream::new(stream, total_size),
                total_size,
                file_name,
            },
        })
    }
}

/// Data type containing computed headers and body for a transfer. Implements [`IntoResponse`].
#[derive(Debug)]
pub enum RangedResponse<S> {
    /// Whole body, `200 OK`.
    Full {
        total_size: Option<u64>,
        file_name: String,
        stream: TransferStream<S>,
    },
    /// A single byte range, `206 Partial Content`.
    Partial {
        range: ResolvedRange,
        total_size: Option<u64>,
        file_name: String,
        stream: TransferStream<S>,
    },
}

impl<S> IntoResponse for RangedResponse<S>
where
    S: Stream<Item = io::Result<Bytes>> + Send + 'static,
{
    fn into_response(self) -> Response {
        let (resolved, total_size, file_name, stream) = match self {
            RangedResponse::Full { total_size, file_name, stream } => (None, total_size, file_name, stream),
            RangedResponse::Partial { range, total_size, file_name, stream } => {
                (Some(range), total_size, file_name, stream)
            }
        };
        match build_response_headers(resolved, total_size, &file_name) {
            Ok((status, headers)) => (status, headers, Body::new(stream)).into_response(),
            Err(e) => {
                tracing::warn!(range = ?resolved, ?total_size, "served range does not fit the body");
                e.into_response()
            }
        }
    }
}
