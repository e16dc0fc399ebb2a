use std::io;
use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum_extra::headers::ContentRange;
use pin_project::pin_project;
use tokio::fs::File;
use tokio::io::{ReadBuf, AsyncRead, AsyncSeek, AsyncSeekExt};

use crate::{
    AsyncSeekStart, ByteSource, Opened, RangeBody, RangeNotSatisfiable, RangeRequest, RangedStream,
    TransferError,
};

/// Implements [`RangeBody`] for any [`AsyncRead`] and [`AsyncSeekStart`], constructed with a fixed byte size.
#[pin_project]
pub struct KnownSize<B: AsyncRead + AsyncSeekStart> {
    byte_size: u64,
    #[pin]
    body: B,
}

impl<B: AsyncRead + AsyncSeekStart> std::fmt::Debug for KnownSize<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KnownSize")
            .field("byte_size", &self.byte_size)
            .finish()
    }
}

impl KnownSize<File> {
    /// Calls [`tokio::fs::File::metadata`] to determine file size.
    pub async fn file(file: File) -> io::Result<KnownSize<File>> {
        let byte_size = file.metadata().await?.len();
        Ok(KnownSize { byte_size, body: file })
    }
}

impl<B: AsyncRead + AsyncSeek + Unpin> KnownSize<B> {
    /// Uses `seek` to determine size by seeking to the end and getting stream position.
    pub async fn seek(mut body: B) -> io::Result<KnownSize<B>> {
        let byte_size = Pin::new(&mut body).seek(io::SeekFrom::End(0)).await?;
        Ok(KnownSize { byte_size, body })
    }
}

impl<B: AsyncRead + AsyncSeekStart> AsyncRead for KnownSize<B> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.project();
        this.body.poll_read(cx, buf)
    }
}

impl<B: AsyncRead + AsyncSeekStart> AsyncSeekStart for KnownSize<B> {
    fn start_seek(
        self: Pin<&mut Self>,
        position: u64,
    ) -> io::Result<()> {
        let this = self.project();
        this.body.start_seek(position)
    }

    fn poll_complete(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.project();
        this.body.poll_complete(cx)
    }
}

impl<B: AsyncRead + AsyncSeekStart> RangeBody for KnownSize<B> {
    fn byte_size(&self) -> u64 {
        self.byte_size
    }
}

/// A file on the local filesystem, served by seeking to the range start.
#[derive(Debug)]
pub struct LocalFile {
    body: KnownSize<File>,
    file_name: String,
}

impl LocalFile {
    /// Opens `path` and reads its size. The file name is the last path component.
    pub async fn load(path: impl AsRef<Path>) -> io::Result<LocalFile> {
        let path = path.as_ref();
        let file = File::open(path).await?;
        let body = KnownSize::file(file).await?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "download".to_string());
        Ok(LocalFile { body, file_name })
    }
}

impl ByteSource for LocalFile {
    type Stream = RangedStream<KnownSize<File>>;

    fn total_size(&self) -> Option<u64> {
        Some(self.body.byte_size())
    }

    fn file_name(&self) -> &str {
        &self.file_name
    }

    async fn open(self, request: RangeRequest) -> Result<Opened<Self::Stream>, TransferError> {
        let total = self.body.byte_size();
        let unsatisfied = || RangeNotSatisfiable(Some(ContentRange::unsatisfied_bytes(total)));

        let range = match request {
            RangeRequest::Full => None,
            RangeRequest::Resolved(range) if range.start <= range.end && range.end < total => Some(range),
            RangeRequest::Resolved(_) => return Err(unsatisfied().into()),
            RangeRequest::Forward(spec) => Some(spec.resolve(total).map_err(|_| unsatisfied())?),
        };

        let (start, length) = match range {
            Some(range) => (range.start, range.content_length()),
            None => (0, total),
        };
        let stream = RangedStream::new(self.body, start, length);
        Ok(Opened { stream, range, total_size: Some(total) })
    }
}
