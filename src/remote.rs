//! Upstream HTTP byte source.
//!
//! Total size comes from a HEAD probe. Ranges are served by issuing a new
//! GET carrying a `Range` header, so no upstream connection outlives the
//! response body that reads from it. When the size is unknown, open-ended
//! ranges are passed through and the upstream's `Content-Range` is relayed.

use std::io;
use std::time::Duration;

use axum::http::header::{CONTENT_LENGTH, RANGE};
use axum::http::{HeaderMap, StatusCode};
use axum_extra::headers::{ContentRange, HeaderMapExt};
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use reqwest::Client;
use url::Url;

use crate::{ByteRangeSpec, ByteSource, Opened, RangeRequest, ResolvedRange, TransferError};

/// File name used when the URL path has no usable last segment.
pub const DEFAULT_FILE_NAME: &str = "downloaded-file";

/// Outcome of the upstream HEAD request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadProbe {
    /// HEAD succeeded with a positive `Content-Length`.
    Sized(u64),
    /// HEAD succeeded but did not announce a usable length.
    Unsized,
    /// HEAD failed; the transfer degrades to an unranged full-body proxy.
    Failed,
}

/// A file fetched from an upstream HTTP server.
#[derive(Debug, Clone)]
pub struct RemoteSource {
    client: Client,
    url: Url,
    file_name: String,
    probe: HeadProbe,
}

impl RemoteSource {
    /// Probes `url` with HEAD, bounded by `head_timeout`. Never fails: an
    /// unreachable or erroring upstream is recorded as [`HeadProbe::Failed`].
    pub async fn probe(client: Client, url: Url, head_timeout: Duration) -> RemoteSource {
        let probe = match client.head(url.clone()).timeout(head_timeout).send().await {
            Ok(response) if response.status().is_success() => {
                // reqwest reports a zero size hint for HEAD bodies, read the header itself
                match response
                    .headers()
                    .get(CONTENT_LENGTH)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.trim().parse::<u64>().ok())
                {
                    Some(len) if len > 0 => HeadProbe::Sized(len),
                    _ => HeadProbe::Unsized,
                }
            }
            Ok(response) => {
                tracing::warn!(%url, status = %response.status(), "upstream HEAD returned an error status");
                HeadProbe::Failed
            }
            Err(e) => {
                tracing::warn!(%url, error = %e, "upstream HEAD failed");
                HeadProbe::Failed
            }
        };
        tracing::debug!(%url, ?probe, "upstream probed");

        RemoteSource::with_probe(client, url, probe)
    }

    /// Builds a source from an already known probe result.
    pub fn with_probe(client: Client, url: Url, probe: HeadProbe) -> RemoteSource {
        let file_name = file_name_from_url(&url);
        RemoteSource { client, url, file_name, probe }
    }

    pub fn head_probe(&self) -> HeadProbe {
        self.probe
    }
}

impl ByteSource for RemoteSource {
    type Stream = BoxStream<'static, io::Result<Bytes>>;

    fn total_size(&self) -> Option<u64> {
        match self.probe {
            HeadProbe::Sized(len) => Some(len),
            HeadProbe::Unsized | HeadProbe::Failed => None,
        }
    }

    fn file_name(&self) -> &str {
        &self.file_name
    }

    fn supports_ranges(&self) -> bool {
        self.probe != HeadProbe::Failed
    }

    async fn open(self, request: RangeRequest) -> Result<Opened<Self::Stream>, TransferError> {
        let total_size = self.total_size();
        let forwarded = match request {
            RangeRequest::Full => None,
            RangeRequest::Resolved(range) => Some(ByteRangeSpec::from(range)),
            RangeRequest::Forward(spec) => Some(spec),
        };

        let mut get = self.client.get(self.url.clone());
        if let Some(spec) = forwarded {
            get = get.header(RANGE, spec.to_header_value());
        }

        let response = get.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransferError::UpstreamStatus(status));
        }

        let served = match request {
            RangeRequest::Full => None,
            RangeRequest::Resolved(range) if status == StatusCode::PARTIAL_CONTENT => Some((range, total_size)),
            // a 200 here would deliver the whole file under a partial-content header
            RangeRequest::Resolved(_) => return Err(TransferError::UpstreamIgnoredRange(status)),
            RangeRequest::Forward(_) if status == StatusCode::PARTIAL_CONTENT => {
                Some(upstream_content_range(response.headers())?)
            }
            RangeRequest::Forward(spec) => {
                tracing::debug!(url = %self.url, range = %spec.to_header_value(), "upstream ignored forwarded range");
                None
            }
        };
        tracing::debug!(url = %self.url, %status, ?served, "upstream body opened");

        let stream = response.bytes_stream().map_err(io::Error::other).boxed();
        Ok(match served {
            Some((range, total_size)) => Opened::partial(stream, range, total_size),
            None => Opened::full(stream, total_size),
        })
    }
}

/// Range and total announced by an upstream `206` response.
fn upstream_content_range(headers: &HeaderMap) -> Result<(ResolvedRange, Option<u64>), TransferError> {
    headers
        .typed_get::<ContentRange>()
        .and_then(|content_range| {
            let (start, end) = content_range.bytes_range()?;
            let total = content_range.bytes_len();
            let fits = start <= end && total.map_or(true, |total| end < total);
            fits.then(|| (ResolvedRange::new(start, end), total))
        })
        .ok_or(TransferError::UpstreamContentRange)
}

/// Parses the `url` query parameter, accepting only `http` and `https`.
pub fn parse_url(raw: &str) -> Result<Url, TransferError> {
    let url = Url::parse(raw.trim()).map_err(|e| TransferError::InvalidUrl(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(TransferError::InvalidUrl(format!("unsupported scheme: {scheme}"))),
    }
}

/// Last non-empty path segment of `url`, or [`DEFAULT_FILE_NAME`].
pub fn file_name_from_url(url: &Url) -> String {
    url.path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .filter(|segment| *segment != "." && *segment != "..")
        .map(|segment| segment.to_string())
        .unwrap_or_else(|| DEFAULT_FILE_NAME.to_string())
}
